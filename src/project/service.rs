//! Service descriptions.
//!
//! A service is a named, long-running container within a project. Engines only
//! read these; the helpers here derive the container-side view of a service
//! (working directory, foreground overrides, volume sources).

use crate::env;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Role a service plays within its project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The project source tree is mounted at [`env::container::SRC_PATH`]
    Src,
    /// The main service of the project
    Main,
    /// A database service
    Db,
    /// Any role this crate attaches no behavior to
    #[serde(other)]
    Other,
}

/// Logging capture flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Logging {
    /// Capture the container's standard output to a file
    #[serde(default)]
    pub stdout: bool,
    /// Capture the container's standard error to a file
    #[serde(default)]
    pub stderr: bool,
}

impl Logging {
    /// Whether any stream is captured.
    pub fn any(&self) -> bool {
        self.stdout || self.stderr
    }
}

/// Volume access mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeMode {
    #[default]
    Rw,
    Ro,
}

/// An extra host directory mounted into the service container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalVolume {
    /// Host path; relative paths resolve against the project root
    pub host: String,
    /// Container path; relative paths resolve against the source mount
    pub container: String,
    #[serde(default)]
    pub mode: VolumeMode,
}

/// A long-running process definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    /// Image reference
    pub image: String,
    /// Command overriding the image's default command, run through a shell
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub roles: Vec<Role>,
    /// Container port serving HTTP, published to a random host port
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub logging: Logging,
    /// Commands run in one-off containers before the service starts
    #[serde(default)]
    pub pre_start: Vec<String>,
    /// Commands run inside the service container after it started
    #[serde(default)]
    pub post_start: Vec<String>,
    /// Source-relative paths whose container-side writes need not reach the host
    #[serde(default)]
    pub unimportant_paths: Vec<String>,
    #[serde(default)]
    pub additional_volumes: BTreeMap<String, AdditionalVolume>,
    #[serde(default = "default_run_as_current_user")]
    pub run_as_current_user: bool,
}

fn default_run_as_current_user() -> bool {
    true
}

impl Service {
    /// Create a service running `image` with every option at its default.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            command: None,
            roles: Vec::new(),
            port: None,
            environment: BTreeMap::new(),
            working_directory: None,
            logging: Logging::default(),
            pre_start: Vec::new(),
            post_start: Vec::new(),
            unimportant_paths: Vec::new(),
            additional_volumes: BTreeMap::new(),
            run_as_current_user: default_run_as_current_user(),
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        if !self.roles.contains(&role) {
            self.roles.push(role);
        }
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }

    /// The service command with `arguments` shell-quoted and appended.
    ///
    /// `None` when the service runs its image's default command.
    pub fn command_line(&self, arguments: &[String]) -> Option<String> {
        self.command
            .as_deref()
            .map(|base| super::append_arguments(base, arguments))
    }

    /// Whether the project source tree is mounted into this service.
    pub fn mounts_src(&self) -> bool {
        self.has_role(&Role::Src)
    }

    /// Working directory inside the container.
    ///
    /// Relative directories of `src` services live under the source mount.
    /// Services without the `src` role only honor absolute directories.
    pub fn container_working_dir(&self) -> Option<String> {
        match self.working_directory.as_deref() {
            Some(dir) if dir.starts_with('/') => Some(dir.to_string()),
            Some(dir) if self.mounts_src() => {
                Some(join_container_path(env::container::SRC_PATH, dir))
            }
            Some(_) => None,
            None if self.mounts_src() => Some(env::container::SRC_PATH.to_string()),
            None => None,
        }
    }

    /// Container paths of the unimportant paths, if they apply to this service.
    pub fn unimportant_container_paths(&self) -> Vec<String> {
        if !self.mounts_src() {
            return Vec::new();
        }
        self.unimportant_paths
            .iter()
            .map(|p| join_container_path(env::container::SRC_PATH, p))
            .collect()
    }

    /// Host and container paths of the additional volumes.
    pub fn resolved_additional_volumes(
        &self,
        project_root: &Path,
    ) -> Vec<(PathBuf, String, VolumeMode)> {
        self.additional_volumes
            .values()
            .map(|v| {
                let host = if Path::new(&v.host).is_absolute() {
                    PathBuf::from(&v.host)
                } else {
                    project_root.join(&v.host)
                };
                let container = if v.container.starts_with('/') {
                    v.container.clone()
                } else {
                    join_container_path(env::container::SRC_PATH, &v.container)
                };
                (host, container, v.mode)
            })
            .collect()
    }

    /// The variant of this service run by `service_fg`.
    ///
    /// Logging capture is off, hooks are empty, the source tree is mounted and
    /// the working directory is `cwd` relative to `src_root`. A `cwd` outside
    /// the source tree falls back to the source mount itself.
    pub fn foreground_variant(&self, src_root: &Path, cwd: &Path) -> Service {
        let mut service = self.clone().with_role(Role::Src);
        service.logging = Logging::default();
        service.pre_start.clear();
        service.post_start.clear();

        service.working_directory = Some(container_dir_for(src_root, cwd));
        service
    }
}

/// Container path of the host directory `cwd` under the source mount.
///
/// Directories outside `src_root` map to the source mount itself.
pub fn container_dir_for(src_root: &Path, cwd: &Path) -> String {
    let relative = cwd.strip_prefix(src_root).ok().map(|rel| {
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    });
    match relative {
        Some(rel) if !rel.is_empty() => join_container_path(env::container::SRC_PATH, &rel),
        _ => env::container::SRC_PATH.to_string(),
    }
}

/// Join a relative path onto a container path using `/` separators.
pub(crate) fn join_container_path(base: &str, rel: &str) -> String {
    let rel = rel.trim_start_matches("./").trim_matches('/');
    if rel.is_empty() || rel == "." {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), rel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_working_dir_relative_with_src() {
        let mut service = Service::new("nginx").with_role(Role::Src);
        service.working_directory = Some("public".to_string());
        assert_eq!(service.container_working_dir(), Some("/src/public".to_string()));
    }

    #[test]
    fn test_working_dir_absolute() {
        let mut service = Service::new("nginx");
        service.working_directory = Some("/var/www".to_string());
        assert_eq!(service.container_working_dir(), Some("/var/www".to_string()));
    }

    #[test]
    fn test_working_dir_defaults() {
        assert_eq!(
            Service::new("nginx").with_role(Role::Src).container_working_dir(),
            Some("/src".to_string())
        );
        assert_eq!(Service::new("nginx").container_working_dir(), None);

        let mut no_src = Service::new("nginx");
        no_src.working_directory = Some("relative".to_string());
        assert_eq!(no_src.container_working_dir(), None);
    }

    #[test]
    fn test_unimportant_paths_only_for_src() {
        let mut service = Service::new("node");
        service.unimportant_paths = vec!["node_modules".to_string(), "./.cache/".to_string()];
        assert!(service.unimportant_container_paths().is_empty());

        let service = service.with_role(Role::Src);
        assert_eq!(
            service.unimportant_container_paths(),
            vec!["/src/node_modules".to_string(), "/src/.cache".to_string()]
        );
    }

    #[test]
    fn test_foreground_variant_overrides() {
        let mut service = Service::new("php");
        service.logging = Logging { stdout: true, stderr: true };
        service.pre_start = vec!["echo pre".to_string()];
        service.post_start = vec!["echo post".to_string()];
        service.working_directory = Some("/app".to_string());

        let fg = service.foreground_variant(Path::new("/p/src"), Path::new("/p/src/lib/deep"));
        assert!(fg.mounts_src());
        assert!(!fg.logging.any());
        assert!(fg.pre_start.is_empty());
        assert!(fg.post_start.is_empty());
        assert_eq!(fg.container_working_dir(), Some("/src/lib/deep".to_string()));

        // original stays untouched
        assert!(service.logging.stdout);
    }

    #[test]
    fn test_foreground_variant_outside_src() {
        let service = Service::new("php");
        let fg = service.foreground_variant(Path::new("/p/src"), Path::new("/elsewhere"));
        assert_eq!(fg.container_working_dir(), Some("/src".to_string()));

        let fg = service.foreground_variant(Path::new("/p/src"), Path::new("/p/src"));
        assert_eq!(fg.container_working_dir(), Some("/src".to_string()));
    }

    #[test]
    fn test_command_line_appends_arguments() {
        let service = Service::new("php").with_command("php worker.php");
        assert_eq!(
            service.command_line(&["--queue".to_string(), "mail jobs".to_string()]),
            Some("php worker.php --queue 'mail jobs'".to_string())
        );
        assert_eq!(service.command_line(&[]), Some("php worker.php".to_string()));
        assert_eq!(Service::new("php").command_line(&["x".to_string()]), None);
    }

    #[test]
    fn test_container_dir_for() {
        let src = Path::new("/p/src");
        assert_eq!(container_dir_for(src, Path::new("/p/src/a/b")), "/src/a/b");
        assert_eq!(container_dir_for(src, Path::new("/p/srcfoo")), "/src");
        assert_eq!(container_dir_for(src, Path::new("/")), "/src");
    }

    #[test]
    fn test_additional_volumes_resolution() {
        let mut service = Service::new("db");
        service.additional_volumes.insert(
            "data".to_string(),
            AdditionalVolume {
                host: "data/mysql".to_string(),
                container: "/var/lib/mysql".to_string(),
                mode: VolumeMode::Rw,
            },
        );
        service.additional_volumes.insert(
            "seed".to_string(),
            AdditionalVolume {
                host: "/opt/seed".to_string(),
                container: "seed".to_string(),
                mode: VolumeMode::Ro,
            },
        );

        let volumes = service.resolved_additional_volumes(Path::new("/p"));
        assert_eq!(
            volumes,
            vec![
                (PathBuf::from("/p/data/mysql"), "/var/lib/mysql".to_string(), VolumeMode::Rw),
                (PathBuf::from("/opt/seed"), "/src/seed".to_string(), VolumeMode::Ro),
            ]
        );
    }

    #[test]
    fn test_role_deserialization_unknown() {
        let roles: Vec<Role> = serde_json::from_str(r#"["src", "varnish"]"#).unwrap();
        assert_eq!(roles, vec![Role::Src, Role::Other]);
    }
}
