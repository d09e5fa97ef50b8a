//! Declarative project descriptions.
//!
//! A project is a root directory plus a set of named services and commands and
//! a list of linked projects whose networks its containers must share. Projects
//! are loaded from a `devstack.toml` file; the directory containing that file
//! is the project root and the sole boundary for path-scoped operations.
//!
//! ```toml
//! name = "shop"
//! src = "."
//! links = ["payments"]
//!
//! [services.web]
//! image = "nginx:alpine"
//! roles = ["src", "main"]
//! port = 80
//!
//! [commands.npm]
//! image = "node:20"
//! command = "npm"
//! ```

pub mod command;
pub mod service;

pub use command::{Command, CommandKind};
pub(crate) use command::append_arguments;
pub use service::{AdditionalVolume, Logging, Role, Service, VolumeMode, container_dir_for};

use crate::env;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

/// Errors raised while loading or validating a project description.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    /// File could not be read
    #[error("Failed to read project file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML for a project
    #[error("Invalid project file: {0}")]
    Parse(#[from] toml::de::Error),

    /// No project file between the start directory and the filesystem root
    #[error("No {} found in {} or any parent directory", env::PROJECT_FILE_NAME, .0.display())]
    NotFound(PathBuf),

    /// Semantically invalid description
    #[error("Invalid project '{project}': {reason}")]
    Invalid { project: String, reason: String },
}

/// A project description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Project name, unique per machine; part of every resource name
    pub name: String,
    /// Project root directory, set when loading
    #[serde(skip)]
    pub root: PathBuf,
    /// Source tree, relative to the root
    #[serde(default = "default_src")]
    pub src: PathBuf,
    /// Names of projects whose networks this project's containers join
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub services: BTreeMap<String, Service>,
    #[serde(default)]
    pub commands: BTreeMap<String, Command>,
}

fn default_src() -> PathBuf {
    PathBuf::from(".")
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").expect("valid regex"))
}

impl Project {
    /// Create an empty project rooted at `root`.
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            src: default_src(),
            links: Vec::new(),
            services: BTreeMap::new(),
            commands: BTreeMap::new(),
        }
    }

    pub fn with_service(mut self, name: impl Into<String>, service: Service) -> Self {
        self.services.insert(name.into(), service);
        self
    }

    pub fn with_command(mut self, name: impl Into<String>, command: Command) -> Self {
        self.commands.insert(name.into(), command);
        self
    }

    pub fn with_link(mut self, project_name: impl Into<String>) -> Self {
        self.links.push(project_name.into());
        self
    }

    /// Parse a project description and validate it.
    pub fn from_toml_str(content: &str, root: impl Into<PathBuf>) -> Result<Self, ProjectError> {
        let mut project: Project = toml::from_str(content)?;
        project.root = root.into();
        project.validate()?;
        Ok(project)
    }

    /// Load a project file; its parent directory becomes the project root.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ProjectError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ProjectError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        debug!("Loading project from {:?} (root {:?})", path, root);
        Self::from_toml_str(&content, root)
    }

    /// Find the nearest project file at or above `start` and load it.
    pub fn discover(start: &Path) -> Result<Self, ProjectError> {
        for dir in start.ancestors() {
            let candidate = dir.join(env::PROJECT_FILE_NAME);
            if candidate.is_file() {
                return Self::from_toml_file(candidate);
            }
        }
        Err(ProjectError::NotFound(start.to_path_buf()))
    }

    /// Check names and required fields.
    pub fn validate(&self) -> Result<(), ProjectError> {
        let invalid = |reason: String| ProjectError::Invalid {
            project: self.name.clone(),
            reason,
        };

        if !name_pattern().is_match(&self.name) {
            return Err(invalid(format!("'{}' is not a valid project name", self.name)));
        }
        for (name, service) in &self.services {
            if !name_pattern().is_match(name) {
                return Err(invalid(format!("'{}' is not a valid service name", name)));
            }
            if service.image.trim().is_empty() {
                return Err(invalid(format!("service '{}' has no image", name)));
            }
        }
        for (name, command) in &self.commands {
            if !name_pattern().is_match(name) {
                return Err(invalid(format!("'{}' is not a valid command name", name)));
            }
            if command.kind() == CommandKind::Normal && command.image.is_none() {
                return Err(invalid(format!("command '{}' has no image", name)));
            }
        }
        if self.links.iter().any(|l| l == &self.name) {
            return Err(invalid("a project cannot link to itself".to_string()));
        }
        Ok(())
    }

    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.get(name)
    }

    pub fn command(&self, name: &str) -> Option<&Command> {
        self.commands.get(name)
    }

    /// Absolute path of the source tree on the host.
    pub fn src_path(&self) -> PathBuf {
        if self.src == Path::new(".") {
            self.root.clone()
        } else {
            self.root.join(&self.src)
        }
    }

    /// First service carrying `role`, by name order.
    pub fn service_with_role(&self, role: &Role) -> Option<(&str, &Service)> {
        self.services
            .iter()
            .find(|(_, s)| s.has_role(role))
            .map(|(n, s)| (n.as_str(), s))
    }

    /// Every image referenced by a service or command, labelled `service/<name>`
    /// or `command/<name>`, in declaration-name order.
    pub fn images(&self) -> Vec<(String, String)> {
        let services = self
            .services
            .iter()
            .map(|(n, s)| (format!("service/{}", n), s.image.clone()));
        let commands = self
            .commands
            .iter()
            .filter_map(|(n, c)| c.image.clone().map(|i| (format!("command/{}", n), i)));
        services.chain(commands).collect()
    }
}
