//! # Engine Abstraction and Lifecycle Protocol
//!
//! [`Engine`] is the contract every container engine backend implements to
//! realize a project's services and commands on the developer's machine.
//!
//! ## Guarantees every backend provides
//!
//! - All containers started for a project share one isolated network in which
//!   services and commands resolve each other by name.
//! - Containers also join the networks of every project in the project's
//!   `links`, so linked projects reach each other by name in both directions.
//! - The host bridge hostname and every extra hostname from
//!   [`EngineConfig`](crate::config::EngineConfig) resolve to the host machine
//!   from inside every container.
//! - Starting a running service and stopping a stopped one are idempotent and
//!   report terminal success.
//! - Path operations only ever touch paths inside the project root. The check
//!   lives in [`EnginePaths`], implemented for every engine; backends only
//!   supply the mechanics through [`Engine::remove_contained`] /
//!   [`Engine::copy_into_contained`], which take a [`ContainedPath`].
//!
//! ## Error split
//!
//! Queries answer "unknown" with an absent value ([`Engine::address_for`]
//! returns `None` for a stopped service) while actions that cannot proceed
//! fail with a typed [`EngineError`]. Multi-target operations never fail as a
//! whole once started: each target's failure is carried by its terminal
//! [`StartStopResultStep`].

pub mod loader;
mod locks;
pub mod memory;
pub mod naming;
mod state;

pub use loader::{available_engines, load_engine};
pub use locks::TransitionLocks;
pub use memory::MemoryEngine;
pub use state::ServiceState;

use crate::config::{Platform, SystemConfig};
use crate::env;
use crate::path_guard::{self, ContainedPath};
use crate::project::{Command, CommandKind, Project, ProjectError, Service};
use crate::results::{MultiResultQueue, StartStopResultStep};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Engine errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A service or command name does not exist in the project
    #[error("{kind} '{name}' not found in project '{project}'")]
    NotFound {
        kind: &'static str,
        name: String,
        project: String,
    },

    /// The operation needs a running service container
    #[error("Service '{service}' of project '{project}' is not running")]
    ServiceNotRunning { service: String, project: String },

    /// A path operation targets something outside the project
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Copy destination already exists
    #[error("Destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    /// The backend failed for reasons outside this taxonomy
    #[error("Backend error: {0}")]
    Backend(String),

    /// Invalid configuration or project description
    #[error("Configuration error: {0}")]
    Config(String),

    /// No engine registered under this name
    #[error("Unknown engine '{0}'")]
    UnknownEngine(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Docker/Podman API error
    #[cfg(feature = "docker")]
    #[error("Container API error: {0}")]
    Api(#[from] bollard::errors::Error),
}

impl EngineError {
    pub fn service_not_found(project: &Project, name: &str) -> Self {
        EngineError::NotFound {
            kind: "Service",
            name: name.to_string(),
            project: project.name.clone(),
        }
    }

    pub fn command_not_found(project: &Project, name: &str) -> Self {
        EngineError::NotFound {
            kind: "Command",
            name: name.to_string(),
            project: project.name.clone(),
        }
    }

    pub fn not_running(project: &Project, service: &str) -> Self {
        EngineError::ServiceNotRunning {
            service: service.to_string(),
            project: project.name.clone(),
        }
    }

    /// Whether this is a failure of the underlying engine rather than of the
    /// request.
    pub fn is_backend(&self) -> bool {
        #[cfg(feature = "docker")]
        if matches!(self, EngineError::Api(_)) {
            return true;
        }
        matches!(self, EngineError::Backend(_) | EngineError::Io(_))
    }
}

impl From<ProjectError> for EngineError {
    fn from(e: ProjectError) -> Self {
        EngineError::Config(e.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Callback receiving pull progress text. Calls never imply a line break.
pub type UpdateFn<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Look up a service or fail with [`EngineError::NotFound`].
pub fn require_service<'p>(project: &'p Project, name: &str) -> Result<&'p Service> {
    project
        .service(name)
        .ok_or_else(|| EngineError::service_not_found(project, name))
}

/// Look up every named service, failing on the first unknown name.
pub fn require_services(project: &Project, names: &[String]) -> Result<()> {
    for name in names {
        require_service(project, name)?;
    }
    Ok(())
}

/// Look up a command runnable through [`Engine::cmd`]: it must exist and be a
/// normal command.
pub fn require_normal_command<'p>(project: &'p Project, name: &str) -> Result<&'p Command> {
    match project.command(name) {
        Some(command) if command.kind() == CommandKind::Normal => Ok(command),
        _ => Err(EngineError::command_not_found(project, name)),
    }
}

/// Handle of the runtime the start/stop tasks are spawned on.
pub(crate) fn runtime_handle() -> Result<tokio::runtime::Handle> {
    tokio::runtime::Handle::try_current()
        .map_err(|e| EngineError::Backend(format!("no async runtime available: {e}")))
}

/// Platform defaults for performance switches set to `auto`.
///
/// Both switches are on where containers run in a VM (Mac, Windows) and off
/// elsewhere. Unknown keys are off.
pub fn default_performance_for_auto(key: &str, platform: Platform) -> bool {
    match key {
        env::performance::DONT_SYNC_NAMED_VOLUMES_WITH_HOST
        | env::performance::DONT_SYNC_UNIMPORTANT_SRC => {
            matches!(platform, Platform::Mac | Platform::Windows)
        }
        _ => false,
    }
}

/// Container engine backend.
///
/// `start_project` / `stop_project` return at once with a queue that is fed
/// by tasks on the current tokio runtime; they must be called from within a
/// runtime. Every blocking operation is `async` and only occupies the calling
/// task.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Backend name as accepted by [`load_engine`].
    fn name(&self) -> &'static str;

    /// Start the named services.
    ///
    /// Fails with [`EngineError::NotFound`] before anything starts if a name is
    /// unknown. Otherwise the queue yields one terminal result per service.
    /// With `unimportant_paths_unsynced`, the unimportant paths of `src`
    /// services are mounted so container writes stay in the container.
    fn start_project(
        &self,
        project: &Project,
        services: &[String],
        unimportant_paths_unsynced: bool,
    ) -> Result<MultiResultQueue<StartStopResultStep>>;

    /// Stop the named services. Stopping a stopped service succeeds.
    fn stop_project(
        &self,
        project: &Project,
        services: &[String],
    ) -> Result<MultiResultQueue<StartStopResultStep>>;

    /// Running state of every declared service, as observed from the engine.
    async fn status(
        &self,
        project: &Project,
        system_config: &SystemConfig,
    ) -> Result<BTreeMap<String, bool>>;

    /// Running state of one service.
    async fn service_status(
        &self,
        project: &Project,
        service_name: &str,
        system_config: &SystemConfig,
    ) -> Result<bool>;

    /// Backend identifier of a service's container; stable and collision-free.
    fn container_name_for(&self, project: &Project, service_name: &str) -> String;

    /// Host and port under which a running service is reachable.
    ///
    /// `None` when the service is not running or exposes no port.
    async fn address_for(
        &self,
        project: &Project,
        service_name: &str,
    ) -> Result<Option<(String, u16)>>;

    /// Run a normal command attached to the caller's standard streams and
    /// return its exit code.
    async fn cmd(
        &self,
        project: &Project,
        command_name: &str,
        arguments: &[String],
        unimportant_paths_unsynced: bool,
    ) -> Result<i64>;

    /// Run a command inside a running service's container, attached to the
    /// caller's standard streams. Accepts normal and in-service commands.
    async fn cmd_in_service(
        &self,
        project: &Project,
        command_name: &str,
        service_name: &str,
        arguments: &[String],
    ) -> Result<i64>;

    /// Run a service in the foreground until its container exits, with the
    /// overrides of [`Service::foreground_variant`].
    async fn service_fg(
        &self,
        project: &Project,
        service_name: &str,
        arguments: &[String],
        unimportant_paths_unsynced: bool,
    ) -> Result<()>;

    /// Run an ad-hoc command without attached streams and without the source
    /// mount; return the exit code and the combined output.
    async fn cmd_detached(
        &self,
        project: &Project,
        command: &Command,
        run_as_root: bool,
    ) -> Result<(i64, String)>;

    /// Open an interactive shell in a running service.
    async fn exec(
        &self,
        project: &Project,
        service_name: &str,
        cols: Option<u16>,
        lines: Option<u16>,
        root: bool,
    ) -> Result<()>;

    /// Run one command string through a shell in a running service.
    async fn exec_custom(
        &self,
        project: &Project,
        service_name: &str,
        command: &str,
        cols: Option<u16>,
        lines: Option<u16>,
        root: bool,
    ) -> Result<()>;

    /// Fetch the latest version of every image the project references.
    ///
    /// Missing images are reported through `update_func` as a warning and do
    /// not fail the call. `line_reset` redraws the current line.
    async fn pull_images(
        &self,
        project: &Project,
        line_reset: &str,
        update_func: UpdateFn<'_>,
    ) -> Result<()>;

    /// Removal mechanics behind [`EnginePaths::path_rm`].
    async fn remove_contained(&self, path: &ContainedPath) -> Result<()> {
        path_guard::remove(path)
    }

    /// Copy mechanics behind [`EnginePaths::path_copy`].
    async fn copy_into_contained(&self, from: &Path, to: &ContainedPath) -> Result<()> {
        path_guard::copy(from, to)
    }

    /// Whether the performance switch `key` defaults to on for `platform`.
    fn performance_value_for_auto(&self, key: &str, platform: Platform) -> bool;
}

/// Path operations confined to a project root.
///
/// Implemented once for every [`Engine`], including `dyn Engine`. The
/// containment check runs before the backend's mechanics are reached.
#[async_trait]
pub trait EnginePaths {
    /// Delete a file or directory tree inside the project.
    ///
    /// Fails with [`EngineError::Permission`] for paths outside the project.
    /// Succeeds if nothing exists at `path` afterwards.
    async fn path_rm(&self, path: &Path, project: &Project) -> Result<()>;

    /// Copy a file or directory tree to `to` inside the project. `to` must not
    /// exist.
    async fn path_copy(&self, from: &Path, to: &Path, project: &Project) -> Result<()>;
}

#[async_trait]
impl<E: Engine + ?Sized> EnginePaths for E {
    async fn path_rm(&self, path: &Path, project: &Project) -> Result<()> {
        let contained = path_guard::contain(path, project)?;
        self.remove_contained(&contained).await
    }

    async fn path_copy(&self, from: &Path, to: &Path, project: &Project) -> Result<()> {
        let contained = path_guard::contain(to, project)?;
        self.copy_into_contained(from, &contained).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Role;

    fn project() -> Project {
        Project::new("p", "/p")
            .with_service("web", Service::new("nginx"))
            .with_command("npm", Command::new("node", "npm"))
            .with_command("console", Command::in_service(Role::Main, "console"))
    }

    #[test]
    fn test_require_service() {
        let project = project();
        assert!(require_service(&project, "web").is_ok());
        let err = require_service(&project, "db").unwrap_err();
        assert!(matches!(err, EngineError::NotFound { kind: "Service", .. }));
        assert_eq!(err.to_string(), "Service 'db' not found in project 'p'");
    }

    #[test]
    fn test_require_services_stops_at_unknown() {
        let project = project();
        assert!(require_services(&project, &["web".to_string()]).is_ok());
        assert!(require_services(&project, &["web".to_string(), "x".to_string()]).is_err());
    }

    #[test]
    fn test_require_normal_command() {
        let project = project();
        assert!(require_normal_command(&project, "npm").is_ok());
        assert!(matches!(
            require_normal_command(&project, "console"),
            Err(EngineError::NotFound { kind: "Command", .. })
        ));
        assert!(require_normal_command(&project, "missing").is_err());
    }

    #[test]
    fn test_performance_defaults() {
        let key = env::performance::DONT_SYNC_UNIMPORTANT_SRC;
        assert!(default_performance_for_auto(key, Platform::Mac));
        assert!(default_performance_for_auto(key, Platform::Windows));
        assert!(!default_performance_for_auto(key, Platform::Linux));
        assert!(!default_performance_for_auto(key, Platform::Unknown));
        assert!(!default_performance_for_auto("made_up_key", Platform::Mac));
    }

    #[test]
    fn test_error_classification() {
        assert!(EngineError::Backend("daemon down".to_string()).is_backend());
        assert!(!EngineError::Permission("x".to_string()).is_backend());
        assert!(!EngineError::not_running(&project(), "web").is_backend());
    }
}
