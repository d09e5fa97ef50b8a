//! # Devstack
//!
//! Engine abstraction and lifecycle protocol for reproducible local
//! development environments. A project declares services and commands; an
//! engine backend realizes them as containers on the developer's machine.
//!
//! ## Architecture Overview
//!
//! - **[`project`]**: project, service and command descriptions loaded from `devstack.toml`
//! - **[`engine`]**: the [`Engine`] contract, its error taxonomy and the backend loader
//! - **[`results`]**: progressive multi-target results of start/stop
//! - **[`path_guard`]**: containment of path operations within a project
//! - **[`config`]**: system configuration and its discovery
//! - **[`docker`]**: Docker/Podman backend (feature `docker`)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use devstack::{EngineConfig, Project, load_engine};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let project = Project::discover(&std::env::current_dir()?)?;
//!     let engine = load_engine("docker", &EngineConfig::default())?;
//!
//!     let mut results = engine.start_project(&project, &["web".to_string()], false)?;
//!     while let Some(step) = results.next().await {
//!         println!("{}: {:?}", step.target, step.message);
//!     }
//!     Ok(())
//! }
//! ```

/// Environment constants and path utilities.
///
/// Centralizes the well-known names shared by the engine, its backends and the
/// configuration layer.
pub mod env;

/// System configuration and configuration file discovery.
pub mod config;

/// Project, service and command descriptions.
pub mod project;

/// Containment of path operations within a project root.
pub mod path_guard;

/// Progressive results of multi-target operations.
pub mod results;

/// Engine contract, errors and backend loading.
pub mod engine;

/// Docker/Podman engine backend.
#[cfg(feature = "docker")]
pub mod docker;

// CLI module for command-line interface
pub mod cli;

pub use config::{ConfigDiscovery, EngineConfig, Platform, PerformanceValue, SystemConfig};
pub use engine::{
    Engine, EngineError, EnginePaths, MemoryEngine, Result, ServiceState, available_engines,
    load_engine,
};
pub use path_guard::{ContainedPath, path_in_project};
pub use project::{Command, CommandKind, Project, ProjectError, Role, Service};
pub use results::{MultiResultQueue, ResultItem, StartStopResultStep, StepStatus};

#[cfg(feature = "docker")]
pub use docker::DockerEngine;
