//! Well-known names shared by the engine and its backends.
//!
//! Centralizes the hostnames, container paths, labels and file names used
//! throughout the crate so backends and tests agree on them.

use std::path::{Path, PathBuf};

/// Hostname under which every managed container reaches the host machine,
/// unless overridden through [`crate::config::EngineConfig::host_hostname`].
pub const DEFAULT_HOST_HOSTNAME: &str = "host.devstack.internal";

/// Default prefix for container, network and volume names.
pub const DEFAULT_NAME_PREFIX: &str = "devstack";

/// Project description file name, searched upwards from the working directory.
pub const PROJECT_FILE_NAME: &str = "devstack.toml";

/// Hidden directory for user and local configuration.
pub const DEVSTACK_DIR_NAME: &str = ".devstack";

/// System configuration file name inside [`DEVSTACK_DIR_NAME`].
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// System configuration file name when placed directly in a directory.
pub const LOCAL_CONFIG_FILE_NAME: &str = "devstack.config.toml";

/// Directory inside a project root holding engine-generated state.
pub const PROJECT_STATE_DIR_NAME: &str = "_devstack";

/// Container-side paths
pub mod container {
    /// Mount point of the project source tree for services with role `src`.
    pub const SRC_PATH: &str = "/src";

    /// Mount point of the service log directory when logging is captured.
    pub const LOG_PATH: &str = "/devstack_logs";

    /// Shell used for `exec`, hooks and custom commands.
    pub const SHELL: &str = "sh";
}

/// Labels attached to every container the Docker backend creates
pub mod labels {
    /// Marks a container as managed by this engine.
    pub const MANAGED: &str = "devstack";

    /// Project name the container belongs to.
    pub const PROJECT: &str = "devstack.project";

    /// Service name, for service containers.
    pub const SERVICE: &str = "devstack.service";

    /// Command name, for command containers.
    pub const COMMAND: &str = "devstack.command";
}

/// Performance optimization keys understood by the engines
pub mod performance {
    /// Keep named volumes inside the engine instead of syncing them to the host.
    pub const DONT_SYNC_NAMED_VOLUMES_WITH_HOST: &str = "dont_sync_named_volumes_with_host";

    /// Mount unimportant source paths so container writes stay in the container.
    pub const DONT_SYNC_UNIMPORTANT_SRC: &str = "dont_sync_unimportant_src";
}

/// Build the engine state directory of a project
pub fn project_state_dir_path(project_root: &Path) -> PathBuf {
    project_root.join(PROJECT_STATE_DIR_NAME)
}

/// Build the log directory of one service
pub fn service_log_dir_path(project_root: &Path, service_name: &str) -> PathBuf {
    project_state_dir_path(project_root)
        .join("logs")
        .join(service_name)
}

/// Build config directory path in user's home directory
pub fn user_config_dir_path(home_dir: &Path) -> PathBuf {
    home_dir.join(DEVSTACK_DIR_NAME)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    user_config_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build local config file path in current directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(DEVSTACK_DIR_NAME).join(CONFIG_FILE_NAME)
}
