//! System configuration and discovery.
//!
//! The system configuration selects the engine backend, carries the
//! performance switches and the engine settings (naming prefix, host bridge
//! hostnames, timeouts). Discovery follows this hierarchy:
//! 1. Current directory: ./devstack.config.toml or ./.devstack/config.toml
//! 2. User config: ~/.devstack/config.toml
//! 3. System config: /etc/devstack/config.toml
//! 4. Built-in defaults

use crate::engine::Engine;
use crate::env;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Host platform, as far as performance defaults are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Mac,
    Linux,
    Unknown,
}

impl Platform {
    /// Platform this binary was compiled for.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::Mac
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Mac => "mac",
            Platform::Linux => "linux",
            Platform::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = std::convert::Infallible;

    /// Unrecognized names map to [`Platform::Unknown`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "windows" => Platform::Windows,
            "mac" | "macos" | "darwin" => Platform::Mac,
            "linux" => Platform::Linux,
            _ => Platform::Unknown,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoKeyword {
    Auto,
}

/// Value of one performance switch: explicitly on/off, or decided by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PerformanceValue {
    Flag(bool),
    Auto(AutoKeyword),
}

impl Default for PerformanceValue {
    fn default() -> Self {
        PerformanceValue::Auto(AutoKeyword::Auto)
    }
}

/// Settings shared by every engine backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Prefix for container, network and volume names
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    /// Hostname resolving to the host machine inside every container
    #[serde(default = "default_host_hostname")]
    pub host_hostname: String,
    /// Further hostnames that must resolve to the host machine
    #[serde(default)]
    pub extra_hostnames: Vec<String>,
    /// Seconds a container gets to stop before it is killed
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout: i64,
    /// Pull images that are missing locally before creating containers
    #[serde(default = "default_auto_pull")]
    pub auto_pull: bool,
    /// Image used for privileged helper containers
    #[serde(default = "default_helper_image")]
    pub helper_image: String,
}

fn default_name_prefix() -> String {
    env::DEFAULT_NAME_PREFIX.to_string()
}

fn default_host_hostname() -> String {
    env::DEFAULT_HOST_HOSTNAME.to_string()
}

fn default_stop_timeout() -> i64 {
    10
}

fn default_auto_pull() -> bool {
    true
}

fn default_helper_image() -> String {
    "alpine:latest".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name_prefix: default_name_prefix(),
            host_hostname: default_host_hostname(),
            extra_hostnames: Vec::new(),
            stop_timeout: default_stop_timeout(),
            auto_pull: default_auto_pull(),
            helper_image: default_helper_image(),
        }
    }
}

impl EngineConfig {
    /// Every hostname that must route to the host, host bridge name first,
    /// without duplicates.
    pub fn host_hostnames(&self) -> Vec<String> {
        let mut names = vec![self.host_hostname.clone()];
        for name in &self.extra_hostnames {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}

/// Main system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Engine backend name, see [`crate::engine::load_engine`]
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default)]
    pub performance: BTreeMap<String, PerformanceValue>,
    #[serde(default)]
    pub engine_settings: EngineConfig,
}

fn default_engine() -> String {
    "docker".to_string()
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            performance: BTreeMap::new(),
            engine_settings: EngineConfig::default(),
        }
    }
}

impl SystemConfig {
    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let config: SystemConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Whether the performance switch `key` is on.
    ///
    /// `auto` (also the value of unset keys) defers to the engine's platform
    /// defaults.
    pub fn performance_enabled(&self, key: &str, engine: &dyn Engine, platform: Platform) -> bool {
        match self.performance.get(key).copied().unwrap_or_default() {
            PerformanceValue::Flag(value) => value,
            PerformanceValue::Auto(_) => engine.performance_value_for_auto(key, platform),
        }
    }
}

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Discover and load configuration using the hierarchy
    pub fn discover_config() -> Result<SystemConfig, Box<dyn std::error::Error>> {
        if let Some(config_path) = Self::find_config_file() {
            info!("Loading configuration from: {:?}", config_path);
            return SystemConfig::from_toml_file(config_path);
        }

        info!("No configuration file found, using defaults");
        Ok(SystemConfig::default())
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        for candidate in Self::get_config_candidates() {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                debug!("Found config file: {:?}", candidate);
                return Some(candidate);
            }
        }

        debug!("No config file found in discovery hierarchy");
        None
    }

    /// Get list of configuration file candidates in priority order
    fn get_config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = std_env::current_dir() {
            candidates.push(current_dir.join(env::LOCAL_CONFIG_FILE_NAME));
            candidates.push(env::local_config_file_path(&current_dir));
        }

        if let Some(home_dir) = Self::get_home_dir() {
            candidates.push(env::user_config_file_path(&home_dir));
        }

        #[cfg(unix)]
        candidates.push(PathBuf::from("/etc/devstack/config.toml"));

        #[cfg(windows)]
        if let Ok(program_data) = std_env::var("PROGRAMDATA") {
            candidates.push(PathBuf::from(program_data).join("devstack").join("config.toml"));
        }

        candidates
    }

    /// Get home directory path
    fn get_home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }
}
