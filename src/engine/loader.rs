//! Engine backend selection by name.

use super::{Engine, EngineError, MemoryEngine, Result};
use crate::config::EngineConfig;
use std::sync::Arc;
use tracing::debug;

/// Names accepted by [`load_engine`] in this build.
pub fn available_engines() -> &'static [&'static str] {
    #[cfg(feature = "docker")]
    {
        &["docker", "memory"]
    }
    #[cfg(not(feature = "docker"))]
    {
        &["memory"]
    }
}

/// Instantiate the engine backend registered under `name`.
///
/// Connecting to a daemon is lazy for the Docker backend; an unreachable
/// daemon surfaces on the first operation, not here.
pub fn load_engine(name: &str, config: &EngineConfig) -> Result<Arc<dyn Engine>> {
    debug!("Loading engine backend '{}'", name);
    match name {
        #[cfg(feature = "docker")]
        "docker" => Ok(Arc::new(crate::docker::DockerEngine::new(config.clone()))),
        "memory" => Ok(Arc::new(MemoryEngine::with_config(config.clone()))),
        other => Err(EngineError::UnknownEngine(other.to_string())),
    }
}
