use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Per-container locks serializing start and stop transitions.
///
/// Concurrent requests for the same container wait for each other; requests
/// for different containers never contend.
#[derive(Debug, Clone, Default)]
pub struct TransitionLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl TransitionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to the container `name`.
    pub async fn acquire(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        debug!("Waiting for transition lock on {}", name);
        lock.lock_owned().await
    }
}
