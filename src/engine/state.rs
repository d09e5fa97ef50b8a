use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one service container.
///
/// `start` drives `Stopped | Stopping -> Starting -> Running` and `stop`
/// drives `Running | Starting -> Stopping -> Stopped`. Starting a running
/// service and stopping a stopped one leave the state untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ServiceState {
    /// Whether `status` reports the service as running.
    pub fn is_running(self) -> bool {
        self == ServiceState::Running
    }

    /// State entered when a start is requested; `None` if already running.
    pub fn begin_start(self) -> Option<ServiceState> {
        match self {
            ServiceState::Running => None,
            ServiceState::Stopped | ServiceState::Stopping | ServiceState::Starting => {
                Some(ServiceState::Starting)
            }
        }
    }

    /// State entered when a stop is requested; `None` if already stopped.
    pub fn begin_stop(self) -> Option<ServiceState> {
        match self {
            ServiceState::Stopped => None,
            ServiceState::Running | ServiceState::Starting | ServiceState::Stopping => {
                Some(ServiceState::Stopping)
            }
        }
    }

    /// State after the in-flight transition settled.
    pub fn settle(self) -> ServiceState {
        match self {
            ServiceState::Starting | ServiceState::Running => ServiceState::Running,
            ServiceState::Stopping | ServiceState::Stopped => ServiceState::Stopped,
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Stopped => "stopped",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}
