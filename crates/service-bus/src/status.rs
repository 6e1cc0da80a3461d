//! Bus status, listeners and the reports the bus hands out.

use std::fmt;

use serde::{Deserialize, Serialize};
use shared_types::ServiceStatus;

/// Aggregate status of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Errored,
}

impl fmt::Display for BusStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "Stopped",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
            Self::Errored => "Errored",
        };
        f.write_str(s)
    }
}

/// Observer of bus status transitions.
///
/// Called synchronously on the task that changes the status. The bus holds
/// listeners weakly.
pub trait BusStatusListener: Send + Sync {
    fn bus_status_changed(&self, status: BusStatus);
}

/// Observer of one service's status reports. Held weakly.
pub trait ServiceStatusObserver: Send + Sync {
    fn service_status_changed(&self, service: &str, status: ServiceStatus);
}

/// Snapshot of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceReport {
    pub name: String,
    pub implementation: String,
    pub registered: bool,
    pub running: bool,
    pub status: ServiceStatus,
    pub dependencies: Vec<String>,
}

/// Outcome of a graceful shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Services that shut down gracefully before the deadline.
    pub completed: Vec<String>,
    /// Services whose graceful shutdown returned an error or panicked.
    pub failed: Vec<String>,
    /// Services still running at the deadline, force-stopped.
    pub forced: Vec<String>,
    /// Whether the transport shut down cleanly.
    pub transport_ok: bool,
}

impl ShutdownReport {
    /// True if anything had to be forced or failed.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.forced.is_empty() || !self.failed.is_empty() || !self.transport_ok
    }
}
