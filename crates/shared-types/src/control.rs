//! # Control Commands
//!
//! Reserved envelope command values that target the bus or the controller
//! itself rather than application logic.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Control command carried in an envelope's `command` field.
///
/// Serialized by variant name, e.g. `"InitiateComm"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlCommand {
    /// Handshake: binds a client identity to the connection.
    InitiateComm,
    /// Start the bus.
    Start,
    /// Pause the bus.
    Pause,
    /// Resume a paused bus.
    UnPause,
    /// Restart the bus.
    Restart,
    /// Shut the bus down.
    Shutdown,
    /// Shut the bus down gracefully.
    GracefullyShutdown,
    /// Register a service by name.
    RegisterService,
    /// Unregister a service.
    UnregisterService,
    /// Start a registered service.
    StartService,
    /// Pause a service.
    PauseService,
    /// Resume a paused service.
    UnPauseService,
    /// Restart a service.
    RestartService,
    /// Stop a service abruptly.
    StopService,
    /// Stop a service gracefully.
    GracefullyStopService,
    /// Route the envelope as application data.
    Send,
    /// Close the client session.
    CloseClient,
    /// Liveness probe.
    Ack,
    /// End of communication.
    EndComm,
}

impl ControlCommand {
    /// Variant name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitiateComm => "InitiateComm",
            Self::Start => "Start",
            Self::Pause => "Pause",
            Self::UnPause => "UnPause",
            Self::Restart => "Restart",
            Self::Shutdown => "Shutdown",
            Self::GracefullyShutdown => "GracefullyShutdown",
            Self::RegisterService => "RegisterService",
            Self::UnregisterService => "UnregisterService",
            Self::StartService => "StartService",
            Self::PauseService => "PauseService",
            Self::UnPauseService => "UnPauseService",
            Self::RestartService => "RestartService",
            Self::StopService => "StopService",
            Self::GracefullyStopService => "GracefullyStopService",
            Self::Send => "Send",
            Self::CloseClient => "CloseClient",
            Self::Ack => "Ack",
            Self::EndComm => "EndComm",
        }
    }

    /// Declared on the wire but without defined semantics. The controller
    /// answers these with a "not supported" response.
    pub fn is_reserved(&self) -> bool {
        matches!(
            self,
            Self::Pause
                | Self::UnPause
                | Self::Restart
                | Self::Shutdown
                | Self::GracefullyShutdown
                | Self::UnregisterService
                | Self::PauseService
                | Self::UnPauseService
                | Self::RestartService
                | Self::EndComm
        )
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
