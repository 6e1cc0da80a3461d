//! Error types for the service bus.

use shared_bus::TransportError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::status::BusStatus;

/// Why a service could not be registered.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// The factory refused construction.
    #[error("Service {implementation} is not accessible: {message}")]
    NotAccessible {
        implementation: String,
        message: String,
    },

    /// Construction failed for any other reason.
    #[error("Service {implementation} is not supported: {message}")]
    NotSupported {
        implementation: String,
        message: String,
    },

    /// No factory is registered under this implementation name.
    #[error("Unknown implementation: {0}")]
    UnknownImplementation(String),

    /// A dependency reappeared on the registration chain.
    #[error("Dependency cycle: {}", chain.join(" -> "))]
    DependencyCycle { chain: Vec<String> },

    /// The bus has not been started.
    #[error("Bus is not running")]
    BusNotRunning,

    /// The transport would not create the service's channel.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl RegistrationError {
    /// Stable name used in control-protocol responses.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::NotAccessible { .. } => "ServiceNotAccessible",
            Self::NotSupported { .. } => "ServiceNotSupported",
            Self::UnknownImplementation(_) => "UnknownImplementation",
            Self::DependencyCycle { .. } => "DependencyCycle",
            Self::BusNotRunning => "BusNotRunning",
            Self::Transport(_) => "TransportError",
        }
    }
}

/// Bus lifecycle errors.
#[derive(Debug, Error)]
pub enum BusError {
    /// The operation is not valid in the current bus status.
    #[error("Invalid bus state: {0}")]
    InvalidState(BusStatus),

    /// Configuration could not be applied.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The dead-letter file could not be prepared.
    #[error("Dead letter sink error: {0}")]
    DeadLetter(#[from] std::io::Error),

    /// The transport could not be created or started.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The transport reported a failed shutdown.
    #[error("Transport shutdown failed")]
    TransportShutdownFailed,

    /// The operation is declared but has no semantics.
    #[error("{0} not supported")]
    NotSupported(&'static str),
}
