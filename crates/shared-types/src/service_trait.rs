//! # Service Trait - Lifecycle Contract
//!
//! Defines the contract that every component registered with the service bus
//! must implement. The bus consumes this surface; it never owns a service's
//! internals.
//!
//! ## Example Implementation
//!
//! ```rust,ignore
//! use shared_types::{Envelope, Service, ServiceContext, ServiceError, ServiceStatus};
//! use async_trait::async_trait;
//!
//! pub struct EchoService { ctx: ServiceContext }
//!
//! #[async_trait]
//! impl Service for EchoService {
//!     fn name(&self) -> &str { self.ctx.name() }
//!     async fn handle_envelope(&self, envelope: Envelope) { self.ctx.send(envelope).await; }
//!     async fn start(&self) -> Result<(), ServiceError> { Ok(()) }
//!     async fn shutdown(&self) -> Result<(), ServiceError> { Ok(()) }
//!     fn status(&self) -> ServiceStatus { ServiceStatus::Running }
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::envelope::Envelope;

/// String-keyed configuration handed to buses and services.
pub type Properties = BTreeMap<String, String>;

/// Error type for service operations.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("[{service}] {kind}: {message}")]
pub struct ServiceError {
    /// The service that encountered the error.
    pub service: String,
    /// Error kind.
    pub kind: ServiceErrorKind,
    /// Human-readable error message.
    pub message: String,
}

impl ServiceError {
    pub fn new(
        service: impl Into<String>,
        kind: ServiceErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            kind,
            message: message.into(),
        }
    }

    /// The operation is not implemented by this service.
    pub fn not_supported(service: impl Into<String>, operation: &str) -> Self {
        Self::new(
            service,
            ServiceErrorKind::NotSupported,
            format!("{} not supported", operation),
        )
    }
}

/// Categories of service errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceErrorKind {
    /// Construction is forbidden (access restriction).
    AccessDenied,
    /// Construction or the requested operation is not possible.
    NotSupported,
    /// Service failed to initialize.
    InitializationFailed,
    /// Service encountered a runtime error.
    RuntimeError,
    /// Service failed to shut down.
    ShutdownFailed,
    /// Configuration error.
    ConfigurationError,
}

impl fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccessDenied => write!(f, "AccessDenied"),
            Self::NotSupported => write!(f, "NotSupported"),
            Self::InitializationFailed => write!(f, "InitializationFailed"),
            Self::RuntimeError => write!(f, "RuntimeError"),
            Self::ShutdownFailed => write!(f, "ShutdownFailed"),
            Self::ConfigurationError => write!(f, "ConfigurationError"),
        }
    }
}

/// Lifecycle status a service reports to the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceStatus {
    /// Constructed, never started.
    NotInitialized,
    /// Preparing resources.
    Initializing,
    /// Starting up.
    Starting,
    /// Running normally.
    Running,
    /// Paused.
    Paused,
    /// Running but misbehaving. The bus restarts it.
    Unstable,
    /// Shutting down.
    Stopping,
    /// Shut down abruptly.
    Shutdown,
    /// Shut down after draining.
    GracefullyShutdown,
    /// Failed.
    Error,
}

/// The bus-facing side of a service's context.
///
/// Implemented by the service bus. Implementations must not keep the bus
/// alive on behalf of a service.
#[async_trait]
pub trait EnvelopeProducer: Send + Sync {
    /// Dispatch an envelope onward. Returns false if it could not be routed.
    async fn send(&self, envelope: Envelope) -> bool;

    /// Persist an envelope that cannot be routed further.
    fn dead_letter(&self, envelope: Envelope);

    /// Report a status change for `service`.
    fn report_status(&self, service: &str, status: ServiceStatus);
}

/// Everything a service receives from the bus at construction.
#[derive(Clone)]
pub struct ServiceContext {
    name: String,
    config: Properties,
    producer: Arc<dyn EnvelopeProducer>,
}

impl ServiceContext {
    pub fn new(
        name: impl Into<String>,
        config: Properties,
        producer: Arc<dyn EnvelopeProducer>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            producer,
        }
    }

    /// Name the service is registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Service configuration.
    pub fn config(&self) -> &Properties {
        &self.config
    }

    /// Send an envelope back through the bus for its next hop.
    pub async fn send(&self, envelope: Envelope) -> bool {
        self.producer.send(envelope).await
    }

    /// Hand an envelope to the dead-letter sink.
    pub fn dead_letter(&self, envelope: Envelope) {
        self.producer.dead_letter(envelope);
    }

    /// Report this service's status to the bus.
    pub fn report_status(&self, status: ServiceStatus) {
        self.producer.report_status(&self.name, status);
    }
}

impl fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContext")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// The core trait that every service must implement.
///
/// Lifecycle calls arrive on short-lived worker tasks. Callers must not
/// issue overlapping lifecycle calls for the same service.
#[async_trait]
pub trait Service: Send + Sync {
    /// Name the service is registered under.
    fn name(&self) -> &str;

    /// Names of services that must be registered before this one.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Receive an envelope routed to this service.
    async fn handle_envelope(&self, envelope: Envelope);

    /// Start the service.
    async fn start(&self) -> Result<(), ServiceError>;

    /// Pause processing.
    async fn pause(&self) -> Result<(), ServiceError> {
        Err(ServiceError::not_supported(self.name(), "pause"))
    }

    /// Resume processing.
    async fn unpause(&self) -> Result<(), ServiceError> {
        Err(ServiceError::not_supported(self.name(), "unpause"))
    }

    /// Restart the service. Defaults to shutdown followed by start.
    async fn restart(&self) -> Result<(), ServiceError> {
        self.shutdown().await?;
        self.start().await
    }

    /// Stop immediately.
    async fn shutdown(&self) -> Result<(), ServiceError>;

    /// Stop after finishing in-flight work. Defaults to `shutdown`.
    async fn graceful_shutdown(&self) -> Result<(), ServiceError> {
        self.shutdown().await
    }

    /// Current status.
    fn status(&self) -> ServiceStatus;
}

/// A type-erased service handle for the registry.
pub type DynService = Arc<dyn Service>;

/// Factory function for creating services by name.
///
/// Return an error of kind [`ServiceErrorKind::AccessDenied`] when
/// construction is forbidden; any other error means the service is not
/// supported.
pub type ServiceFactory =
    Arc<dyn Fn(ServiceContext) -> Result<DynService, ServiceError> + Send + Sync>;
