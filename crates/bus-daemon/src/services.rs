//! Built-in services.
//!
//! - `svc.echo` stamps each envelope with its own name and sends it on.
//! - `svc.log` logs each envelope it sees and sends it on.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::{Envelope, Service, ServiceContext, ServiceError, ServiceStatus};
use tracing::info;

pub const ECHO_SERVICE: &str = "svc.echo";
pub const LOG_SERVICE: &str = "svc.log";

/// Key the echo service stamps with its registered name.
pub const ECHOED_BY_KEY: &str = "echoedBy";

/// Status shared by the built-in services. Changes are reported to the bus.
struct Lifecycle {
    status: Mutex<ServiceStatus>,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            status: Mutex::new(ServiceStatus::NotInitialized),
        }
    }

    fn set(&self, ctx: &ServiceContext, status: ServiceStatus) {
        *self.status.lock() = status;
        ctx.report_status(status);
    }

    fn get(&self) -> ServiceStatus {
        *self.status.lock()
    }
}

pub struct EchoService {
    ctx: ServiceContext,
    lifecycle: Lifecycle,
}

impl EchoService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self {
            ctx,
            lifecycle: Lifecycle::new(),
        }
    }
}

#[async_trait]
impl Service for EchoService {
    fn name(&self) -> &str {
        self.ctx.name()
    }

    async fn handle_envelope(&self, mut envelope: Envelope) {
        envelope.insert(ECHOED_BY_KEY, self.ctx.name());
        self.ctx.send(envelope).await;
    }

    async fn start(&self) -> Result<(), ServiceError> {
        self.lifecycle.set(&self.ctx, ServiceStatus::Running);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ServiceError> {
        self.lifecycle.set(&self.ctx, ServiceStatus::Shutdown);
        Ok(())
    }

    async fn graceful_shutdown(&self) -> Result<(), ServiceError> {
        self.lifecycle.set(&self.ctx, ServiceStatus::GracefullyShutdown);
        Ok(())
    }

    fn status(&self) -> ServiceStatus {
        self.lifecycle.get()
    }
}

pub struct LogService {
    ctx: ServiceContext,
    lifecycle: Lifecycle,
    seen: AtomicU64,
}

impl LogService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self {
            ctx,
            lifecycle: Lifecycle::new(),
            seen: AtomicU64::new(0),
        }
    }

    /// Envelopes handled since construction.
    pub fn seen(&self) -> u64 {
        self.seen.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Service for LogService {
    fn name(&self) -> &str {
        self.ctx.name()
    }

    async fn handle_envelope(&self, envelope: Envelope) {
        let seen = self.seen.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            service = %self.ctx.name(),
            id = %envelope.id,
            client = ?envelope.client,
            seen,
            "[LogService] Envelope received"
        );
        self.ctx.send(envelope).await;
    }

    async fn start(&self) -> Result<(), ServiceError> {
        self.lifecycle.set(&self.ctx, ServiceStatus::Running);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ServiceError> {
        self.lifecycle.set(&self.ctx, ServiceStatus::Shutdown);
        Ok(())
    }

    async fn graceful_shutdown(&self) -> Result<(), ServiceError> {
        self.lifecycle.set(&self.ctx, ServiceStatus::GracefullyShutdown);
        Ok(())
    }

    fn status(&self) -> ServiceStatus {
        self.lifecycle.get()
    }
}
