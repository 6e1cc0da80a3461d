//! # Bus Daemon
//!
//! Composition root for a standalone Service Bus.
//!
//! ## Startup Sequence
//!
//! 1. Initialize logging (`SB_LOG` / `RUST_LOG`, default `info`)
//! 2. Load `BusConfig` and `ControllerConfig` from the environment
//! 3. Build the service catalog and transport registry
//! 4. Start the bus, then the TCP controller
//!
//! Shutdown runs in reverse: the controller closes its sessions, then the bus
//! shuts down gracefully and reports what it had to force.

pub mod services;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use bus_controller::{BusController, ControllerConfig};
use service_bus::{BusConfig, ServiceBus, ServiceCatalog, ShutdownReport};
use shared_bus::TransportRegistry;
use shared_types::{DynService, Properties};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::services::{EchoService, LogService, ECHO_SERVICE, LOG_SERVICE};

/// Catalog of the services this daemon can instantiate.
pub fn catalog() -> ServiceCatalog {
    ServiceCatalog::new()
        .with(ECHO_SERVICE, |ctx| {
            Ok(Arc::new(EchoService::new(ctx)) as DynService)
        })
        .with(LOG_SERVICE, |ctx| Ok(Arc::new(LogService::new(ctx)) as DynService))
}

/// Install the global fmt subscriber.
pub fn init_tracing() -> Result<()> {
    let filter = std::env::var("SB_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;
    Ok(())
}

/// A running bus and its controller.
pub struct Daemon {
    bus: ServiceBus,
    controller: BusController,
}

impl Daemon {
    /// Start the bus with the built-in catalog, then the controller.
    pub async fn start(bus_config: BusConfig, controller_config: ControllerConfig) -> Result<Self> {
        let bus = ServiceBus::new(catalog(), TransportRegistry::with_defaults(), bus_config);
        bus.start(Properties::new())
            .await
            .context("service bus failed to start")?;

        let controller = match BusController::start(bus.clone(), controller_config).await {
            Ok(controller) => controller,
            Err(e) => {
                if let Err(stop) = bus.shutdown().await {
                    warn!(error = %stop, "[Daemon] Bus shutdown after failed controller start");
                }
                return Err(e).context("bus controller failed to start");
            }
        };
        info!(addr = %controller.local_addr(), "[Daemon] Ready");
        Ok(Self { bus, controller })
    }

    pub fn bus(&self) -> &ServiceBus {
        &self.bus
    }

    /// Address the controller listens on.
    pub fn control_addr(&self) -> SocketAddr {
        self.controller.local_addr()
    }

    /// Close the controller, then shut the bus down gracefully.
    pub async fn shutdown(self) -> Result<ShutdownReport> {
        self.controller.shutdown().await;
        let report = self
            .bus
            .graceful_shutdown()
            .await
            .context("graceful shutdown refused")?;
        if report.is_degraded() {
            warn!(
                forced = ?report.forced,
                failed = ?report.failed,
                transport_ok = report.transport_ok,
                "[Daemon] Shutdown degraded"
            );
        } else {
            info!(completed = report.completed.len(), "[Daemon] Shutdown complete");
        }
        Ok(report)
    }
}
