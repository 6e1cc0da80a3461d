//! # Service Bus
//!
//! In-process registry, lifecycle supervisor and router for pluggable
//! services.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        ServiceBus                          │
//! │                                                            │
//! │  ServiceCatalog ──→ registry ──→ start/stop workers        │
//! │        (factories)     │                                   │
//! │                        ▼                                   │
//! │  send() ──→ routing passes ──→ MessageBus (shared-bus)     │
//! │                 │                                          │
//! │                 ├──→ ClientRouter (end of route + client)  │
//! │                 └──→ DeadLetterSink (undeliverable)        │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! let bus = ServiceBus::with_catalog(catalog);
//! bus.start(Properties::new()).await?;
//! bus.register_default("svc.echo", Properties::new())?;
//! bus.start_service("svc.echo");
//! bus.send(Envelope::document().with_route(Route::new("svc.echo", "echo"))).await;
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod bus;
pub mod catalog;
pub mod config;
pub mod dead_letter;
pub mod errors;
pub mod status;

pub use bus::{ClientRouter, DispatchOutcome, ServiceBus};
pub use catalog::ServiceCatalog;
pub use config::{BusConfig, ConfigError, DeadLetterConfig};
pub use dead_letter::DeadLetterSink;
pub use errors::{BusError, RegistrationError};
pub use status::{
    BusStatus, BusStatusListener, ServiceReport, ServiceStatusObserver, ShutdownReport,
};
