//! # Shared Types Crate
//!
//! Data model shared by every crate of the service bus: the [`Envelope`],
//! its routing model, the control command vocabulary, and the [`Service`]
//! lifecycle contract.
//!
//! ## Design Principles
//!
//! - **Pure data**: no I/O lives here.
//! - **Control vs. data**: an envelope carrying a [`ControlCommand`] targets
//!   the bus itself and is never delivered to a service as payload.
//! - **One wire form**: envelopes travel as single-line JSON objects.

pub mod control;
pub mod envelope;
pub mod routing;
pub mod service_trait;

pub use control::ControlCommand;
pub use envelope::{Envelope, CONTENT_KEY};
pub use routing::{DynamicRoutingSlip, InvalidSlip, Route, RouteStep};
pub use service_trait::{
    DynService, EnvelopeProducer, Properties, Service, ServiceContext, ServiceError,
    ServiceErrorKind, ServiceFactory, ServiceStatus,
};
