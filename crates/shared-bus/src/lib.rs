//! # Shared Bus - Transport for Inter-Service Communication
//!
//! The boundary between the service bus and whatever carries envelopes
//! between services.
//!
//! ## Choreography
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │ Service Bus  │                    │  Service B   │
//! │              │  publish("B")      │              │
//! │              │ ──────┐            │              │
//! └──────────────┘       │            └──────────────┘
//!                        ▼                    ↑
//!                  ┌──────────────┐          │
//!                  │  MessageBus  │          │
//!                  │  (channel B) │ ─────────┘
//!                  └──────────────┘  consume()
//! ```
//!
//! - **One channel per service**, named after it.
//! - **One consumer per channel**, fed in publish order.
//! - **Pluggable**: transports are looked up by name in a
//!   [`TransportRegistry`]; `"staged"` is built in.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod registry;
pub mod staged;
pub mod transport;

pub use registry::{TransportConstructor, TransportRegistry, DEFAULT_TRANSPORT};
pub use staged::StagedEventBus;
pub use transport::{EnvelopeConsumer, MessageBus, TransportError};

/// Maximum envelopes queued per channel before publishes are refused.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
