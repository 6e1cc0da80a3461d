//! # Bus Controller
//!
//! TCP front-end for the service bus: newline-delimited JSON envelopes over
//! a socket, one session per connection.
//!
//! ## Wire Protocol
//!
//! ```text
//! client                                   controller
//!   │ {"id":..,"command":"InitiateComm","client":"C1"}\n │
//!   │ ──────────────────────────────────────────────────→ │ bind C1 ↔ socket
//!   │ ←────────────────────────────────────────────────── │ {"...","values":{"init":true}}
//!   │ {"command":"Send","route":{..},..}\n                 │
//!   │ ──────────────────────────────────────────────────→ │ ServiceBus::dispatch
//!   │ ←────────────────────────────────────────────────── │ end-of-route envelope
//! ```
//!
//! Default port: 2013.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod handler;
mod session;

pub use client::ControlClient;
pub use config::{ControllerConfig, DEFAULT_MAX_CLIENTS, DEFAULT_MAX_LINE_BYTES, DEFAULT_PORT};
pub use controller::BusController;
pub use error::ControllerError;
pub use handler::{INIT_KEY, INTERFACE_NAME_KEY, SERVICE_CLASS_KEY, SERVICE_CONFIG_KEY};
