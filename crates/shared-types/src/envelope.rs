//! # Envelope
//!
//! The routable unit of data exchanged between services, clients and the bus.
//!
//! ## Properties
//!
//! - **Identity**: every envelope carries a fresh UUID.
//! - **Control vs. data**: an envelope with a `command` is a bus control
//!   request and is never delivered to a service as data.
//! - **Routing**: an optional single [`Route`] and an optional
//!   [`DynamicRoutingSlip`]; the single route takes precedence.
//! - **Wire form**: one JSON object per line, camelCase keys.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::control::ControlCommand;
use crate::routing::{DynamicRoutingSlip, Route, RouteStep};

/// Key under which a control command's primary response value is stored.
pub const CONTENT_KEY: &str = "content";

/// The routable message unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Unique per envelope.
    pub id: Uuid,

    /// Present when this envelope is a bus control request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<ControlCommand>,

    /// Client identity this envelope belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,

    /// Typed key/value payload.
    #[serde(default)]
    pub values: BTreeMap<String, Value>,

    /// Single-hop route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,

    /// Multi-hop routing slip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slip: Option<DynamicRoutingSlip>,

    /// Error messages, in the order they were added.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl Envelope {
    /// A plain data envelope.
    pub fn document() -> Self {
        Self {
            id: Uuid::new_v4(),
            command: None,
            client: None,
            values: BTreeMap::new(),
            route: None,
            slip: None,
            errors: Vec::new(),
        }
    }

    /// A control request.
    pub fn command(command: ControlCommand) -> Self {
        Self {
            command: Some(command),
            ..Self::document()
        }
    }

    /// True if this envelope is a control request.
    pub fn is_control(&self) -> bool {
        self.command.is_some()
    }

    /// Set the client identity.
    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    /// Set the single-hop route.
    pub fn with_route(mut self, route: Route) -> Self {
        self.route = Some(route);
        self
    }

    /// Set the routing slip.
    pub fn with_slip(mut self, slip: DynamicRoutingSlip) -> Self {
        self.slip = Some(slip);
        self
    }

    /// Store a value under `key`, replacing any previous one.
    ///
    /// Values that cannot be represented as JSON are stored as `null`.
    pub fn insert<T: Serialize>(&mut self, key: impl Into<String>, value: T) {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.values.insert(key.into(), value);
    }

    /// Read `key` as `T`. `None` if absent or of a different shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Raw JSON value under `key`.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Store the primary response value.
    pub fn set_content<T: Serialize>(&mut self, value: T) {
        self.insert(CONTENT_KEY, value);
    }

    /// The primary response value.
    pub fn content(&self) -> Option<&Value> {
        self.value(CONTENT_KEY)
    }

    /// Record an error message.
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Take one routing pass.
    ///
    /// An unrouted single route wins; otherwise the slip is stepped. A route
    /// returned in [`RouteStep::Deliver`] has already been marked routed.
    pub fn next_hop(&mut self) -> RouteStep {
        if let Some(route) = self.route.as_mut() {
            if !route.routed {
                route.routed = true;
                return RouteStep::Deliver(route.clone());
            }
        }
        match self.slip.as_mut() {
            Some(slip) => slip.step(),
            None => RouteStep::EndOfRoute,
        }
    }

    /// True if no further route can be determined.
    pub fn is_end_of_route(&self) -> bool {
        let route_pending = self.route.as_ref().is_some_and(|r| !r.routed);
        let slip_pending = self.slip.as_ref().is_some_and(|s| !s.is_exhausted());
        !route_pending && !slip_pending
    }

    /// Encode as a single JSON line (no trailing newline).
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        // serde_json escapes control characters, so the output is one line
        serde_json::to_string(self)
    }

    /// Decode one JSON line.
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim_end_matches(['\r', '\n']))
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::document()
    }
}
