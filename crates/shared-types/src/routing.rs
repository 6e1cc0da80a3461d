//! # Routing Model
//!
//! Pure data for moving an [`Envelope`](crate::Envelope) between services.
//!
//! - [`Route`]: one addressed hop (service + operation) with a `routed` flag.
//! - [`DynamicRoutingSlip`]: an ordered chain of routes with a cursor.
//! - [`RouteStep`]: the result of one routing pass over an envelope.
//!
//! ## Slip Cursor
//!
//! ```text
//!   built        ratchet        deliver        ratchet        deliver
//! [ a  b ] ──→ [(a) b ] ──→ [(a*) b ] ──→ [ a* (b)] ──→ [ a* (b*)] ──→ end
//!  no current    current a    a routed      current b     b routed
//! ```
//!
//! A slip of N routes ratchets exactly N times before it is exhausted.
//! A decoded slip whose cursor points past its routes is rejected.

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// One addressed hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    /// Target service name. Also the transport channel name.
    pub service: String,
    /// Operation the target service should perform.
    pub operation: String,
    /// Set once this hop has been handed to the transport.
    #[serde(default)]
    pub routed: bool,
}

impl Route {
    /// Create an unrouted hop.
    pub fn new(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
            routed: false,
        }
    }
}

/// Ordered, steppable chain of routes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicRoutingSlip {
    routes: Vec<Route>,
    /// Index of the current route. `None` until the first ratchet.
    cursor: Option<usize>,
}

/// Wire form of a slip, checked before it becomes a [`DynamicRoutingSlip`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SlipParts {
    #[serde(default)]
    routes: Vec<Route>,
    #[serde(default)]
    cursor: Option<usize>,
}

/// A slip cursor that does not point at one of its routes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("slip cursor {cursor} out of range for {len} routes")]
pub struct InvalidSlip {
    pub cursor: usize,
    pub len: usize,
}

impl<'de> Deserialize<'de> for DynamicRoutingSlip {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let parts = SlipParts::deserialize(deserializer)?;
        match parts.cursor {
            Some(cursor) if cursor >= parts.routes.len() => {
                Err(serde::de::Error::custom(InvalidSlip {
                    cursor,
                    len: parts.routes.len(),
                }))
            }
            cursor => Ok(Self {
                routes: parts.routes,
                cursor,
            }),
        }
    }
}

impl DynamicRoutingSlip {
    /// Create an empty slip.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a slip from routes in travel order.
    pub fn from_routes(routes: Vec<Route>) -> Self {
        Self {
            routes,
            cursor: None,
        }
    }

    /// Append a hop to the end of the slip.
    pub fn add_route(&mut self, route: Route) {
        self.routes.push(route);
    }

    /// All routes in travel order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// True if the slip holds no routes.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// The route under the cursor, if any.
    pub fn current_route(&self) -> Option<&Route> {
        self.cursor.and_then(|i| self.routes.get(i))
    }

    fn current_route_mut(&mut self) -> Option<&mut Route> {
        match self.cursor {
            Some(i) => self.routes.get_mut(i),
            None => None,
        }
    }

    fn next_index(&self) -> Option<usize> {
        match self.cursor {
            Some(i) => i.checked_add(1),
            None => Some(0),
        }
    }

    /// The route after the cursor, if any.
    pub fn next_route(&self) -> Option<&Route> {
        self.next_index().and_then(|next| self.routes.get(next))
    }

    fn current_pending(&self) -> bool {
        self.current_route().is_some_and(|r| !r.routed)
    }

    /// Advance the cursor to the next route.
    ///
    /// Only moves when the current route (if any) has been routed and a next
    /// route exists. Returns whether the cursor moved.
    pub fn ratchet(&mut self) -> bool {
        if self.current_pending() || self.next_route().is_none() {
            return false;
        }
        self.cursor = self.next_index();
        true
    }

    /// End of route: nothing current is pending and nothing is left.
    pub fn is_exhausted(&self) -> bool {
        !self.current_pending() && self.next_route().is_none()
    }

    /// Take one routing step over the slip.
    pub(crate) fn step(&mut self) -> RouteStep {
        if let Some(route) = self.current_route_mut() {
            if !route.routed {
                route.routed = true;
                return RouteStep::Deliver(route.clone());
            }
        }
        if self.ratchet() {
            RouteStep::Ratcheted
        } else {
            RouteStep::EndOfRoute
        }
    }
}

/// Outcome of one routing pass over an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteStep {
    /// Hand the envelope to this route's service. The route is now marked
    /// routed.
    Deliver(Route),
    /// The slip cursor moved; the new current route is eligible on the next
    /// pass, not this one.
    Ratcheted,
    /// No further route can be determined.
    EndOfRoute,
}
