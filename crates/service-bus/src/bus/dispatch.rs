//! # Envelope Dispatch
//!
//! Turns routing passes into transport publishes, client deliveries or dead
//! letters.
//!
//! ```text
//!            ┌─────────── Ratcheted ───────────┐
//!            ▼                                 │
//! send ──→ next_hop() ──→ Deliver(route) ──→ publish(route.service) ──✗──→ dead letter
//!            │
//!            └──→ EndOfRoute ──→ completed() ──→ client? ──→ ClientRouter ──✗──→ dead letter
//! ```

use shared_types::{Envelope, Route, RouteStep};
use tracing::{debug, warn};

use super::ServiceBus;

/// Delivers end-of-route envelopes to remote clients.
pub trait ClientRouter: Send + Sync {
    /// `false` if the client is unknown or its connection is gone.
    fn deliver_to_client(&self, client: &str, envelope: &Envelope) -> bool;
}

/// What happened to a dispatched envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handed to the transport channel of `service`.
    Published { service: String },
    /// End of route with no client association.
    Completed,
    /// End of route, handed to the client's connection.
    DeliveredToClient { client: String },
    /// Not routable as data (carries a control command).
    Rejected { reason: String },
    /// Persisted to the dead-letter sink.
    DeadLettered,
}

impl DispatchOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Published { .. } | Self::Completed | Self::DeliveredToClient { .. }
        )
    }
}

impl ServiceBus {
    /// Route an envelope onward. `true` unless it was rejected or
    /// dead-lettered.
    pub async fn send(&self, envelope: Envelope) -> bool {
        self.dispatch(envelope, None).await.is_success()
    }

    /// Route an envelope onward, delivering it to `client` at end of route.
    pub async fn send_with_client(&self, envelope: Envelope, client: impl Into<String>) -> bool {
        self.dispatch(envelope, Some(client.into()))
            .await
            .is_success()
    }

    /// Run routing passes until the envelope is delivered somewhere.
    ///
    /// An explicit `client` replaces the envelope's own, so it travels with
    /// the envelope through every later hop. A ratchet strictly advances the
    /// slip cursor, so the loop ends.
    pub async fn dispatch(&self, mut envelope: Envelope, client: Option<String>) -> DispatchOutcome {
        if let Some(command) = envelope.command {
            warn!(id = %envelope.id, %command, "[ServiceBus] Control envelope refused by dispatch");
            return DispatchOutcome::Rejected {
                reason: format!("{} is a control command", command),
            };
        }
        if client.is_some() {
            envelope.client = client;
        }

        loop {
            match envelope.next_hop() {
                RouteStep::Ratcheted => continue,
                RouteStep::Deliver(route) => return self.publish(route, envelope).await,
                RouteStep::EndOfRoute => return self.complete(envelope),
            }
        }
    }

    async fn publish(&self, route: Route, envelope: Envelope) -> DispatchOutcome {
        let published = match self.transport() {
            Some(transport) => transport.publish(&route.service, envelope.clone()).await,
            None => false,
        };

        if published {
            debug!(
                id = %envelope.id,
                service = %route.service,
                operation = %route.operation,
                "[ServiceBus] Envelope published"
            );
            DispatchOutcome::Published {
                service: route.service,
            }
        } else {
            warn!(id = %envelope.id, service = %route.service, "[ServiceBus] Publish failed, dead-lettering");
            self.dead_letter(envelope);
            DispatchOutcome::DeadLettered
        }
    }

    fn complete(&self, envelope: Envelope) -> DispatchOutcome {
        if let Some(transport) = self.transport() {
            transport.completed(&envelope);
        }

        let Some(client) = envelope.client.clone() else {
            debug!(id = %envelope.id, "[ServiceBus] End of route");
            return DispatchOutcome::Completed;
        };

        let router = self
            .inner
            .client_router
            .read()
            .as_ref()
            .and_then(|r| r.upgrade());
        match router {
            Some(router) if router.deliver_to_client(&client, &envelope) => {
                debug!(id = %envelope.id, client = %client, "[ServiceBus] Delivered to client");
                DispatchOutcome::DeliveredToClient { client }
            }
            _ => {
                warn!(id = %envelope.id, client = %client, "[ServiceBus] Client unreachable, dead-lettering");
                self.dead_letter(envelope);
                DispatchOutcome::DeadLettered
            }
        }
    }
}
