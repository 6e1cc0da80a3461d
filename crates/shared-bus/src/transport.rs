//! # Transport Boundary
//!
//! The pub/sub layer envelopes travel over between services. The service bus
//! depends only on [`MessageBus`]; concrete transports are chosen by name
//! through the [`TransportRegistry`](crate::TransportRegistry).

use std::sync::Arc;

use async_trait::async_trait;
use shared_types::Envelope;
use thiserror::Error;

/// Errors from transport operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No transport constructor is registered under this name.
    #[error("Unknown transport: {0}")]
    UnknownTransport(String),

    /// The channel does not exist.
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    /// A channel with this name already exists.
    #[error("Channel already exists: {0}")]
    ChannelExists(String),

    /// The channel already has a consumer attached.
    #[error("Channel {0} already has a consumer")]
    ConsumerAttached(String),

    /// The transport was asked to do something in the wrong state.
    #[error("Transport not running")]
    NotRunning,

    /// No Tokio runtime is available to run the channel's consumer.
    #[error("No runtime for consumer of channel {0}")]
    NoRuntime(String),

    /// The transport could not be constructed or started.
    #[error("Transport failed: {0}")]
    Failed(String),
}

/// Receives envelopes published to one channel.
#[async_trait]
pub trait EnvelopeConsumer: Send + Sync {
    /// Handle one envelope. Called once per envelope, in publish order.
    async fn consume(&self, envelope: Envelope);
}

/// Pub/sub transport used by the service bus.
///
/// Channel names are service names. `publish` returns `false` rather than an
/// error so the caller can dead-letter without inspecting failure causes.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Short identifier for logging.
    fn name(&self) -> &str;

    /// Begin accepting publishes.
    async fn start(&self) -> Result<(), TransportError>;

    /// Create a channel.
    fn register_channel(&self, channel: &str) -> Result<(), TransportError>;

    /// Remove a channel. Envelopes already queued are still consumed.
    fn unregister_channel(&self, channel: &str) -> bool;

    /// Attach the single consumer of a channel.
    fn register_consumer(
        &self,
        channel: &str,
        consumer: Arc<dyn EnvelopeConsumer>,
    ) -> Result<(), TransportError>;

    /// Publish onto a channel. `false` if the envelope was not accepted.
    async fn publish(&self, channel: &str, envelope: Envelope) -> bool;

    /// Notification that an envelope reached the end of its route.
    fn completed(&self, envelope: &Envelope);

    /// Names of the existing channels.
    fn channels(&self) -> Vec<String>;

    /// Stop immediately, discarding queued envelopes.
    async fn shutdown(&self) -> bool;

    /// Stop after consumers have drained their queues.
    async fn graceful_shutdown(&self) -> bool;
}
