//! # Staged Event Bus
//!
//! Default in-process transport. Every channel is a *stage*: a bounded mpsc
//! queue drained by one consumer task.
//!
//! ```text
//!   publish("svc.A") ──→ [ queue svc.A ] ──→ consumer task ──→ svc.A
//!   publish("svc.B") ──→ [ queue svc.B ] ──→ consumer task ──→ svc.B
//! ```
//!
//! Envelopes on one channel are consumed in publish order. Nothing is
//! ordered across channels.
//!
//! Consumer tasks run on the runtime that called `start`, so consumers can be
//! attached from threads outside the runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use shared_types::{Envelope, Properties};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::transport::{EnvelopeConsumer, MessageBus, TransportError};
use crate::DEFAULT_CHANNEL_CAPACITY;

/// Property key overriding the per-channel queue capacity.
pub const CAPACITY_KEY: &str = "servicebus.staged.capacity";

/// How long a graceful shutdown waits for each stage to drain.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

struct Stage {
    sender: mpsc::Sender<Envelope>,
    receiver: Option<mpsc::Receiver<Envelope>>,
    worker: Option<JoinHandle<()>>,
}

/// In-process staged transport.
pub struct StagedEventBus {
    stages: RwLock<HashMap<String, Stage>>,
    /// Workers of channels that were unregistered but may still be draining.
    retired: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    runtime: Mutex<Option<Handle>>,
    capacity: usize,
    published: AtomicU64,
    completed: AtomicU64,
}

impl StagedEventBus {
    /// Create a bus with the default per-channel capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus with the given per-channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            stages: RwLock::new(HashMap::new()),
            retired: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            runtime: Mutex::new(None),
            capacity: capacity.max(1),
            published: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        }
    }

    /// Build from bus properties (see [`CAPACITY_KEY`]).
    #[must_use]
    pub fn from_properties(properties: &Properties) -> Self {
        let capacity = properties
            .get(CAPACITY_KEY)
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        Self::with_capacity(capacity)
    }

    /// Per-channel queue capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the bus is accepting publishes.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Total envelopes accepted by `publish`.
    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Total end-of-route notifications.
    #[must_use]
    pub fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    fn take_workers(&self) -> Vec<JoinHandle<()>> {
        let mut workers: Vec<JoinHandle<()>> = {
            let mut stages = self.stages.write();
            stages.drain().filter_map(|(_, s)| s.worker).collect()
        };
        workers.append(&mut self.retired.lock());
        workers
    }
}

impl Default for StagedEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for StagedEventBus {
    fn name(&self) -> &str {
        "staged"
    }

    async fn start(&self) -> Result<(), TransportError> {
        *self.runtime.lock() = Handle::try_current().ok();
        self.running.store(true, Ordering::SeqCst);
        info!("[StagedEventBus] Started (capacity {})", self.capacity);
        Ok(())
    }

    fn register_channel(&self, channel: &str) -> Result<(), TransportError> {
        let mut stages = self.stages.write();
        if stages.contains_key(channel) {
            return Err(TransportError::ChannelExists(channel.to_string()));
        }
        let (sender, receiver) = mpsc::channel(self.capacity);
        stages.insert(
            channel.to_string(),
            Stage {
                sender,
                receiver: Some(receiver),
                worker: None,
            },
        );
        debug!(channel, "Channel registered");
        Ok(())
    }

    fn unregister_channel(&self, channel: &str) -> bool {
        let Some(stage) = self.stages.write().remove(channel) else {
            return false;
        };
        // Dropping the sender lets the worker finish its queue and exit.
        if let Some(worker) = stage.worker {
            self.retired.lock().push(worker);
        }
        debug!(channel, "Channel unregistered");
        true
    }

    fn register_consumer(
        &self,
        channel: &str,
        consumer: Arc<dyn EnvelopeConsumer>,
    ) -> Result<(), TransportError> {
        let runtime = self
            .runtime
            .lock()
            .clone()
            .or_else(|| Handle::try_current().ok())
            .ok_or_else(|| TransportError::NoRuntime(channel.to_string()))?;
        let mut stages = self.stages.write();
        let stage = stages
            .get_mut(channel)
            .ok_or_else(|| TransportError::UnknownChannel(channel.to_string()))?;
        let mut receiver = stage
            .receiver
            .take()
            .ok_or_else(|| TransportError::ConsumerAttached(channel.to_string()))?;

        let name = channel.to_string();
        stage.worker = Some(runtime.spawn(async move {
            while let Some(envelope) = receiver.recv().await {
                consumer.consume(envelope).await;
            }
            debug!(channel = %name, "Stage drained");
        }));
        Ok(())
    }

    async fn publish(&self, channel: &str, envelope: Envelope) -> bool {
        if !self.is_running() {
            warn!(channel, "Publish on stopped transport");
            return false;
        }
        let Some(sender) = self.stages.read().get(channel).map(|s| s.sender.clone()) else {
            warn!(channel, "Publish to unknown channel");
            return false;
        };

        match sender.try_send(envelope) {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(channel, "Stage full, envelope not accepted");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(channel, "Stage closed, envelope not accepted");
                false
            }
        }
    }

    fn completed(&self, envelope: &Envelope) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        debug!(id = %envelope.id, "Envelope completed");
    }

    fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stages.read().keys().cloned().collect();
        names.sort();
        names
    }

    async fn shutdown(&self) -> bool {
        self.running.store(false, Ordering::SeqCst);
        for worker in self.take_workers() {
            worker.abort();
        }
        info!("[StagedEventBus] Shut down");
        true
    }

    async fn graceful_shutdown(&self) -> bool {
        self.running.store(false, Ordering::SeqCst);
        let mut drained = true;
        for worker in self.take_workers() {
            let abort = worker.abort_handle();
            match tokio::time::timeout(DRAIN_TIMEOUT, worker).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "Stage worker failed while draining");
                    drained = false;
                }
                Err(_) => {
                    warn!("Stage did not drain in time, aborting");
                    abort.abort();
                    drained = false;
                }
            }
        }
        info!("[StagedEventBus] Gracefully shut down (drained: {})", drained);
        drained
    }
}
