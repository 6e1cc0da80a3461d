//! Bus shutdown: immediate and graceful with a deadline.

use std::collections::BTreeSet;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::ServiceBus;
use crate::errors::BusError;
use crate::status::{BusStatus, ShutdownReport};

impl ServiceBus {
    /// Stop every running service, then the transport.
    ///
    /// Waits for the service workers at most the graceful deadline; workers
    /// still running then are left to finish on their own and the transport
    /// result decides the final status. Also accepted from `Errored`, to
    /// return a failed bus to `Stopped`.
    pub async fn shutdown(&self) -> Result<(), BusError> {
        self.transition(&[BusStatus::Running, BusStatus::Errored], BusStatus::Stopping)?;
        let timeout = self.inner.config.read().graceful_timeout;
        info!("[ServiceBus] Shutting down");

        let mut workers = JoinSet::new();
        for (name, service) in self.running_entries() {
            let bus = self.clone();
            workers.spawn(async move {
                match service.shutdown().await {
                    Ok(()) => bus.set_running(&name, false),
                    Err(e) => warn!(service = %name, error = %e, "[ServiceBus] ✗ Shutdown failed"),
                }
            });
        }

        let deadline = Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, workers.join_next()).await {
                Ok(Some(Ok(()))) => {}
                Ok(Some(Err(e))) => warn!(error = %e, "[ServiceBus] Shutdown worker panicked"),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        pending = workers.len(),
                        "[ServiceBus] Services still stopping at deadline, not waiting"
                    );
                    workers.detach_all();
                    break;
                }
            }
        }

        self.finish(false).await
    }

    /// Gracefully stop every running service, waiting at most the configured
    /// deadline. Services still stopping at the deadline are force-stopped.
    pub async fn graceful_shutdown(&self) -> Result<ShutdownReport, BusError> {
        self.transition(&[BusStatus::Running], BusStatus::Stopping)?;
        let timeout = self.inner.config.read().graceful_timeout;
        info!("[ServiceBus] Graceful shutdown (deadline {:?})", timeout);

        let entries = self.running_entries();
        let mut pending: BTreeSet<String> = entries.iter().map(|(n, _)| n.clone()).collect();
        let mut workers = JoinSet::new();
        for (name, service) in entries {
            workers.spawn(async move {
                let result = service.graceful_shutdown().await;
                (name, result)
            });
        }

        let mut report = ShutdownReport::default();
        let deadline = Instant::now() + timeout;
        let mut timed_out = false;
        loop {
            match tokio::time::timeout_at(deadline, workers.join_next()).await {
                Ok(Some(Ok((name, result)))) => {
                    pending.remove(&name);
                    match result {
                        Ok(()) => {
                            self.set_running(&name, false);
                            report.completed.push(name);
                        }
                        Err(e) => {
                            warn!(service = %name, error = %e, "[ServiceBus] ✗ Graceful shutdown failed");
                            report.failed.push(name);
                        }
                    }
                }
                // The name stays pending and is reported as failed below.
                Ok(Some(Err(e))) => warn!(error = %e, "[ServiceBus] Shutdown worker panicked"),
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    workers.abort_all();
                    break;
                }
            }
        }

        if timed_out {
            for name in pending {
                warn!(service = %name, "[ServiceBus] Deadline passed, forcing shutdown");
                self.force_stop(&name);
                report.forced.push(name);
            }
        } else {
            report.failed.extend(pending);
        }

        let result = self.finish(true).await;
        report.transport_ok = result.is_ok();
        if report.is_degraded() {
            warn!(
                forced = report.forced.len(),
                failed = report.failed.len(),
                "[ServiceBus] Graceful shutdown degraded"
            );
        }
        result.map(|()| report)
    }

    /// Non-graceful shutdown on a worker that nobody waits for.
    fn force_stop(&self, name: &str) {
        let Some(service) = self.service(name) else {
            return;
        };
        let bus = self.clone();
        let name = name.to_string();
        self.spawn(async move {
            match service.shutdown().await {
                Ok(()) => bus.set_running(&name, false),
                Err(e) => warn!(service = %name, error = %e, "[ServiceBus] ✗ Forced shutdown failed"),
            }
        });
    }

    /// Release the transport and sink, clear the registry and settle on the
    /// final status.
    async fn finish(&self, graceful: bool) -> Result<(), BusError> {
        let transport_ok = self.release_resources(graceful).await;
        self.inner.registry.write().clear();

        if transport_ok {
            self.set_status(BusStatus::Stopped);
            info!("[ServiceBus] Stopped");
            Ok(())
        } else {
            error!("[ServiceBus] Transport shutdown failed");
            self.set_status(BusStatus::Errored);
            Err(BusError::TransportShutdownFailed)
        }
    }
}
