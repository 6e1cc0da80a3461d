//! # TCP Bus Controller
//!
//! Accepts control connections and drives a [`ServiceBus`] on their behalf.
//!
//! ## Admission
//!
//! - At `max_clients` sessions the accept loop stops calling `accept` and
//!   polls once per `accept_backoff` until a session closes. Pending
//!   connections wait in the OS backlog; none are refused.
//! - With `loopback_only`, connections from non-loopback peers are dropped.
//! - Accept errors are logged and backed off; the listener keeps running.
//!
//! ## Client identity
//!
//! `InitiateComm` binds a client id to the session's socket address. A later
//! handshake with the same id on a new connection rebinds it, so end-of-route
//! envelopes follow the client across reconnects.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use service_bus::{BusStatus, BusStatusListener, ClientRouter, ServiceBus};
use shared_types::Envelope;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::session::{self, Session};

/// How long `shutdown` waits for sessions to finish closing.
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) struct ControllerInner {
    pub(crate) bus: ServiceBus,
    pub(crate) config: ControllerConfig,
    pub(crate) sessions: DashMap<SocketAddr, Arc<Session>>,
    clients: DashMap<String, SocketAddr>,
    shutdown: watch::Sender<bool>,
}

impl ControllerInner {
    /// Bind `client` to the session's address, replacing any earlier binding.
    pub(crate) fn bind_client(&self, session: &Session, client: String) {
        let addr = session.addr();
        if let Some(previous) = session.bind_client(client.clone()) {
            if previous != client {
                self.clients.remove_if(&previous, |_, a| *a == addr);
            }
        }
        if let Some(old) = self.clients.insert(client.clone(), addr) {
            if old != addr {
                info!(client = %client, from = %old, to = %addr, "[Controller] Client rebound");
            }
        }
        debug!(client = %client, %addr, "[Controller] Client bound");
    }

    pub(crate) fn remove_session(&self, session: &Session) {
        let addr = session.addr();
        self.sessions.remove(&addr);
        if let Some(client) = session.client() {
            self.clients.remove_if(&client, |_, a| *a == addr);
        }
    }
}

impl ClientRouter for ControllerInner {
    fn deliver_to_client(&self, client: &str, envelope: &Envelope) -> bool {
        let Some(addr) = self.clients.get(client).map(|a| *a) else {
            debug!(client, "[Controller] Unknown client");
            return false;
        };
        let Some(session) = self.sessions.get(&addr).map(|s| s.value().clone()) else {
            return false;
        };
        session.send(envelope)
    }
}

impl BusStatusListener for ControllerInner {
    fn bus_status_changed(&self, status: BusStatus) {
        info!("[Controller] Bus status: {}", status);
    }
}

/// Handle to a running controller.
pub struct BusController {
    inner: Arc<ControllerInner>,
    local_addr: SocketAddr,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl BusController {
    /// Bind the listener, attach to `bus` and start accepting.
    pub async fn start(bus: ServiceBus, config: ControllerConfig) -> Result<Self, ControllerError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| ControllerError::Bind {
                addr: config.bind_addr,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(ControllerInner {
            bus,
            config,
            sessions: DashMap::new(),
            clients: DashMap::new(),
            shutdown,
        });
        inner.bus.set_client_router(&inner);
        inner.bus.register_status_listener(&inner);

        let accept_task = tokio::spawn(accept_loop(inner.clone(), listener, shutdown_rx));
        info!(
            addr = %local_addr,
            max_clients = inner.config.max_clients,
            loopback_only = inner.config.loopback_only,
            "[Controller] Listening"
        );

        Ok(Self {
            inner,
            local_addr,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Socket address currently bound to `client`.
    #[must_use]
    pub fn client_addr(&self, client: &str) -> Option<SocketAddr> {
        self.inner.clients.get(client).map(|a| *a)
    }

    /// Close the session at `addr`. The peer receives `CloseClient`.
    pub fn disconnect(&self, addr: SocketAddr) -> bool {
        match self.inner.sessions.get(&addr).map(|s| s.value().clone()) {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// Stop accepting and close every session.
    pub async fn shutdown(&self) {
        info!("[Controller] Shutting down");
        self.inner.shutdown.send_replace(true);

        let sessions: Vec<Arc<Session>> = self
            .inner
            .sessions
            .iter()
            .map(|s| s.value().clone())
            .collect();
        for session in sessions {
            session.close();
        }

        let accept_task = self.accept_task.lock().take();
        if let Some(task) = accept_task {
            let _ = task.await;
        }

        let drained = tokio::time::timeout(SESSION_DRAIN_TIMEOUT, async {
            while !self.inner.sessions.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = self.inner.sessions.len(),
                "[Controller] Sessions still open after shutdown"
            );
        }
        self.inner.bus.clear_client_router();
        self.inner.bus.unregister_status_listener(&self.inner);
        info!("[Controller] Stopped");
    }
}

async fn accept_loop(
    inner: Arc<ControllerInner>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) {
    let backoff = inner.config.accept_backoff;
    loop {
        if *shutdown.borrow() {
            break;
        }

        if inner.sessions.len() >= inner.config.max_clients {
            debug!(
                sessions = inner.sessions.len(),
                "[Controller] At session ceiling, deferring accept"
            );
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(backoff) => continue,
            }
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    if inner.config.loopback_only && !addr.ip().is_loopback() {
                        warn!(%addr, "[Controller] Non-loopback connection dropped");
                        continue;
                    }
                    session::open(&inner, stream, addr);
                }
                Err(e) => {
                    warn!(error = %e, "[Controller] Accept failed, backing off");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            },
        }
    }
    debug!("[Controller] Accept loop stopped");
}
