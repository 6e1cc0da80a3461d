//! Mock services for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::{
    DynService, Envelope, Properties, Service, ServiceContext, ServiceError, ServiceErrorKind,
    ServiceStatus,
};
use tempfile::TempDir;

use super::ServiceBus;
use crate::catalog::ServiceCatalog;
use crate::config::{BASE_DIR_KEY, GRACEFUL_TIMEOUT_KEY};
use crate::status::{BusStatus, BusStatusListener, ServiceStatusObserver};

#[derive(Debug, Clone, Default)]
pub(crate) struct Behavior {
    pub deps: Vec<String>,
    pub fail_start: bool,
    pub hang_graceful: bool,
    pub hang_shutdown: bool,
    /// Sleep inside the factory, blocking the registering thread.
    pub build_delay: Option<Duration>,
    /// Hand every received envelope back to the bus.
    pub forward: bool,
}

impl Behavior {
    pub fn depends_on(deps: &[&str]) -> Self {
        Self {
            deps: deps.iter().map(|d| d.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang_graceful: true,
            ..Self::default()
        }
    }

    pub fn stuck_shutdown() -> Self {
        Self {
            hang_shutdown: true,
            ..Self::default()
        }
    }

    pub fn slow_build(delay: Duration) -> Self {
        Self {
            build_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn forwarding() -> Self {
        Self {
            forward: true,
            ..Self::default()
        }
    }
}

pub(crate) struct Mock {
    ctx: ServiceContext,
    behavior: Behavior,
    starts: AtomicUsize,
    restarts: AtomicUsize,
    shutdowns: AtomicUsize,
    graceful_shutdowns: AtomicUsize,
    received: Mutex<Vec<Envelope>>,
    status: Mutex<ServiceStatus>,
}

impl Mock {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
    pub fn graceful_shutdowns(&self) -> usize {
        self.graceful_shutdowns.load(Ordering::SeqCst)
    }
    pub fn received(&self) -> Vec<Envelope> {
        self.received.lock().clone()
    }
    pub fn config(&self) -> &Properties {
        self.ctx.config()
    }
    pub fn report(&self, status: ServiceStatus) {
        self.ctx.report_status(status);
    }
}

#[async_trait]
impl Service for Mock {
    fn name(&self) -> &str {
        self.ctx.name()
    }

    fn dependencies(&self) -> Vec<String> {
        self.behavior.deps.clone()
    }

    async fn handle_envelope(&self, envelope: Envelope) {
        self.received.lock().push(envelope.clone());
        if self.behavior.forward {
            self.ctx.send(envelope).await;
        }
    }

    async fn start(&self) -> Result<(), ServiceError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.behavior.fail_start {
            return Err(ServiceError::new(
                self.ctx.name(),
                ServiceErrorKind::InitializationFailed,
                "refusing to start",
            ));
        }
        *self.status.lock() = ServiceStatus::Running;
        Ok(())
    }

    async fn restart(&self) -> Result<(), ServiceError> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        *self.status.lock() = ServiceStatus::Running;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ServiceError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        if self.behavior.hang_shutdown {
            std::future::pending::<()>().await;
        }
        *self.status.lock() = ServiceStatus::Shutdown;
        Ok(())
    }

    async fn graceful_shutdown(&self) -> Result<(), ServiceError> {
        self.graceful_shutdowns.fetch_add(1, Ordering::SeqCst);
        if self.behavior.hang_graceful {
            std::future::pending::<()>().await;
        }
        *self.status.lock() = ServiceStatus::GracefullyShutdown;
        Ok(())
    }

    fn status(&self) -> ServiceStatus {
        *self.status.lock()
    }
}

/// Shared record of every mock the catalog has built.
#[derive(Clone, Default)]
pub(crate) struct Mocks {
    instances: Arc<Mutex<HashMap<String, Arc<Mock>>>>,
    constructed: Arc<AtomicUsize>,
}

impl Mocks {
    pub fn catalog(&self, entries: &[(&str, Behavior)]) -> ServiceCatalog {
        let mut catalog = ServiceCatalog::new();
        for (name, behavior) in entries {
            let mocks = self.clone();
            let behavior = behavior.clone();
            catalog.register(*name, move |ctx: ServiceContext| {
                mocks.constructed.fetch_add(1, Ordering::SeqCst);
                if let Some(delay) = behavior.build_delay {
                    std::thread::sleep(delay);
                }
                let mock = Arc::new(Mock {
                    ctx,
                    behavior: behavior.clone(),
                    starts: AtomicUsize::new(0),
                    restarts: AtomicUsize::new(0),
                    shutdowns: AtomicUsize::new(0),
                    graceful_shutdowns: AtomicUsize::new(0),
                    received: Mutex::new(Vec::new()),
                    status: Mutex::new(ServiceStatus::NotInitialized),
                });
                mocks
                    .instances
                    .lock()
                    .insert(mock.ctx.name().to_string(), mock.clone());
                Ok(mock as DynService)
            });
        }
        catalog
    }

    pub fn get(&self, name: &str) -> Option<Arc<Mock>> {
        self.instances.lock().get(name).cloned()
    }

    pub fn constructed(&self) -> usize {
        self.constructed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub(crate) struct StatusRecorder {
    seen: Mutex<Vec<BusStatus>>,
}

impl StatusRecorder {
    pub fn seen(&self) -> Vec<BusStatus> {
        self.seen.lock().clone()
    }
}

impl BusStatusListener for StatusRecorder {
    fn bus_status_changed(&self, status: BusStatus) {
        self.seen.lock().push(status);
    }
}

#[derive(Default)]
pub(crate) struct ServiceStatusRecorder {
    seen: Mutex<Vec<(String, ServiceStatus)>>,
}

impl ServiceStatusRecorder {
    pub fn seen(&self) -> Vec<(String, ServiceStatus)> {
        self.seen.lock().clone()
    }
}

impl ServiceStatusObserver for ServiceStatusRecorder {
    fn service_status_changed(&self, service: &str, status: ServiceStatus) {
        self.seen.lock().push((service.to_string(), status));
    }
}

pub(crate) fn base_dir_props(dir: &TempDir) -> Properties {
    let mut props = Properties::new();
    props.insert(BASE_DIR_KEY.into(), dir.path().display().to_string());
    props.insert(GRACEFUL_TIMEOUT_KEY.into(), "1".into());
    props
}

pub(crate) async fn running_bus(entries: &[(&str, Behavior)]) -> (ServiceBus, Mocks, TempDir) {
    let mocks = Mocks::default();
    let bus = ServiceBus::with_catalog(mocks.catalog(entries));
    let dir = TempDir::new().unwrap();
    bus.start(base_dir_props(&dir)).await.unwrap();
    (bus, mocks, dir)
}

/// Poll `check` until it holds, failing the test after two seconds.
pub(crate) async fn eventually(check: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}
