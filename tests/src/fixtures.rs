//! # Test Fixtures
//!
//! A configurable `Recorder` service and a bus wrapper that owns its data
//! directory. Dependencies are fixed per catalog entry; everything else comes
//! from the service configuration:
//!
//! | Key | Effect |
//! |---|---|
//! | `recorder.forward` | send every envelope on to its next hop |
//! | `recorder.hangOnGracefulStop` | graceful shutdown never completes |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use service_bus::config::{BASE_DIR_KEY, GRACEFUL_TIMEOUT_KEY};
use service_bus::{
    BusStatus, BusStatusListener, ServiceBus, ServiceCatalog, ServiceStatusObserver,
};
use shared_types::{
    DynService, Envelope, Properties, Service, ServiceContext, ServiceError, ServiceStatus,
};
use tempfile::TempDir;

pub const FORWARD_KEY: &str = "recorder.forward";
pub const HANG_KEY: &str = "recorder.hangOnGracefulStop";

/// Envelopes seen by every recorder, in arrival order.
#[derive(Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<(String, Envelope)>>>,
}

impl Journal {
    fn record(&self, service: &str, envelope: Envelope) {
        self.entries.lock().push((service.to_string(), envelope));
    }

    pub fn entries(&self) -> Vec<(String, Envelope)> {
        self.entries.lock().clone()
    }

    /// Service names in arrival order.
    pub fn services(&self) -> Vec<String> {
        self.entries.lock().iter().map(|(s, _)| s.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

pub struct Recorder {
    ctx: ServiceContext,
    journal: Journal,
    dependencies: Vec<String>,
    status: Mutex<ServiceStatus>,
}

impl Recorder {
    fn flag(&self, key: &str) -> bool {
        self.ctx.config().get(key).map(String::as_str) == Some("true")
    }

    fn set_status(&self, status: ServiceStatus) {
        *self.status.lock() = status;
        self.ctx.report_status(status);
    }
}

#[async_trait]
impl Service for Recorder {
    fn name(&self) -> &str {
        self.ctx.name()
    }

    fn dependencies(&self) -> Vec<String> {
        self.dependencies.clone()
    }

    async fn handle_envelope(&self, envelope: Envelope) {
        self.journal.record(self.ctx.name(), envelope.clone());
        if self.flag(FORWARD_KEY) {
            self.ctx.send(envelope).await;
        }
    }

    async fn start(&self) -> Result<(), ServiceError> {
        self.set_status(ServiceStatus::Running);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ServiceError> {
        self.set_status(ServiceStatus::Shutdown);
        Ok(())
    }

    async fn graceful_shutdown(&self) -> Result<(), ServiceError> {
        if self.flag(HANG_KEY) {
            std::future::pending::<()>().await;
        }
        self.set_status(ServiceStatus::GracefullyShutdown);
        Ok(())
    }

    fn status(&self) -> ServiceStatus {
        *self.status.lock()
    }
}

/// Status reports from watched services, in order.
#[derive(Default)]
pub struct ServiceWatch {
    seen: Mutex<Vec<(String, ServiceStatus)>>,
}

impl ServiceWatch {
    pub fn seen(&self) -> Vec<(String, ServiceStatus)> {
        self.seen.lock().clone()
    }
}

impl ServiceStatusObserver for ServiceWatch {
    fn service_status_changed(&self, service: &str, status: ServiceStatus) {
        self.seen.lock().push((service.to_string(), status));
    }
}

/// Bus status changes, in order.
#[derive(Default)]
pub struct StatusLog {
    seen: Mutex<Vec<BusStatus>>,
}

impl StatusLog {
    pub fn seen(&self) -> Vec<BusStatus> {
        self.seen.lock().clone()
    }
}

impl BusStatusListener for StatusLog {
    fn bus_status_changed(&self, status: BusStatus) {
        self.seen.lock().push(status);
    }
}

/// Catalog with a recorder under each of `names`, all writing to `journal`.
pub fn catalog(journal: &Journal, names: &[&str]) -> ServiceCatalog {
    let none: &[&str] = &[];
    let graph: Vec<(&str, &[&str])> = names.iter().map(|n| (*n, none)).collect();
    catalog_with_deps(journal, &graph)
}

/// Catalog of recorders with the given dependency lists.
pub fn catalog_with_deps(journal: &Journal, graph: &[(&str, &[&str])]) -> ServiceCatalog {
    let mut catalog = ServiceCatalog::new();
    for (name, deps) in graph {
        let journal = journal.clone();
        let deps: Vec<String> = deps.iter().map(|d| d.to_string()).collect();
        catalog.register(*name, move |ctx| {
            Ok(Arc::new(Recorder {
                ctx,
                journal: journal.clone(),
                dependencies: deps.clone(),
                status: Mutex::new(ServiceStatus::NotInitialized),
            }) as DynService)
        });
    }
    catalog
}

/// Properties of a single key.
pub fn props(key: &str, value: &str) -> Properties {
    let mut props = Properties::new();
    props.insert(key.to_string(), value.to_string());
    props
}

/// A bus that owns its data directory.
pub struct TestBus {
    pub bus: ServiceBus,
    pub journal: Journal,
    pub dir: TempDir,
}

impl TestBus {
    /// Started bus with recorders available under `names`.
    pub async fn start(names: &[&str]) -> Self {
        Self::start_with(names, Properties::new()).await
    }

    /// Started bus with `extra` properties layered over the test defaults.
    pub async fn start_with(names: &[&str], extra: Properties) -> Self {
        let journal = Journal::default();
        Self::start_catalog(catalog(&journal, names), journal, extra).await
    }

    /// Started bus over a dependency graph of recorders.
    pub async fn start_graph(graph: &[(&str, &[&str])]) -> Self {
        let journal = Journal::default();
        Self::start_catalog(catalog_with_deps(&journal, graph), journal, Properties::new()).await
    }

    async fn start_catalog(catalog: ServiceCatalog, journal: Journal, extra: Properties) -> Self {
        let dir = TempDir::new().unwrap();
        let bus = ServiceBus::with_catalog(catalog);
        bus.start(Self::properties(&dir, extra)).await.unwrap();
        Self { bus, journal, dir }
    }

    pub fn properties(dir: &TempDir, extra: Properties) -> Properties {
        let mut props = props(BASE_DIR_KEY, &dir.path().display().to_string());
        props.insert(GRACEFUL_TIMEOUT_KEY.to_string(), "1".to_string());
        props.extend(extra);
        props
    }

    /// Register and start each service, waiting until all are running.
    pub async fn start_services(&self, names: &[&str]) {
        for name in names {
            self.bus.register_default(name, Properties::new()).unwrap();
            assert!(self.bus.start_service(name));
        }
        assert!(eventually(|| names.iter().all(|n| self.bus.is_running(n))).await);
    }
}

/// Poll `check` for up to two seconds.
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}
