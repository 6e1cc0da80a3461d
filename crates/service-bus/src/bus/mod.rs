//! # Service Bus - Registry and Lifecycle Supervisor
//!
//! Owns the service registry, the transport and the dead-letter sink, and
//! aggregates service status reports into a single [`BusStatus`].
//!
//! ## Lifecycle
//!
//! ```text
//!            start()                 all report Running
//! Stopped ──────────→ Starting ──→ Running ←──────────────┐
//!    ↑                   │            │                    │
//!    │                   ↓ failure    │ shutdown()         │
//!    │                Errored         ↓ graceful_shutdown()│
//!    └──────────────────────────── Stopping                │
//!      transport ok / all report Shutdown ─────────────────┘
//! ```
//!
//! ## Registration
//!
//! `register_service` is synchronous and serialized: a concurrent caller for
//! the same name waits and then finds it registered. The candidate is built
//! from its factory, its declared dependencies are registered first (cycles
//! fail fast), and only then is it inserted and attached to its channel.
//!
//! Per-service observers hear every status a service reports. They are held
//! weakly and removed with the service.
//!
//! Lifecycle operations (`start_service`, `stop_service`,
//! `unregister_service`) return immediately and run on a spawned worker.
//! Workers run on the runtime that started the bus, so these calls and
//! registration also work from threads outside it.

mod dispatch;
mod shutdown;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatch::{ClientRouter, DispatchOutcome};

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use shared_bus::{EnvelopeConsumer, MessageBus, TransportRegistry};
use shared_types::{
    DynService, Envelope, EnvelopeProducer, Properties, ServiceContext, ServiceErrorKind,
    ServiceStatus,
};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::catalog::ServiceCatalog;
use crate::config::BusConfig;
use crate::dead_letter::DeadLetterSink;
use crate::errors::{BusError, RegistrationError};
use crate::status::{BusStatus, BusStatusListener, ServiceReport, ServiceStatusObserver};

/// A registered service.
struct ServiceEntry {
    service: DynService,
    implementation: String,
    dependencies: Vec<String>,
    running: bool,
    status: ServiceStatus,
    observers: Vec<Weak<dyn ServiceStatusObserver>>,
}

struct BusInner {
    catalog: ServiceCatalog,
    transports: TransportRegistry,
    config: RwLock<BusConfig>,
    status: RwLock<BusStatus>,
    runtime: RwLock<Option<Handle>>,
    registry: RwLock<HashMap<String, ServiceEntry>>,
    registration: Mutex<()>,
    transport: RwLock<Option<Arc<dyn MessageBus>>>,
    dead_letters: RwLock<Option<Arc<DeadLetterSink>>>,
    listeners: RwLock<Vec<Weak<dyn BusStatusListener>>>,
    client_router: RwLock<Option<Weak<dyn ClientRouter>>>,
}

/// Handle to a service bus. Cloning shares the same bus.
#[derive(Clone)]
pub struct ServiceBus {
    inner: Arc<BusInner>,
}

impl ServiceBus {
    #[must_use]
    pub fn new(catalog: ServiceCatalog, transports: TransportRegistry, config: BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                catalog,
                transports,
                config: RwLock::new(config),
                status: RwLock::new(BusStatus::Stopped),
                runtime: RwLock::new(None),
                registry: RwLock::new(HashMap::new()),
                registration: Mutex::new(()),
                transport: RwLock::new(None),
                dead_letters: RwLock::new(None),
                listeners: RwLock::new(Vec::new()),
                client_router: RwLock::new(None),
            }),
        }
    }

    /// A bus with the built-in transports and default configuration.
    #[must_use]
    pub fn with_catalog(catalog: ServiceCatalog) -> Self {
        Self::new(catalog, TransportRegistry::with_defaults(), BusConfig::default())
    }

    // =========================================================================
    // STATUS
    // =========================================================================

    #[must_use]
    pub fn status(&self) -> BusStatus {
        *self.inner.status.read()
    }

    /// Current configuration, including properties merged at start.
    #[must_use]
    pub fn config(&self) -> BusConfig {
        self.inner.config.read().clone()
    }

    /// Path of the active dead-letter file, once the bus has started.
    #[must_use]
    pub fn dead_letter_path(&self) -> Option<PathBuf> {
        self.inner
            .dead_letters
            .read()
            .as_ref()
            .map(|sink| sink.path().to_path_buf())
    }

    /// Observe bus status transitions. The bus keeps only a weak reference.
    pub fn register_status_listener<L: BusStatusListener + 'static>(&self, listener: &Arc<L>) {
        let weak = Arc::downgrade(listener);
        let weak: Weak<dyn BusStatusListener> = weak;
        self.inner.listeners.write().push(weak);
    }

    pub fn unregister_status_listener<L: BusStatusListener + 'static>(&self, listener: &Arc<L>) {
        let target = Arc::as_ptr(listener) as *const ();
        self.inner
            .listeners
            .write()
            .retain(|w| w.as_ptr() as *const () != target && w.strong_count() > 0);
    }

    /// Where end-of-route envelopes with a client identity are delivered.
    pub fn set_client_router<R: ClientRouter + 'static>(&self, router: &Arc<R>) {
        let weak = Arc::downgrade(router);
        let weak: Weak<dyn ClientRouter> = weak;
        *self.inner.client_router.write() = Some(weak);
    }

    pub fn clear_client_router(&self) {
        *self.inner.client_router.write() = None;
    }

    fn set_status(&self, status: BusStatus) {
        let previous = std::mem::replace(&mut *self.inner.status.write(), status);
        if previous != status {
            info!("[ServiceBus] {} -> {}", previous, status);
            self.notify(status);
        }
    }

    /// Move to `to` only from one of `from`, atomically.
    fn transition(&self, from: &[BusStatus], to: BusStatus) -> Result<(), BusError> {
        let previous = {
            let mut status = self.inner.status.write();
            if !from.contains(&*status) {
                return Err(BusError::InvalidState(*status));
            }
            std::mem::replace(&mut *status, to)
        };
        info!("[ServiceBus] {} -> {}", previous, to);
        self.notify(to);
        Ok(())
    }

    fn notify(&self, status: BusStatus) {
        let listeners: Vec<Arc<dyn BusStatusListener>> = {
            let mut listeners = self.inner.listeners.write();
            listeners.retain(|w| w.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            listener.bus_status_changed(status);
        }
    }

    // =========================================================================
    // BUS LIFECYCLE
    // =========================================================================

    /// Start the bus.
    ///
    /// Merges `properties` into the configuration, opens the dead-letter
    /// sink and brings up the configured transport.
    pub async fn start(&self, properties: Properties) -> Result<(), BusError> {
        self.transition(&[BusStatus::Stopped], BusStatus::Starting)?;
        *self.inner.runtime.write() = Handle::try_current().ok();

        match self.bring_up(&properties).await {
            Ok(()) => {
                self.set_status(BusStatus::Running);
                Ok(())
            }
            Err(e) => {
                error!("[ServiceBus] Start failed: {}", e);
                self.release_resources(false).await;
                self.set_status(BusStatus::Errored);
                Err(e)
            }
        }
    }

    async fn bring_up(&self, properties: &Properties) -> Result<(), BusError> {
        let mut config = self.config();
        config.apply_properties(properties)?;
        config.validate()?;

        // A bus stopped by status aggregation still holds these.
        self.release_resources(false).await;

        let sink = DeadLetterSink::open(config.dead_letter_path(), &config.dead_letter)?;
        *self.inner.dead_letters.write() = Some(Arc::new(sink));

        let transport = self
            .inner
            .transports
            .create(&config.transport, &config.properties)?;
        transport.start().await?;
        info!("[ServiceBus] Transport '{}' started", transport.name());
        *self.inner.transport.write() = Some(transport);

        self.inner.registry.write().clear();
        *self.inner.config.write() = config;
        Ok(())
    }

    /// Shut down the transport and close the sink. Returns the transport's
    /// shutdown result.
    async fn release_resources(&self, graceful: bool) -> bool {
        let transport = self.inner.transport.write().take();
        let transport_ok = match transport {
            Some(t) if graceful => t.graceful_shutdown().await,
            Some(t) => t.shutdown().await,
            None => true,
        };
        let sink = self.inner.dead_letters.write().take();
        if let Some(sink) = sink {
            sink.close().await;
        }
        transport_ok
    }

    pub fn pause(&self) -> Result<(), BusError> {
        Err(BusError::NotSupported("pause"))
    }

    pub fn unpause(&self) -> Result<(), BusError> {
        Err(BusError::NotSupported("unpause"))
    }

    pub fn restart(&self) -> Result<(), BusError> {
        Err(BusError::NotSupported("restart"))
    }

    /// Run a worker on the bus's runtime.
    pub(crate) fn spawn<F>(&self, worker: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let runtime = self
            .inner
            .runtime
            .read()
            .clone()
            .or_else(|| Handle::try_current().ok());
        match runtime {
            Some(handle) => {
                handle.spawn(worker);
            }
            None => error!("[ServiceBus] No runtime for worker, bus never started"),
        }
    }

    pub(crate) fn transport(&self) -> Option<Arc<dyn MessageBus>> {
        self.inner.transport.read().clone()
    }

    // =========================================================================
    // REGISTRATION
    // =========================================================================

    /// Register `implementation` under `name`, registering its dependencies
    /// first. Registering a name twice is a no-op.
    pub fn register_service(
        &self,
        name: &str,
        implementation: &str,
        config: Properties,
    ) -> Result<(), RegistrationError> {
        if self.status() != BusStatus::Running {
            return Err(RegistrationError::BusNotRunning);
        }
        let _registering = self.inner.registration.lock();
        let mut chain = Vec::new();
        self.register_on_chain(name, implementation, &config, &mut chain)
    }

    /// Register a service whose implementation name equals its name.
    pub fn register_default(&self, name: &str, config: Properties) -> Result<(), RegistrationError> {
        self.register_service(name, name, config)
    }

    /// Observe status reports from a registered service. The bus keeps only a
    /// weak reference. `false` if `name` is not registered.
    pub fn register_service_status_observer<O: ServiceStatusObserver + 'static>(
        &self,
        name: &str,
        observer: &Arc<O>,
    ) -> bool {
        let weak = Arc::downgrade(observer);
        let weak: Weak<dyn ServiceStatusObserver> = weak;
        match self.inner.registry.write().get_mut(name) {
            Some(entry) => {
                entry.observers.push(weak);
                debug!(service = name, "[ServiceBus] Status observer registered");
                true
            }
            None => false,
        }
    }

    pub fn unregister_service_status_observer<O: ServiceStatusObserver + 'static>(
        &self,
        name: &str,
        observer: &Arc<O>,
    ) -> bool {
        let target = Arc::as_ptr(observer) as *const ();
        match self.inner.registry.write().get_mut(name) {
            Some(entry) => {
                entry
                    .observers
                    .retain(|w| w.as_ptr() as *const () != target && w.strong_count() > 0);
                true
            }
            None => false,
        }
    }

    fn register_on_chain(
        &self,
        name: &str,
        implementation: &str,
        config: &Properties,
        chain: &mut Vec<String>,
    ) -> Result<(), RegistrationError> {
        if self.is_registered(name) {
            debug!(service = name, "[ServiceBus] Already registered");
            return Ok(());
        }
        if chain.iter().any(|n| n == name) {
            let mut cycle = chain.clone();
            cycle.push(name.to_string());
            warn!("[ServiceBus] Dependency cycle: {}", cycle.join(" -> "));
            return Err(RegistrationError::DependencyCycle { chain: cycle });
        }

        let factory = self
            .inner
            .catalog
            .get(implementation)
            .ok_or_else(|| RegistrationError::UnknownImplementation(implementation.to_string()))?;

        let mut service_config = self.inner.config.read().properties.clone();
        service_config.extend(config.iter().map(|(k, v)| (k.clone(), v.clone())));
        let producer: Arc<dyn EnvelopeProducer> = Arc::new(BusHandle {
            bus: Arc::downgrade(&self.inner),
        });
        let ctx = ServiceContext::new(name, service_config, producer);

        let service = factory(ctx).map_err(|e| match e.kind {
            ServiceErrorKind::AccessDenied => RegistrationError::NotAccessible {
                implementation: implementation.to_string(),
                message: e.message,
            },
            _ => RegistrationError::NotSupported {
                implementation: implementation.to_string(),
                message: e.message,
            },
        })?;

        let dependencies = service.dependencies();
        chain.push(name.to_string());
        let resolved = dependencies
            .iter()
            .try_for_each(|dep| self.register_on_chain(dep, dep, config, chain));
        chain.pop();
        resolved?;

        self.insert(name, implementation, service, dependencies)
    }

    fn insert(
        &self,
        name: &str,
        implementation: &str,
        service: DynService,
        dependencies: Vec<String>,
    ) -> Result<(), RegistrationError> {
        {
            let mut registry = self.inner.registry.write();
            if registry.contains_key(name) {
                return Ok(());
            }
            registry.insert(
                name.to_string(),
                ServiceEntry {
                    service: service.clone(),
                    implementation: implementation.to_string(),
                    dependencies,
                    running: false,
                    status: ServiceStatus::NotInitialized,
                    observers: Vec::new(),
                },
            );
        }

        if let Some(transport) = self.transport() {
            let attached = transport.register_channel(name).and_then(|()| {
                transport.register_consumer(name, Arc::new(ServiceConsumer(service)))
            });
            if let Err(e) = attached {
                transport.unregister_channel(name);
                self.inner.registry.write().remove(name);
                warn!(service = name, error = %e, "[ServiceBus] Channel setup failed");
                return Err(e.into());
            }
        }

        info!(service = name, implementation, "[ServiceBus] Service registered");
        Ok(())
    }

    // =========================================================================
    // SERVICE LIFECYCLE
    // =========================================================================

    /// Start a registered service on a worker. `false` if not registered.
    pub fn start_service(&self, name: &str) -> bool {
        let Some(service) = self.service(name) else {
            warn!(service = name, "[ServiceBus] Cannot start unregistered service");
            return false;
        };
        let bus = self.clone();
        let name = name.to_string();
        self.spawn(async move {
            match service.start().await {
                Ok(()) => {
                    bus.set_running(&name, true);
                    info!(service = %name, "[ServiceBus] ✓ Service started");
                }
                Err(e) => warn!(service = %name, error = %e, "[ServiceBus] ✗ Service failed to start"),
            }
        });
        true
    }

    /// Stop a registered service on a worker. `false` if not registered.
    pub fn stop_service(&self, name: &str, graceful: bool) -> bool {
        let Some(service) = self.service(name) else {
            warn!(service = name, "[ServiceBus] Cannot stop unregistered service");
            return false;
        };
        let bus = self.clone();
        let name = name.to_string();
        self.spawn(async move {
            let result = if graceful {
                service.graceful_shutdown().await
            } else {
                service.shutdown().await
            };
            match result {
                Ok(()) => {
                    bus.set_running(&name, false);
                    info!(service = %name, graceful, "[ServiceBus] ✓ Service stopped");
                }
                Err(e) => warn!(service = %name, error = %e, "[ServiceBus] ✗ Service failed to stop"),
            }
        });
        true
    }

    /// Shut a service down (if running) and remove it. `false` if not
    /// registered.
    pub fn unregister_service(&self, name: &str) -> bool {
        let Some((service, running)) = self
            .inner
            .registry
            .read()
            .get(name)
            .map(|e| (e.service.clone(), e.running))
        else {
            return false;
        };
        let bus = self.clone();
        let name = name.to_string();
        self.spawn(async move {
            if running {
                if let Err(e) = service.shutdown().await {
                    warn!(service = %name, error = %e, "[ServiceBus] ✗ Unregister aborted, shutdown failed");
                    return;
                }
            }
            bus.inner.registry.write().remove(&name);
            if let Some(transport) = bus.transport() {
                transport.unregister_channel(&name);
            }
            info!(service = %name, "[ServiceBus] Service unregistered");
        });
        true
    }

    /// A service reported a status change.
    ///
    /// `Unstable` restarts the service. `Running`, `Shutdown` and
    /// `GracefullyShutdown` are aggregated into the bus status once every
    /// registered service reports the same one.
    pub fn service_status_changed(&self, name: &str, status: ServiceStatus) {
        let (unanimous, observers) = {
            let mut registry = self.inner.registry.write();
            let Some(entry) = registry.get_mut(name) else {
                debug!(service = name, ?status, "[ServiceBus] Status from unregistered service");
                return;
            };
            entry.status = status;
            entry.observers.retain(|w| w.strong_count() > 0);
            let observers: Vec<Arc<dyn ServiceStatusObserver>> =
                entry.observers.iter().filter_map(Weak::upgrade).collect();
            (registry.values().all(|e| e.status == status), observers)
        };
        debug!(service = name, ?status, "[ServiceBus] Service status changed");
        for observer in observers {
            observer.service_status_changed(name, status);
        }

        match status {
            ServiceStatus::Unstable => self.restart_service(name),
            ServiceStatus::Running if unanimous => self.aggregate(BusStatus::Running),
            ServiceStatus::Shutdown | ServiceStatus::GracefullyShutdown if unanimous => {
                self.aggregate(BusStatus::Stopped);
            }
            _ => {}
        }
    }

    /// Apply an aggregated service status. Only moves between `Running` and
    /// `Stopped`; a bus starting, stopping or errored keeps its status.
    fn aggregate(&self, to: BusStatus) {
        let previous = {
            let mut status = self.inner.status.write();
            if *status == to || !matches!(*status, BusStatus::Running | BusStatus::Stopped) {
                return;
            }
            std::mem::replace(&mut *status, to)
        };
        info!("[ServiceBus] {} -> {} (service status)", previous, to);
        self.notify(to);
    }

    fn restart_service(&self, name: &str) {
        let Some(service) = self.service(name) else {
            return;
        };
        warn!(service = name, "[ServiceBus] Service unstable, restarting");
        let bus = self.clone();
        let name = name.to_string();
        self.spawn(async move {
            match service.restart().await {
                Ok(()) => {
                    bus.set_running(&name, true);
                    info!(service = %name, "[ServiceBus] ✓ Service restarted");
                }
                Err(e) => {
                    bus.set_running(&name, false);
                    warn!(service = %name, error = %e, "[ServiceBus] ✗ Restart failed");
                }
            }
        });
    }

    fn service(&self, name: &str) -> Option<DynService> {
        self.inner
            .registry
            .read()
            .get(name)
            .map(|e| e.service.clone())
    }

    fn set_running(&self, name: &str, running: bool) {
        if let Some(entry) = self.inner.registry.write().get_mut(name) {
            entry.running = running;
        }
    }

    fn running_entries(&self) -> Vec<(String, DynService)> {
        self.inner
            .registry
            .read()
            .iter()
            .filter(|(_, e)| e.running)
            .map(|(n, e)| (n.clone(), e.service.clone()))
            .collect()
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.registry.read().contains_key(name)
    }

    #[must_use]
    pub fn is_running(&self, name: &str) -> bool {
        self.inner
            .registry
            .read()
            .get(name)
            .is_some_and(|e| e.running)
    }

    /// Last status reported by a service.
    #[must_use]
    pub fn service_status(&self, name: &str) -> Option<ServiceStatus> {
        self.inner.registry.read().get(name).map(|e| e.status)
    }

    /// Names of running services, sorted.
    #[must_use]
    pub fn running_services(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .registry
            .read()
            .iter()
            .filter(|(_, e)| e.running)
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    /// Snapshot of every registry entry, sorted by name.
    #[must_use]
    pub fn service_reports(&self) -> Vec<ServiceReport> {
        let mut reports: Vec<ServiceReport> = self
            .inner
            .registry
            .read()
            .iter()
            .map(|(name, e)| ServiceReport {
                name: name.clone(),
                implementation: e.implementation.clone(),
                registered: true,
                running: e.running,
                status: e.status,
                dependencies: e.dependencies.clone(),
            })
            .collect();
        reports.sort_by(|a, b| a.name.cmp(&b.name));
        reports
    }

    // =========================================================================
    // DEAD LETTERS
    // =========================================================================

    /// Persist an envelope that cannot be routed. Never blocks.
    pub fn dead_letter(&self, envelope: Envelope) {
        let sink = self.inner.dead_letters.read().clone();
        match sink {
            Some(sink) => sink.enqueue(envelope),
            None => warn!(id = %envelope.id, "[ServiceBus] No dead letter sink, envelope dropped"),
        }
    }

    /// Wait until every dead letter queued so far is on disk.
    pub async fn flush_dead_letters(&self) {
        let sink = self.inner.dead_letters.read().clone();
        if let Some(sink) = sink {
            sink.flush().await;
        }
    }
}

/// The bus side of a [`ServiceContext`]. Holds the bus weakly.
struct BusHandle {
    bus: Weak<BusInner>,
}

impl BusHandle {
    fn bus(&self) -> Option<ServiceBus> {
        self.bus.upgrade().map(|inner| ServiceBus { inner })
    }
}

#[async_trait]
impl EnvelopeProducer for BusHandle {
    async fn send(&self, envelope: Envelope) -> bool {
        match self.bus() {
            Some(bus) => bus.send(envelope).await,
            None => false,
        }
    }

    fn dead_letter(&self, envelope: Envelope) {
        if let Some(bus) = self.bus() {
            bus.dead_letter(envelope);
        }
    }

    fn report_status(&self, service: &str, status: ServiceStatus) {
        if let Some(bus) = self.bus() {
            bus.service_status_changed(service, status);
        }
    }
}

/// Feeds a service's channel into the service.
struct ServiceConsumer(DynService);

#[async_trait]
impl EnvelopeConsumer for ServiceConsumer {
    async fn consume(&self, envelope: Envelope) {
        self.0.handle_envelope(envelope).await;
    }
}
