//! # Service Catalog
//!
//! Named service factories supplied at composition time. Registration looks
//! up the implementation name here instead of loading a type by name.
//!
//! ```rust,ignore
//! let mut catalog = ServiceCatalog::new();
//! catalog.register("svc.echo", |ctx| Ok(Arc::new(EchoService::new(ctx)) as DynService));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use shared_types::{DynService, ServiceContext, ServiceError, ServiceFactory};

/// Map of implementation name to factory.
#[derive(Clone, Default)]
pub struct ServiceCatalog {
    factories: HashMap<String, ServiceFactory>,
}

impl ServiceCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a factory.
    pub fn register<F>(&mut self, implementation: impl Into<String>, factory: F)
    where
        F: Fn(ServiceContext) -> Result<DynService, ServiceError> + Send + Sync + 'static,
    {
        self.factories.insert(implementation.into(), Arc::new(factory));
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with<F>(mut self, implementation: impl Into<String>, factory: F) -> Self
    where
        F: Fn(ServiceContext) -> Result<DynService, ServiceError> + Send + Sync + 'static,
    {
        self.register(implementation, factory);
        self
    }

    pub fn get(&self, implementation: &str) -> Option<ServiceFactory> {
        self.factories.get(implementation).cloned()
    }

    pub fn contains(&self, implementation: &str) -> bool {
        self.factories.contains_key(implementation)
    }

    /// Registered implementation names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for ServiceCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCatalog")
            .field("implementations", &self.names())
            .finish()
    }
}
