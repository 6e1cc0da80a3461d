//! # Transport Registry
//!
//! Named transport constructors, chosen at bus start by the configured
//! selector. Replaces loading a transport implementation by class name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use shared_types::Properties;

use crate::staged::StagedEventBus;
use crate::transport::{MessageBus, TransportError};

/// Name of the built-in transport.
pub const DEFAULT_TRANSPORT: &str = "staged";

/// Builds a transport from the bus properties.
pub type TransportConstructor =
    Arc<dyn Fn(&Properties) -> Result<Arc<dyn MessageBus>, TransportError> + Send + Sync>;

/// Map of transport name to constructor.
#[derive(Clone)]
pub struct TransportRegistry {
    constructors: HashMap<String, TransportConstructor>,
}

impl TransportRegistry {
    /// An empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// A registry holding the built-in [`StagedEventBus`] as `"staged"`.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(DEFAULT_TRANSPORT, |props: &Properties| {
            let bus: Arc<dyn MessageBus> = Arc::new(StagedEventBus::from_properties(props));
            Ok(bus)
        });
        registry
    }

    /// Register (or replace) a constructor.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&Properties) -> Result<Arc<dyn MessageBus>, TransportError> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
    }

    /// Construct the transport registered under `name`.
    pub fn create(
        &self,
        name: &str,
        properties: &Properties,
    ) -> Result<Arc<dyn MessageBus>, TransportError> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| TransportError::UnknownTransport(name.to_string()))?;
        constructor(properties)
    }

    /// Whether a constructor exists for `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("names", &self.names())
            .finish()
    }
}
