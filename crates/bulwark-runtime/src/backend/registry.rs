//! Registry mapping provider identifiers to backend capabilities.
//!
//! The registry is pure data: it holds no health, no retry policy, no
//! routing logic. Backends are registered directly, or created from
//! configuration through a [`BackendFactory`] selected by the `type` key.
//!
//! ## Usage
//!
//! ```ignore
//! let registry = BackendRegistry::new();
//! registry.register_factory(Arc::new(ScriptedBackendFactory));
//! registry.register("ollama", Arc::new(my_local_backend));
//! registry.load(&config.backends)?;
//! ```

use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Backend, BackendError};

/// Factory for creating backends from configuration.
///
/// Each factory is responsible for:
/// 1. Validating its configuration format
/// 2. Creating backend instances
/// 3. Providing a unique type identifier
pub trait BackendFactory: Send + Sync {
    /// Unique identifier for this backend type (the `type` key in config).
    fn backend_type(&self) -> &'static str;

    /// Create a backend for `provider` from its JSON configuration.
    fn create(&self, provider: &str, config: &JsonValue) -> Result<Arc<dyn Backend>, BackendError>;

    /// Validate configuration without creating a backend.
    fn validate_config(&self, config: &JsonValue) -> Result<(), BackendError>;

    /// Human-readable description of this backend type.
    fn description(&self) -> &'static str {
        "Backend"
    }
}

/// Provider id → capability, plus the factories that can build them.
#[derive(Default)]
pub struct BackendRegistry {
    backends: RwLock<BTreeMap<String, Arc<dyn Backend>>>,
    factories: RwLock<BTreeMap<String, Arc<dyn BackendFactory>>>,
}

impl BackendRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under a provider id, replacing any previous one.
    pub fn register(&self, provider: impl Into<String>, backend: Arc<dyn Backend>) {
        self.backends.write().insert(provider.into(), backend);
    }

    /// Remove a backend. Returns true if it was registered.
    pub fn remove(&self, provider: &str) -> bool {
        self.backends.write().remove(provider).is_some()
    }

    /// Look up the backend for a provider.
    pub fn get(&self, provider: &str) -> Option<Arc<dyn Backend>> {
        self.backends.read().get(provider).cloned()
    }

    /// Check if a provider has a backend.
    pub fn contains(&self, provider: &str) -> bool {
        self.backends.read().contains_key(provider)
    }

    /// Registered provider ids, sorted.
    pub fn providers(&self) -> Vec<String> {
        self.backends.read().keys().cloned().collect()
    }

    /// Register a backend factory.
    ///
    /// If a factory with the same type already exists, it will be replaced.
    pub fn register_factory(&self, factory: Arc<dyn BackendFactory>) {
        self.factories
            .write()
            .insert(factory.backend_type().to_string(), factory);
    }

    /// List available backend types.
    pub fn available_types(&self) -> Vec<String> {
        self.factories.read().keys().cloned().collect()
    }

    /// Create a backend from configuration and register it.
    pub fn create(&self, provider: &str, config: &JsonValue) -> Result<(), BackendError> {
        let backend_type = config["type"].as_str().ok_or_else(|| {
            BackendError::NotConfigured(format!("Backend '{}' has no 'type'", provider))
        })?;

        let factory = self.factories.read().get(backend_type).cloned();
        let factory = factory.ok_or_else(|| {
            BackendError::NotConfigured(format!(
                "Unknown backend type: '{}'. Available: {:?}",
                backend_type,
                self.available_types()
            ))
        })?;

        factory.validate_config(config)?;
        let backend = factory.create(provider, config)?;
        self.register(provider, backend);
        Ok(())
    }

    /// Create and register every backend in a configuration section.
    pub fn load(&self, configs: &BTreeMap<String, JsonValue>) -> Result<usize, BackendError> {
        for (provider, config) in configs {
            self.create(provider, config)?;
            tracing::debug!(provider = %provider, "Registered backend from config");
        }
        Ok(configs.len())
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("providers", &self.providers())
            .field("types", &self.available_types())
            .finish()
    }
}
