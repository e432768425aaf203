use paybridge_core::PaymentAdapter;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Plugin {0} is already registered")]
    Duplicate(String),
    #[error("No adapter registered for plugin {0}")]
    NotFound(String),
}

/// Plugin name to adapter instance. Filled at startup and read-only afterwards.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn PaymentAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn PaymentAdapter>) -> Result<(), RegistryError> {
        let name = adapter.name().to_string();
        if self.adapters.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        info!(plugin = %name, "Registered payment adapter");
        self.adapters.insert(name, adapter);
        Ok(())
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn PaymentAdapter>) -> Result<Self, RegistryError> {
        self.register(adapter)?;
        Ok(self)
    }

    pub fn get(&self, plugin_name: &str) -> Result<Arc<dyn PaymentAdapter>, RegistryError> {
        self.adapters
            .get(plugin_name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(plugin_name.to_string()))
    }

    pub fn plugin_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }
}
