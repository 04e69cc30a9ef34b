//! Driver registry: type tag to driver

use dbnet_core::DatabaseDriver;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of available database drivers
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn DatabaseDriver>>,
}

impl DriverRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with all built-in drivers registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(dbnet_driver_sqlite::SqliteDriver::new()));
        registry
    }

    pub fn register(&mut self, driver: Arc<dyn DatabaseDriver>) {
        let name = driver.name().to_string();
        tracing::debug!(driver = %name, "registering database driver");
        self.drivers.insert(name, driver);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DatabaseDriver>> {
        let driver = self.drivers.get(&name.to_lowercase()).cloned();
        if driver.is_none() {
            tracing::warn!(driver = %name, "driver not found in registry");
        }
        driver
    }

    /// Driver type tag answering to a URL scheme
    pub fn for_scheme(&self, scheme: &str) -> Option<&'static str> {
        let scheme = scheme.to_lowercase();
        self.drivers
            .values()
            .find(|d| d.name() == scheme || d.url_schemes().contains(&scheme.as_str()))
            .map(|d| d.name())
    }

    /// Registered type tags, sorted
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.drivers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}
