//! Connection registry: logical name to live driver handle

use dbnet_core::{Connection, ConnectionConfig, DbnetError, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use crate::{DriverRegistry, discover_env_vars, load_env_file};

/// Upper-case, with `/` replaced by `_`
pub fn normalize_name(name: &str) -> String {
    name.trim().to_uppercase().replace('/', "_")
}

struct Entry {
    config: ConnectionConfig,
    /// Session properties negotiated by the last successful connect
    props: HashMap<String, String>,
    /// Registered through `insert`; survives a reload that does not find it
    pinned: bool,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<String, Entry>,
    handles: HashMap<(String, String), Arc<dyn Connection>>,
}

/// Resolves logical connection names to connected driver handles.
///
/// The lock guards only map reads and writes; connecting happens outside it.
pub struct ConnectionRegistry {
    drivers: DriverRegistry,
    env_file: Option<PathBuf>,
    scan_env_vars: bool,
    reuse_handles: bool,
    state: Mutex<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new(drivers: DriverRegistry) -> Self {
        Self {
            drivers,
            env_file: None,
            scan_env_vars: false,
            reuse_handles: false,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Read connections from this `env.yaml` on reload
    pub fn with_env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file = Some(path.into());
        self
    }

    /// Also treat process environment variables holding URLs as connections
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.scan_env_vars = enabled;
        self
    }

    /// Keep connected handles per (name, database) and hand them out again
    /// while they stay open
    pub fn with_handle_reuse(mut self, enabled: bool) -> Self {
        self.reuse_handles = enabled;
        self
    }

    pub fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }

    /// Register a connection directly, replacing any entry of the same name
    pub fn insert(&self, mut config: ConnectionConfig) {
        config.name = normalize_name(&config.name);
        let mut state = self.state.lock();
        state.handles.retain(|(name, _), _| name != &config.name);
        state.entries.insert(
            config.name.clone(),
            Entry {
                config,
                props: HashMap::new(),
                pinned: true,
            },
        );
    }

    /// Re-read the discovery sources. Entries found again keep their cached
    /// session properties; entries that disappeared are dropped along with
    /// any reusable handles. Connections registered with
    /// [`insert`](Self::insert) are kept. Returns the number of known
    /// connections.
    #[tracing::instrument(skip(self))]
    pub fn reload(&self) -> Result<usize> {
        let mut discovered: BTreeMap<String, ConnectionConfig> = BTreeMap::new();
        if self.scan_env_vars {
            for config in discover_env_vars(std::env::vars(), &self.drivers) {
                discovered.insert(config.name.clone(), config);
            }
        }
        // The env file wins over a variable of the same name
        if let Some(path) = &self.env_file {
            for config in load_env_file(path, &self.drivers)? {
                discovered.insert(config.name.clone(), config);
            }
        }

        let mut state = self.state.lock();
        let mut previous = std::mem::take(&mut state.entries);
        for (name, config) in discovered {
            let props = match previous.remove(&name) {
                Some(entry) if entry.config == config => entry.props,
                _ => HashMap::new(),
            };
            state.entries.insert(
                name,
                Entry {
                    config,
                    props,
                    pinned: false,
                },
            );
        }
        for (name, entry) in previous.into_iter().filter(|(_, e)| e.pinned) {
            state.entries.insert(name, entry);
        }
        let count = state.entries.len();
        let live: Vec<String> = state.entries.keys().cloned().collect();
        state.handles.retain(|(name, _), _| live.contains(name));

        tracing::debug!(count, "connections reloaded");
        Ok(count)
    }

    /// Known connection names, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stored configurations, sorted by name
    pub fn entries(&self) -> Vec<ConnectionConfig> {
        let mut configs: Vec<ConnectionConfig> = self
            .state
            .lock()
            .entries
            .values()
            .map(|e| e.config.clone())
            .collect();
        configs.sort_by(|a, b| a.name.cmp(&b.name));
        configs
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.lock().entries.contains_key(&normalize_name(name))
    }

    /// The configuration a connect for (`name`, `database`) would use:
    /// tagged with the application name, database override lower-cased,
    /// and transport-level `url` and `schema` removed.
    pub fn config(&self, name: &str, database: &str) -> Result<ConnectionConfig> {
        let name = normalize_name(name);
        let stored = {
            let state = self.state.lock();
            state
                .entries
                .get(&name)
                .map(|e| e.config.clone())
                .ok_or_else(|| DbnetError::ConnectionNotFound(name.clone()))?
        };

        let mut config = ConnectionConfig::new(&stored.driver, &stored.name);
        config.set_param("application", "DbNet");
        config.params.extend(stored.params);
        if !database.is_empty() {
            config.set_param("database", database.to_lowercase());
        }
        config.params.remove("url");
        config.params.remove("schema");
        Ok(config)
    }

    /// Default database of a connection, empty when it names none
    pub fn default_database(&self, name: &str) -> Result<String> {
        Ok(self.config(name, "")?.database().unwrap_or_default())
    }

    /// Connect (or reuse a handle) for `name`, optionally overriding the database
    #[tracing::instrument(skip(self), fields(conn = %name, database = %database))]
    pub async fn resolve(&self, name: &str, database: &str) -> Result<Arc<dyn Connection>> {
        let name = normalize_name(name);
        let handle_key = (name.clone(), database.to_lowercase());

        if self.reuse_handles {
            let existing = self.state.lock().handles.get(&handle_key).cloned();
            match existing {
                Some(conn) if !conn.is_closed() => {
                    tracing::trace!("reusing connection handle");
                    return Ok(conn);
                }
                Some(_) => {
                    self.state.lock().handles.remove(&handle_key);
                }
                None => {}
            }
        }

        let config = self.config(&name, database)?;
        let driver = self.drivers.get(&config.driver).ok_or_else(|| {
            DbnetError::Config(format!("no driver for connection type '{}'", config.driver))
        })?;

        // Cached properties first, so explicit settings take precedence
        let cached_props = self
            .state
            .lock()
            .entries
            .get(&name)
            .map(|e| e.props.clone())
            .unwrap_or_default();
        let mut merged = ConnectionConfig::new(&config.driver, &config.name);
        merged.params.extend(cached_props);
        merged.params.extend(config.params);

        let conn = driver.connect(&merged).await.map_err(|e| match e {
            DbnetError::Config(_) | DbnetError::ConnectionFailed(_) => e,
            other => DbnetError::ConnectionFailed(format!(
                "could not connect to {}: {}",
                name, other
            )),
        })?;

        {
            let mut state = self.state.lock();
            if let Some(entry) = state.entries.get_mut(&name) {
                entry.props = conn.props();
            }
            if self.reuse_handles {
                state.handles.insert(handle_key, Arc::clone(&conn));
            }
        }

        tracing::debug!(driver = %merged.driver, "connection resolved");
        Ok(conn)
    }

    /// Connect and run the driver's health check
    #[tracing::instrument(skip(self))]
    pub async fn test(&self, name: &str) -> Result<()> {
        let config = self.config(name, "")?;
        let driver = self.drivers.get(&config.driver).ok_or_else(|| {
            DbnetError::Config(format!("no driver for connection type '{}'", config.driver))
        })?;
        driver.test_connection(&config).await
    }
}
