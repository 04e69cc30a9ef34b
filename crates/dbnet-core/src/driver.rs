//! Database driver trait definition

use crate::{Connection, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A database driver: turns a resolved configuration into a live connection
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Type tag this driver answers to (e.g., "sqlite", "postgres")
    fn name(&self) -> &'static str;

    /// URL schemes that select this driver when no explicit type is given
    fn url_schemes(&self) -> &'static [&'static str] {
        &[]
    }

    /// Establish a session
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>>;

    /// Connect and run a trivial statement
    async fn test_connection(&self, config: &ConnectionConfig) -> Result<()> {
        let conn = self.connect(config).await?;
        conn.query("SELECT 1", &[]).await?;
        conn.close().await
    }
}

/// Connection configuration: a driver type tag plus a credential/config bag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Logical name (upper case)
    pub name: String,
    /// Driver type tag
    #[serde(rename = "type")]
    pub driver: String,
    /// Credentials and settings; includes `url` when discovered from one
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl ConnectionConfig {
    pub fn new(driver: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            driver: driver.to_string(),
            params: BTreeMap::new(),
        }
    }

    /// Set a connection parameter
    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.set_param(key, value);
        self
    }

    pub fn set_param(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        let str_val = match value.into() {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        self.params.insert(key.to_string(), str_val);
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.params.get(key).cloned()
    }

    /// Truthy parameter ("true", "1", "yes", "on", case-insensitive)
    pub fn get_bool(&self, key: &str) -> bool {
        self.params
            .get(key)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"))
            .unwrap_or(false)
    }

    pub fn database(&self) -> Option<String> {
        self.get_string("database")
    }
}
