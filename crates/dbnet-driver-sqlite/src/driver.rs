//! SQLite driver implementation

use async_trait::async_trait;
use dbnet_core::{Connection, ConnectionConfig, DatabaseDriver, DbnetError, Result};
use std::sync::Arc;

use crate::SqliteConnection;

/// SQLite database driver
pub struct SqliteDriver;

impl SqliteDriver {
    pub fn new() -> Self {
        tracing::debug!("SQLite driver initialized");
        Self
    }

    /// Database file named by the configuration. `path` wins; `database` is
    /// accepted too unless it names the built-in `main` schema.
    fn database_path(config: &ConnectionConfig) -> Result<String> {
        config
            .get_string("path")
            .or_else(|| config.database().filter(|db| !db.eq_ignore_ascii_case("main")))
            .ok_or_else(|| {
                DbnetError::Config(format!(
                    "SQLite connection {} requires a 'path' parameter, e.g. sqlite:///path/to/database.db",
                    config.name
                ))
            })
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseDriver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn url_schemes(&self) -> &'static [&'static str] {
        &["sqlite", "sqlite3", "file"]
    }

    #[tracing::instrument(skip(self, config), fields(conn = %config.name))]
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        let path = Self::database_path(config)?;

        let conn = SqliteConnection::open(&path).map_err(|e| {
            tracing::error!(error = %e, "failed to connect to SQLite database");
            e
        })?;

        tracing::info!(path = %conn.path(), "SQLite connection created");
        Ok(Arc::new(conn))
    }
}
