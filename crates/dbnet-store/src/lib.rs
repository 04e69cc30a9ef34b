//! SQLite persistence for the broker
//!
//! One embedded database holds the schema-metadata cache (`schema_tables`,
//! `table_columns`, `table_column_stats`), execution history (`queries`,
//! `jobs`) and UI `sessions`. Every write is an upsert keyed by the table's
//! composite primary key that updates only the listed columns.

mod history;
mod metadata;
mod records;
mod sessions;

pub use metadata::MetaScope;
pub use records::*;
pub use sessions::SessionStore;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Handle to the broker database. Cheap to clone; each operation opens its
/// own short-lived connection.
#[derive(Debug, Clone)]
pub struct Store {
    db_path: PathBuf,
}

impl Store {
    /// Open (and create if needed) the store at `db_path`
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create store directory {:?}", parent))?;
        }

        let store = Self { db_path };
        store.initialize_schema()?;
        tracing::debug!(path = ?store.db_path, "store opened");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)
            .with_context(|| format!("Failed to open store database at {:?}", self.db_path))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to set journal mode")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_tables (
                conn TEXT NOT NULL,
                database_name TEXT NOT NULL,
                schema_name TEXT NOT NULL,
                table_name TEXT NOT NULL,
                is_view INTEGER NOT NULL DEFAULT 0,
                num_rows INTEGER,
                updated_dt TEXT NOT NULL,
                PRIMARY KEY (conn, database_name, schema_name, table_name)
            );

            CREATE TABLE IF NOT EXISTS table_columns (
                conn TEXT NOT NULL,
                database_name TEXT NOT NULL,
                schema_name TEXT NOT NULL,
                table_name TEXT NOT NULL,
                column_name TEXT NOT NULL,
                data_type TEXT NOT NULL,
                position INTEGER NOT NULL,
                precision INTEGER,
                scale INTEGER,
                updated_dt TEXT NOT NULL,
                PRIMARY KEY (conn, database_name, schema_name, table_name, column_name)
            );

            CREATE TABLE IF NOT EXISTS table_column_stats (
                conn TEXT NOT NULL,
                database_name TEXT NOT NULL,
                schema_name TEXT NOT NULL,
                table_name TEXT NOT NULL,
                column_name TEXT NOT NULL,
                tot_cnt INTEGER NOT NULL DEFAULT 0,
                f_cnt INTEGER NOT NULL DEFAULT 0,
                f_dstct_cnt INTEGER NOT NULL DEFAULT 0,
                f_null_cnt INTEGER NOT NULL DEFAULT 0,
                f_min_len INTEGER NOT NULL DEFAULT 0,
                f_max_len INTEGER NOT NULL DEFAULT 0,
                last_analyzed TEXT NOT NULL,
                PRIMARY KEY (conn, database_name, schema_name, table_name, column_name)
            );

            CREATE TABLE IF NOT EXISTS queries (
                id TEXT PRIMARY KEY,
                conn TEXT NOT NULL,
                database_name TEXT NOT NULL DEFAULT '',
                tab TEXT NOT NULL DEFAULT '',
                text TEXT NOT NULL,
                time INTEGER NOT NULL,
                duration REAL NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                err TEXT NOT NULL DEFAULT '',
                headers TEXT NOT NULL DEFAULT '[]',
                result_rows TEXT NOT NULL DEFAULT '[]',
                row_limit INTEGER NOT NULL DEFAULT 0,
                wait INTEGER NOT NULL DEFAULT 0,
                affected INTEGER NOT NULL DEFAULT -1,
                proj_dir TEXT NOT NULL DEFAULT '',
                updated_dt TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_queries_conn_time ON queries(conn, time);

            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                type TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL,
                error TEXT NOT NULL DEFAULT '',
                request TEXT NOT NULL DEFAULT '{}',
                result TEXT NOT NULL DEFAULT '{}',
                time INTEGER NOT NULL,
                duration REAL NOT NULL DEFAULT 0,
                updated_dt TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                conn TEXT NOT NULL,
                name TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_dt TEXT NOT NULL,
                PRIMARY KEY (conn, name)
            );",
        )
        .context("Failed to initialize store schema")?;

        Ok(())
    }
}

fn now_stamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
