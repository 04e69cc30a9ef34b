//! UI session blobs

use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, params};
use serde_json::json;

use crate::{SessionRecord, Store, now_stamp};

/// Keyed blob store for UI state. Last write wins.
#[derive(Debug, Clone)]
pub struct SessionStore {
    store: Store,
}

impl SessionStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn save(&self, conn_name: &str, name: &str, data: &serde_json::Value) -> Result<()> {
        let conn = self.store.connect()?;
        conn.execute(
            "INSERT INTO sessions (conn, name, data, updated_dt)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (conn, name) DO UPDATE SET
                data = excluded.data,
                updated_dt = excluded.updated_dt",
            params![conn_name, name, data.to_string(), now_stamp()],
        )
        .with_context(|| format!("Failed to save session {}/{}", conn_name, name))?;
        tracing::debug!(conn = %conn_name, name = %name, "session saved");
        Ok(())
    }

    /// Stored session, or a fresh one naming the connection when none exists
    pub fn load(&self, conn_name: &str, name: &str) -> Result<SessionRecord> {
        let conn = self.store.connect()?;
        let stored: Option<String> = conn
            .query_row(
                "SELECT data FROM sessions WHERE conn = ?1 AND name = ?2",
                params![conn_name, name],
                |row| row.get(0),
            )
            .optional()?;

        let data = match stored {
            Some(text) => serde_json::from_str(&text)
                .with_context(|| format!("Corrupt session {}/{}", conn_name, name))?,
            None => json!({ "connection": { "name": conn_name } }),
        };

        Ok(SessionRecord {
            conn: conn_name.to_string(),
            name: name.to_string(),
            data,
        })
    }
}
