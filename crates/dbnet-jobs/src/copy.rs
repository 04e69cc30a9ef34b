//! Cursor-copy task engine
//!
//! Streams the source through a driver cursor and inserts into the target
//! object in multi-row batches inside one target transaction. The target
//! table must already exist.

use async_trait::async_trait;
use dbnet_connection::DriverRegistry;
use dbnet_core::{
    CancellationToken, Connection, ConnectionConfig, DatabaseDriver, DbnetError, ExecStatus,
    Result, Task, TaskConfig, TaskEngine, Transaction, Value,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    /// Delete the target rows, then load
    FullRefresh,
    Append,
}

impl CopyMode {
    pub fn parse(mode: &str) -> Result<Self> {
        match mode.trim().to_lowercase().as_str() {
            "" | "full-refresh" => Ok(CopyMode::FullRefresh),
            "append" => Ok(CopyMode::Append),
            other => Err(DbnetError::Config(format!("unsupported job mode '{}'", other))),
        }
    }
}

pub struct CursorCopyEngine {
    drivers: DriverRegistry,
    batch_size: usize,
}

impl CursorCopyEngine {
    pub fn new(drivers: DriverRegistry) -> Self {
        Self {
            drivers,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    fn driver(&self, config: Option<&ConnectionConfig>, side: &str) -> Result<Arc<dyn DatabaseDriver>> {
        let config = config
            .ok_or_else(|| DbnetError::Config(format!("{} connection is not resolved", side)))?;
        self.drivers.get(&config.driver).ok_or_else(|| {
            DbnetError::Config(format!("no driver for connection type '{}'", config.driver))
        })
    }
}

impl TaskEngine for CursorCopyEngine {
    fn new_task(&self, id: &str, config: TaskConfig) -> Result<Arc<dyn Task>> {
        let mode = CopyMode::parse(&config.mode)?;
        if config.source.stream.trim().is_empty() {
            return Err(DbnetError::Config("source stream is empty".into()));
        }
        if config.target.object.trim().is_empty() {
            return Err(DbnetError::Config("target object is empty".into()));
        }
        let source_driver = self.driver(config.source_conn.as_ref(), "source")?;
        let target_driver = self.driver(config.target_conn.as_ref(), "target")?;

        tracing::debug!(job_id = %id, mode = ?mode, "creating copy task");
        Ok(Arc::new(CopyTask {
            config,
            mode,
            source_driver,
            target_driver,
            batch_size: self.batch_size,
            state: Mutex::new(CopyState::default()),
            rows: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }))
    }
}

struct CopyState {
    status: ExecStatus,
    error: Option<String>,
    started: Option<Instant>,
    elapsed: Option<f64>,
}

impl Default for CopyState {
    fn default() -> Self {
        Self {
            status: ExecStatus::Created,
            error: None,
            started: None,
            elapsed: None,
        }
    }
}

struct CopyTask {
    config: TaskConfig,
    mode: CopyMode,
    source_driver: Arc<dyn DatabaseDriver>,
    target_driver: Arc<dyn DatabaseDriver>,
    batch_size: usize,
    state: Mutex<CopyState>,
    rows: AtomicU64,
    bytes: AtomicU64,
}

#[async_trait]
impl Task for CopyTask {
    fn task_type(&self) -> String {
        "db-db".to_string()
    }

    fn config(&self) -> &TaskConfig {
        &self.config
    }

    async fn execute(&self, cancel: CancellationToken) {
        {
            let mut state = self.state.lock();
            state.status = ExecStatus::Running;
            state.started = Some(Instant::now());
        }

        let outcome = self.copy(&cancel).await;

        let mut state = self.state.lock();
        state.elapsed = state.started.map(|s| s.elapsed().as_secs_f64());
        match outcome {
            Ok(()) => state.status = ExecStatus::Success,
            Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
                state.status = ExecStatus::Cancelled;
            }
            Err(e) => {
                state.status = ExecStatus::Error;
                state.error = Some(e.to_string());
            }
        }
    }

    fn status(&self) -> ExecStatus {
        self.state.lock().status
    }

    fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    fn progress(&self) -> f64 {
        let status = self.status();
        if status == ExecStatus::Success {
            return 100.0;
        }
        match self.config.source.limit {
            Some(limit) if limit > 0 => (self.rows() as f64 / limit as f64 * 100.0).min(100.0),
            _ => 0.0,
        }
    }

    fn rows(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }

    fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    fn rates(&self) -> (f64, f64) {
        let elapsed = {
            let state = self.state.lock();
            state
                .elapsed
                .or_else(|| state.started.map(|s| s.elapsed().as_secs_f64()))
                .unwrap_or_default()
        };
        if elapsed <= 0.0 {
            return (0.0, 0.0);
        }
        (self.rows() as f64 / elapsed, self.bytes() as f64 / elapsed)
    }
}

impl CopyTask {
    async fn copy(&self, cancel: &CancellationToken) -> Result<()> {
        let (Some(source_conn), Some(target_conn)) =
            (self.config.source_conn.as_ref(), self.config.target_conn.as_ref())
        else {
            return Err(DbnetError::Config("job connections are not resolved".into()));
        };
        let source = self.source_driver.connect(source_conn).await?;
        let target = self.target_driver.connect(target_conn).await?;

        let result = self.transfer(source.as_ref(), target.as_ref(), cancel).await;
        if let Err(e) = source.close().await {
            tracing::debug!(error = %e, "could not close source connection");
        }
        if let Err(e) = target.close().await {
            tracing::debug!(error = %e, "could not close target connection");
        }
        result
    }

    async fn transfer(
        &self,
        source: &dyn Connection,
        target: &dyn Connection,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let table = quote_table(target.driver_name(), &self.config.target.object);
        let tx = target.begin_transaction().await?;

        let loaded = self
            .load(source, target.driver_name(), &table, tx.as_ref(), cancel)
            .await;
        match loaded {
            Ok(()) if !cancel.is_cancelled() => tx.commit().await,
            Ok(()) => {
                tx.rollback().await?;
                Err(DbnetError::Cancelled)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "could not roll back copy");
                }
                Err(e)
            }
        }
    }

    async fn load(
        &self,
        source: &dyn Connection,
        target_driver: &str,
        table: &str,
        tx: &dyn Transaction,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.mode == CopyMode::FullRefresh {
            tx.execute(&format!("DELETE FROM {}", table), cancel).await?;
        }

        let sql = source_sql(source.driver_name(), &self.config.source.stream);
        let mut cursor = source.stream(&sql, cancel.clone()).await?;
        let columns: Vec<String> = cursor
            .columns()
            .iter()
            .map(|c| quote_identifier(target_driver, &c.name))
            .collect();
        let mut remaining = self.config.source.limit;

        let result = async {
            loop {
                if cancel.is_cancelled() {
                    return Err(DbnetError::Cancelled);
                }
                let want = match remaining {
                    Some(0) => break,
                    Some(n) => self.batch_size.min(usize::try_from(n).unwrap_or(usize::MAX)),
                    None => self.batch_size,
                };
                let page = cursor.fetch(Some(want)).await?;
                if !page.rows.is_empty() {
                    let (sql, size) = build_batch_insert_sql(table, &columns, &page.rows);
                    tx.execute(&sql, cancel).await?;
                    let count = page.rows.len() as u64;
                    self.rows.fetch_add(count, Ordering::Relaxed);
                    self.bytes.fetch_add(size as u64, Ordering::Relaxed);
                    remaining = remaining.map(|n| n.saturating_sub(count));
                }
                if page.exhausted {
                    break;
                }
            }
            Ok(())
        }
        .await;

        cursor.close();
        result
    }
}

/// `stream` is either a table reference or a full statement
pub(crate) fn source_sql(driver: &str, stream: &str) -> String {
    let stream = stream.trim().trim_end_matches(';');
    if stream.contains(char::is_whitespace) {
        return stream.to_string();
    }
    format!("SELECT * FROM {}", quote_table(driver, stream))
}

/// Quote each part of a possibly schema-qualified name
fn quote_table(driver: &str, name: &str) -> String {
    name.trim()
        .split('.')
        .map(|part| quote_identifier(driver, part))
        .collect::<Vec<_>>()
        .join(".")
}

/// Multi-row `INSERT` with inlined literals; returns the statement and the
/// payload size in bytes
pub(crate) fn build_batch_insert_sql(table: &str, columns: &[String], rows: &[Vec<Value>]) -> (String, usize) {
    let mut size = 0;
    let value_rows: Vec<String> = rows
        .iter()
        .map(|row| {
            let literals: Vec<String> = row.iter().map(value_to_sql).collect();
            size += literals.iter().map(String::len).sum::<usize>();
            format!("({})", literals.join(", "))
        })
        .collect();

    let sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        table,
        columns.join(", "),
        value_rows.join(", ")
    );
    (sql, size)
}

fn quote_identifier(driver: &str, name: &str) -> String {
    match driver {
        "mysql" => format!("`{}`", name.replace('`', "``")),
        "mssql" => format!("[{}]", name.replace(']', "]]")),
        _ => format!("\"{}\"", name.replace('"', "\"\"")),
    }
}

pub(crate) fn value_to_sql(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::Int64(i) => i.to_string(),
        Value::Float64(f) if f.is_finite() => f.to_string(),
        Value::Float64(_) => "NULL".to_string(),
        Value::Decimal(d) => d.clone(),
        Value::String(s) => quote_literal(s),
        Value::Bytes(b) => {
            let hex: String = b.iter().map(|byte| format!("{:02x}", byte)).collect();
            format!("X'{}'", hex)
        }
        Value::DateTime(dt) => quote_literal(&dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        Value::Json(j) => quote_literal(&j.to_string()),
    }
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
