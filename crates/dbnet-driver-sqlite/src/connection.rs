//! SQLite connection implementation

use async_trait::async_trait;
use dbnet_core::{
    CancellationToken, ColumnInfo, ColumnMeta, Connection, DatabaseInfo, DbnetError, QueryResult,
    Result, Row, RowCursor, SchemaInfo, SchemaIntrospection, TableInfo, TableType,
    TemplateCatalog, Transaction, Value,
};
use parking_lot::Mutex;
use rusqlite::{Connection as RusqliteConnection, InterruptHandle, OpenFlags, params_from_iter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::SqliteCursor;

/// SQLite connection wrapper
pub struct SqliteConnection {
    conn: Arc<Mutex<RusqliteConnection>>,
    interrupt_handle: Arc<InterruptHandle>,
    templates: TemplateCatalog,
    path: String,
    closed: AtomicBool,
}

impl SqliteConnection {
    /// Open a SQLite database
    pub fn open(path: &str) -> Result<Self> {
        tracing::info!(path = %path, "opening SQLite database");
        let expanded_path = Self::expand_path(path)?;

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = if path == ":memory:" {
            RusqliteConnection::open_in_memory().map_err(|e| {
                DbnetError::ConnectionFailed(format!("Failed to open in-memory database: {}", e))
            })?
        } else {
            if !expanded_path.starts_with("file:") {
                let file_path = std::path::Path::new(&expanded_path);
                if let Some(parent) = file_path.parent()
                    && !parent.exists()
                {
                    return Err(DbnetError::ConnectionFailed(format!(
                        "Parent directory does not exist: {}",
                        parent.display()
                    )));
                }
            }

            RusqliteConnection::open_with_flags(&expanded_path, flags).map_err(|e| {
                DbnetError::ConnectionFailed(format!(
                    "Failed to open SQLite database at '{}': {}",
                    expanded_path, e
                ))
            })?
        };

        conn.pragma_update(None, "foreign_keys", "ON").map_err(|e| {
            DbnetError::ConnectionFailed(format!("Failed to enable foreign keys: {}", e))
        })?;
        conn.busy_timeout(std::time::Duration::from_secs(5)).map_err(|e| {
            DbnetError::ConnectionFailed(format!("Failed to set busy timeout: {}", e))
        })?;

        // Taken before the connection moves into the mutex
        let interrupt_handle = Arc::new(conn.get_interrupt_handle());

        tracing::debug!(path = %expanded_path, "SQLite database connection established");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt_handle,
            templates: crate::sqlite_templates(),
            path: expanded_path,
            closed: AtomicBool::new(false),
        })
    }

    /// Expand `~` and make relative paths absolute
    fn expand_path(path: &str) -> Result<String> {
        if path == ":memory:" || path.starts_with("file:") {
            return Ok(path.to_string());
        }

        let expanded = if let Some(rest) = path.strip_prefix("~/") {
            match std::env::var_os("HOME") {
                Some(home) => std::path::PathBuf::from(home)
                    .join(rest)
                    .to_string_lossy()
                    .to_string(),
                None => {
                    return Err(DbnetError::Config(
                        "Unable to determine HOME directory".into(),
                    ));
                }
            }
        } else if path.starts_with('~') {
            return Err(DbnetError::Config(
                "User-specific home directories (~user) are not supported".into(),
            ));
        } else {
            path.to_string()
        };

        let path_buf = std::path::PathBuf::from(&expanded);
        if path_buf.is_relative() {
            Ok(std::env::current_dir()?
                .join(path_buf)
                .to_string_lossy()
                .to_string())
        } else {
            Ok(expanded)
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DbnetError::Driver("connection is closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    fn driver_name(&self) -> &str {
        "sqlite"
    }

    #[tracing::instrument(skip(self, sql, cancel), fields(sql_preview = %sql.chars().take(50).collect::<String>()))]
    async fn stream(&self, sql: &str, cancel: CancellationToken) -> Result<Box<dyn RowCursor>> {
        self.ensure_open()?;
        let cursor = SqliteCursor::open(
            Arc::clone(&self.conn),
            Arc::clone(&self.interrupt_handle),
            sql.to_string(),
            cancel,
        )
        .await?;
        Ok(Box::new(cursor))
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(50).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.ensure_open()?;
        let conn = self.conn.lock();
        let rusqlite_params = values_to_rusqlite(params);

        let rows_affected = conn
            .execute(sql, params_from_iter(rusqlite_params.iter()))
            .map_err(|e| DbnetError::Driver(format!("Failed to execute statement: {}", e)))?;

        tracing::debug!(affected_rows = rows_affected, "statement executed");
        Ok(rows_affected as u64)
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(50).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.ensure_open()?;
        let start_time = std::time::Instant::now();

        let conn = self.conn.lock();
        let rusqlite_params = values_to_rusqlite(params);

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| DbnetError::Driver(format!("Failed to prepare query: {}", e)))?;

        let columns = statement_columns(&stmt);
        let column_names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();

        let mut rows = Vec::new();
        let mut query_rows = stmt
            .query(params_from_iter(rusqlite_params.iter()))
            .map_err(|e| DbnetError::Driver(format!("Failed to execute query: {}", e)))?;

        while let Some(row) = query_rows
            .next()
            .map_err(|e| DbnetError::Driver(format!("Failed to fetch row: {}", e)))?
        {
            let values = (0..columns.len())
                .map(|i| rusqlite_to_value(row, i))
                .collect::<Result<Vec<_>>>()?;
            rows.push(Row::new(column_names.clone(), values));
        }

        let execution_time_ms = start_time.elapsed().as_millis() as u64;
        tracing::debug!(
            row_count = rows.len(),
            execution_time_ms = execution_time_ms,
            "query executed successfully"
        );
        Ok(QueryResult {
            columns,
            rows,
            execution_time_ms,
        })
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        self.ensure_open()?;
        tracing::debug!("beginning SQLite transaction");
        {
            let conn = self.conn.lock();
            conn.execute_batch("BEGIN DEFERRED")
                .map_err(|e| DbnetError::Driver(format!("Failed to begin transaction: {}", e)))?;
        }
        Ok(Box::new(SqliteTransaction {
            conn: Arc::clone(&self.conn),
            interrupt_handle: Arc::clone(&self.interrupt_handle),
            finished: AtomicBool::new(false),
        }))
    }

    fn templates(&self) -> &TemplateCatalog {
        &self.templates
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(path = %self.path, "closing SQLite connection");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn as_schema_introspection(&self) -> Option<&dyn SchemaIntrospection> {
        Some(self)
    }
}

#[async_trait]
impl SchemaIntrospection for SqliteConnection {
    #[tracing::instrument(skip(self))]
    async fn list_databases(&self) -> Result<Vec<DatabaseInfo>> {
        let result = self
            .query("SELECT name FROM pragma_database_list ORDER BY seq", &[])
            .await?;
        Ok(result
            .first_column()
            .into_iter()
            .map(|name| DatabaseInfo { name })
            .collect())
    }

    #[tracing::instrument(skip(self))]
    async fn list_schemas(&self) -> Result<Vec<SchemaInfo>> {
        // Attached databases double as schemas
        Ok(self
            .list_databases()
            .await?
            .into_iter()
            .map(|db| SchemaInfo { name: db.name })
            .collect())
    }

    #[tracing::instrument(skip(self))]
    async fn list_tables(&self, schema: Option<&str>) -> Result<Vec<TableInfo>> {
        self.list_master_objects(schema, TableType::Table).await
    }

    #[tracing::instrument(skip(self))]
    async fn list_views(&self, schema: Option<&str>) -> Result<Vec<TableInfo>> {
        self.list_master_objects(schema, TableType::View).await
    }

    #[tracing::instrument(skip(self))]
    async fn get_columns(&self, schema: Option<&str>, table: &str) -> Result<Vec<ColumnInfo>> {
        let schema = schema.unwrap_or("main");
        tracing::trace!(schema = %schema, table = %table, "fetching column information");
        let result = self
            .query(
                &format!(
                    "PRAGMA {}.table_info({})",
                    quote_ident(schema),
                    quote_literal(table)
                ),
                &[],
            )
            .await?;

        let columns = result
            .rows
            .iter()
            .map(|row| {
                let cid = row.get(0).and_then(|v| v.as_i64()).unwrap_or(0) as usize;
                let name = row
                    .get(1)
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let data_type = row
                    .get(2)
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let nullable = row.get(3).and_then(|v| v.as_i64()).unwrap_or(0) == 0;
                let (precision, scale) = parse_type_precision(&data_type);

                ColumnInfo {
                    name,
                    ordinal: cid + 1,
                    data_type,
                    nullable,
                    precision,
                    scale,
                }
            })
            .collect();

        Ok(columns)
    }
}

impl SqliteConnection {
    async fn list_master_objects(
        &self,
        schema: Option<&str>,
        table_type: TableType,
    ) -> Result<Vec<TableInfo>> {
        let schema = schema.unwrap_or("main");
        let kind = match table_type {
            TableType::Table => "table",
            TableType::View => "view",
        };
        let sql = format!(
            "SELECT name FROM {}.sqlite_master WHERE type = ?1 AND name NOT LIKE 'sqlite_%' ORDER BY name",
            quote_ident(schema)
        );
        let result = self.query(&sql, &[Value::String(kind.into())]).await?;

        let objects: Vec<TableInfo> = result
            .first_column()
            .into_iter()
            .map(|name| TableInfo {
                schema: Some(schema.to_string()),
                name,
                table_type,
            })
            .collect();
        tracing::debug!(count = objects.len(), kind = kind, "objects listed");
        Ok(objects)
    }
}

/// SQLite transaction wrapper.
///
/// Issues raw `BEGIN DEFERRED` / `COMMIT` / `ROLLBACK` so it can share the
/// connection mutex without rusqlite's borrow-based transaction lifetime.
pub struct SqliteTransaction {
    conn: Arc<Mutex<RusqliteConnection>>,
    interrupt_handle: Arc<InterruptHandle>,
    finished: AtomicBool,
}

impl SqliteTransaction {
    fn finish(&self, sql: &str) -> Result<()> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return Err(DbnetError::Driver("Transaction already finished".into()));
        }
        let conn = self.conn.lock();
        conn.execute_batch(sql)
            .map_err(|e| DbnetError::Driver(format!("Failed to {} transaction: {}", sql.to_lowercase(), e)))
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if !self.finished.load(Ordering::Acquire) {
            tracing::warn!("SQLite transaction dropped without commit or rollback, issuing automatic rollback");
            let conn = self.conn.lock();
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                tracing::error!(error = %e, "automatic rollback on drop failed");
            }
        }
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        tracing::debug!("committing SQLite transaction");
        self.finish("COMMIT")
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        tracing::debug!("rolling back SQLite transaction");
        self.finish("ROLLBACK")
    }

    async fn execute(&self, sql: &str, cancel: &CancellationToken) -> Result<u64> {
        tracing::debug!(sql_preview = %sql.chars().take(50).collect::<String>(), "executing statement in SQLite transaction");
        if cancel.is_cancelled() {
            return Err(DbnetError::Cancelled);
        }

        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        let worker_cancel = cancel.clone();
        let mut work = tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            if worker_cancel.is_cancelled() {
                return Err(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_INTERRUPT),
                    None,
                ));
            }
            run_statement(&conn, &sql)
        });

        let joined = tokio::select! {
            joined = &mut work => joined,
            _ = cancel.cancelled() => {
                tracing::debug!("interrupting SQLite statement in transaction");
                self.interrupt_handle.interrupt();
                work.await
            }
        };

        match joined {
            Ok(Ok(affected)) => Ok(affected),
            Ok(Err(_)) if cancel.is_cancelled() => Err(DbnetError::Cancelled),
            Ok(Err(e)) => Err(DbnetError::Driver(format!("Failed to execute statement: {}", e))),
            Err(e) => Err(DbnetError::Driver(format!("statement worker failed: {}", e))),
        }
    }
}

/// Run one statement to completion. Statements that produce rows are
/// stepped through and report zero changes.
fn run_statement(conn: &RusqliteConnection, sql: &str) -> rusqlite::Result<u64> {
    let mut stmt = conn.prepare(sql)?;
    if stmt.column_count() == 0 {
        return stmt.execute([]).map(|n| n as u64);
    }
    let mut rows = stmt.query([])?;
    while rows.next()?.is_some() {}
    Ok(0)
}

pub(crate) fn statement_columns(stmt: &rusqlite::Statement<'_>) -> Vec<ColumnMeta> {
    stmt.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| ColumnMeta::new(col.name(), col.decl_type().unwrap_or("DYNAMIC"), idx))
        .collect()
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `DECIMAL(10,2)` -> (Some(10), Some(2))
pub(crate) fn parse_type_precision(data_type: &str) -> (Option<i32>, Option<i32>) {
    let Some(open) = data_type.find('(') else {
        return (None, None);
    };
    let Some(close) = data_type[open..].find(')') else {
        return (None, None);
    };
    let mut parts = data_type[open + 1..open + close]
        .split(',')
        .map(|p| p.trim().parse::<i32>().ok());
    let precision = parts.next().flatten();
    let scale = parts.next().flatten();
    (precision, scale)
}

fn values_to_rusqlite(values: &[Value]) -> Vec<rusqlite::types::Value> {
    values.iter().map(value_to_rusqlite).collect()
}

fn value_to_rusqlite(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(i64::from(*b)),
        Value::Int64(i) => rusqlite::types::Value::Integer(*i),
        Value::Float64(f) => rusqlite::types::Value::Real(*f),
        Value::Decimal(d) => rusqlite::types::Value::Text(d.clone()),
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        Value::Bytes(b) => rusqlite::types::Value::Blob(b.clone()),
        Value::DateTime(dt) => rusqlite::types::Value::Text(dt.to_string()),
        Value::Json(j) => rusqlite::types::Value::Text(j.to_string()),
    }
}

pub(crate) fn rusqlite_to_value(row: &rusqlite::Row, idx: usize) -> Result<Value> {
    use rusqlite::types::ValueRef;

    let value_ref = row
        .get_ref(idx)
        .map_err(|e| DbnetError::Driver(e.to_string()))?;

    let value = match value_ref {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).to_string()),
        // Untyped columns often hold text in blobs
        ValueRef::Blob(b) => match std::str::from_utf8(b) {
            Ok(s) => Value::String(s.to_string()),
            Err(_) => Value::Bytes(b.to_vec()),
        },
    };

    Ok(value)
}
