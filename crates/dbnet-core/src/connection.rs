//! Connection, cursor and transaction traits

use crate::{
    CancellationToken, ColumnMeta, QueryResult, Result, SchemaIntrospection, TemplateCatalog,
    Value,
};
use async_trait::async_trait;
use std::collections::HashMap;

/// A live database connection
///
/// Every call that can block on the database takes or observes a
/// `CancellationToken`; drivers must unwind promptly once it fires.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "sqlite", "postgres")
    fn driver_name(&self) -> &str;

    /// Open a streaming cursor over a single statement. Rows are produced
    /// lazily as the caller drains the cursor.
    async fn stream(&self, sql: &str, cancel: CancellationToken) -> Result<Box<dyn RowCursor>>;

    /// Execute a statement that modifies data and return the affected row count
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute a query and materialize every row. Meant for small metadata queries.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Begin a transaction
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>>;

    /// Dialect-specific metadata and analysis SQL
    fn templates(&self) -> &TemplateCatalog;

    /// Session properties negotiated while connecting. The registry caches
    /// these and hands them back on the next connect for the same name.
    fn props(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;

    /// Get schema introspection interface if supported
    fn as_schema_introspection(&self) -> Option<&dyn SchemaIntrospection> {
        None
    }
}

/// One page drained from a cursor
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub rows: Vec<Vec<Value>>,
    /// The cursor reported end of data before the page filled up
    pub exhausted: bool,
}

/// A streaming result cursor, owned by exactly one execution
#[async_trait]
pub trait RowCursor: Send {
    fn columns(&self) -> &[ColumnMeta];

    /// Rows changed by a statement that returns no result set
    fn rows_affected(&self) -> Option<u64> {
        None
    }

    /// Next row, or `None` once the result is drained
    async fn next_row(&mut self) -> Result<Option<Vec<Value>>>;

    /// Release the underlying statement. Further reads return `None`.
    fn close(&mut self);

    /// Drain up to `limit` rows; `None` drains everything.
    async fn fetch(&mut self, limit: Option<usize>) -> Result<Page> {
        let mut page = Page::default();
        loop {
            if let Some(limit) = limit
                && page.rows.len() >= limit
            {
                return Ok(page);
            }
            match self.next_row().await? {
                Some(row) => page.rows.push(row),
                None => {
                    page.exhausted = true;
                    return Ok(page);
                }
            }
        }
    }
}

/// A database transaction
#[async_trait]
pub trait Transaction: Send + Sync {
    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;

    /// Execute a statement within the transaction, returning affected rows.
    /// A statement still running when `cancel` fires is interrupted.
    async fn execute(&self, sql: &str, cancel: &CancellationToken) -> Result<u64>;
}
