//! Streaming cursor over a single SQLite statement
//!
//! rusqlite statements borrow their connection, so the statement lives on a
//! blocking worker that steps rows into a bounded channel. The cursor is the
//! receiving end. Dropping or closing it makes the next send fail, which ends
//! the worker and releases the connection lock. Cancellation interrupts a
//! statement that is still stepping.

use async_trait::async_trait;
use dbnet_core::{CancellationToken, ColumnMeta, DbnetError, Result, RowCursor, Value};
use parking_lot::Mutex;
use rusqlite::{Connection as RusqliteConnection, InterruptHandle};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::connection::{rusqlite_to_value, statement_columns};

const ROW_BUFFER: usize = 256;

type RowMessage = Result<Vec<Value>>;

struct StatementHead {
    columns: Vec<ColumnMeta>,
    rows_affected: Option<u64>,
}

pub struct SqliteCursor {
    columns: Vec<ColumnMeta>,
    rows_affected: Option<u64>,
    rows: Option<mpsc::Receiver<RowMessage>>,
}

impl SqliteCursor {
    pub(crate) async fn open(
        conn: Arc<Mutex<RusqliteConnection>>,
        interrupt: Arc<InterruptHandle>,
        sql: String,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let (head_tx, head_rx) = oneshot::channel::<Result<StatementHead>>();
        let (row_tx, row_rx) = mpsc::channel::<RowMessage>(ROW_BUFFER);
        let (done_tx, done_rx) = oneshot::channel::<()>();

        let worker_cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            step_statement(&conn, &sql, &worker_cancel, head_tx, row_tx);
            let _ = done_tx.send(());
        });

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("interrupting SQLite statement");
                    interrupt.interrupt();
                }
                _ = done_rx => {}
            }
        });

        let head = head_rx
            .await
            .map_err(|_| DbnetError::Driver("statement worker exited unexpectedly".into()))??;

        Ok(Self {
            columns: head.columns,
            rows_affected: head.rows_affected,
            rows: Some(row_rx),
        })
    }
}

#[async_trait]
impl RowCursor for SqliteCursor {
    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }

    async fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        let Some(rows) = self.rows.as_mut() else {
            return Ok(None);
        };
        match rows.recv().await {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => {
                self.rows = None;
                Err(e)
            }
            None => {
                self.rows = None;
                Ok(None)
            }
        }
    }

    fn close(&mut self) {
        if let Some(mut rows) = self.rows.take() {
            rows.close();
        }
    }
}

fn step_statement(
    conn: &Mutex<RusqliteConnection>,
    sql: &str,
    cancel: &CancellationToken,
    head_tx: oneshot::Sender<Result<StatementHead>>,
    row_tx: mpsc::Sender<RowMessage>,
) {
    let conn = conn.lock();
    let mut stmt = match conn.prepare(sql) {
        Ok(stmt) => stmt,
        Err(e) => {
            let _ = head_tx.send(Err(driver_error(e, cancel)));
            return;
        }
    };

    let columns = statement_columns(&stmt);
    if columns.is_empty() {
        let head = stmt
            .execute([])
            .map(|n| StatementHead {
                columns: Vec::new(),
                rows_affected: Some(n as u64),
            })
            .map_err(|e| driver_error(e, cancel));
        let _ = head_tx.send(head);
        return;
    }

    let width = columns.len();
    let mut rows = match stmt.query([]) {
        Ok(rows) => rows,
        Err(e) => {
            let _ = head_tx.send(Err(driver_error(e, cancel)));
            return;
        }
    };
    let head = StatementHead {
        columns,
        rows_affected: None,
    };
    if head_tx.send(Ok(head)).is_err() {
        return;
    }

    loop {
        if cancel.is_cancelled() {
            let _ = row_tx.blocking_send(Err(DbnetError::Cancelled));
            return;
        }
        let message = match rows.next() {
            Ok(Some(row)) => (0..width)
                .map(|i| rusqlite_to_value(row, i))
                .collect::<Result<Vec<_>>>(),
            Ok(None) => return,
            Err(e) => Err(driver_error(e, cancel)),
        };
        let failed = message.is_err();
        // A closed receiver means the cursor was dropped
        if row_tx.blocking_send(message).is_err() || failed {
            return;
        }
    }
}

fn driver_error(e: rusqlite::Error, cancel: &CancellationToken) -> DbnetError {
    if cancel.is_cancelled() {
        DbnetError::Cancelled
    } else {
        DbnetError::Driver(e.to_string())
    }
}
