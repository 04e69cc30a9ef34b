//! A query held in the broker's live registry

use dbnet_core::{CancellationToken, RowCursor};
use dbnet_store::QueryRecord;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;

pub(crate) struct LiveQuery {
    pub record: Mutex<QueryRecord>,
    /// The open result cursor. Holding this lock is what makes a worker the
    /// single owner of the execution handle.
    pub cursor: tokio::sync::Mutex<Option<Box<dyn RowCursor>>>,
    pub cancel: CancellationToken,
    /// Database used for cache keys, the connection default when the
    /// submission named none
    pub database: String,
    done: watch::Sender<bool>,
    last_touch: Mutex<Instant>,
    delivered: AtomicBool,
    field_analysis: AtomicBool,
}

impl LiveQuery {
    pub fn new(record: QueryRecord, database: String) -> Arc<Self> {
        let (done, _) = watch::channel(false);
        Arc::new(Self {
            record: Mutex::new(record),
            cursor: tokio::sync::Mutex::new(None),
            cancel: CancellationToken::new(),
            database,
            done,
            last_touch: Mutex::new(Instant::now()),
            delivered: AtomicBool::new(false),
            field_analysis: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> String {
        self.record.lock().id.clone()
    }

    pub fn snapshot(&self) -> QueryRecord {
        self.record.lock().clone()
    }

    pub fn touch(&self) {
        *self.last_touch.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_touch.lock().elapsed()
    }

    /// Signal completion. Later calls are no-ops and nobody needs to listen.
    pub fn finish(&self) {
        self.done.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        *self.done.borrow()
    }

    /// Wait for completion for at most `limit`; `true` once finished
    pub async fn wait_done(&self, limit: Duration) -> bool {
        let mut rx = self.done.subscribe();
        matches!(
            tokio::time::timeout(limit, rx.wait_for(|done| *done)).await,
            Ok(Ok(_))
        )
    }

    pub fn is_delivered(&self) -> bool {
        self.delivered.load(Ordering::SeqCst)
    }

    /// Mark the first page as handed out; returns the previous value
    pub fn mark_delivered(&self) -> bool {
        self.delivered.swap(true, Ordering::SeqCst)
    }

    pub fn set_field_analysis(&self, enabled: bool) {
        self.field_analysis.store(enabled, Ordering::SeqCst);
    }

    pub fn is_field_analysis(&self) -> bool {
        self.field_analysis.load(Ordering::SeqCst)
    }

    /// Cancel the execution and release its cursor
    pub async fn shut(&self) {
        self.cancel.cancel();
        if let Some(mut cursor) = self.cursor.lock().await.take() {
            cursor.close();
        }
        self.finish();
    }
}
