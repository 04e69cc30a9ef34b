//! The query execution broker

use dbnet_connection::ConnectionRegistry;
use dbnet_core::{
    CancellationToken, Connection, DbnetError, DbtKey, Result, RowCursor, SqlCompiler, Value,
    Waited, is_templated,
};
use dbnet_store::{QueryRecord, QueryStatus, Store};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::field_stats::stats_rows;
use crate::live::LiveQuery;
use crate::{QueryBrokerConfig, SecondaryRequest, split_statements};

/// Records returned by the history procedures
const HISTORY_LIMIT: usize = 100;

/// Registry of live query executions.
///
/// The map lock is only ever held for the map operation itself. Each
/// execution is driven by one spawned worker; page reads serialize on the
/// query's own cursor lock.
pub struct QueryBroker {
    registry: Arc<ConnectionRegistry>,
    store: Store,
    compiler: Option<Arc<dyn SqlCompiler>>,
    config: QueryBrokerConfig,
    live: Mutex<HashMap<String, Arc<LiveQuery>>>,
}

/// Templated-SQL compilation for one submission
struct DbtStep {
    compiler: Option<Arc<dyn SqlCompiler>>,
    key: DbtKey,
}

enum Executed {
    Cursor(Box<dyn RowCursor>),
    Affected(u64),
}

impl QueryBroker {
    pub fn new(registry: Arc<ConnectionRegistry>, store: Store, config: QueryBrokerConfig) -> Self {
        Self {
            registry,
            store,
            compiler: None,
            config,
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Compile `{{ ... }}` text of dbt-enabled connections through `compiler`
    pub fn with_compiler(mut self, compiler: Arc<dyn SqlCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    pub fn config(&self) -> &QueryBrokerConfig {
        &self.config
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_live(&self, id: &str) -> bool {
        self.live.lock().contains_key(id)
    }

    fn get(&self, id: &str) -> Option<Arc<LiveQuery>> {
        self.live.lock().get(id).cloned()
    }

    /// Submit a query, or with `continuation` re-enter the wait on the
    /// already-registered query of the same id.
    ///
    /// With `wait` set the call blocks until the first page is ready or the
    /// continuation ticker fires, whichever comes first.
    #[tracing::instrument(
        skip(self, request),
        fields(
            query_id = %request.id,
            conn = %request.conn,
            sql_preview = %request.text.chars().take(50).collect::<String>()
        )
    )]
    pub async fn submit(&self, request: QueryRecord, continuation: bool) -> Result<Waited<QueryRecord>> {
        if continuation {
            let live = self.get(&request.id).ok_or_else(|| {
                DbnetError::NotFound(format!("could not find query {} to continue", request.id))
            })?;
            live.touch();
            tracing::debug!("continuing query");
            return self.respond(&live, true).await;
        }

        let wait = request.wait;
        let live = self.start(request).await?;
        self.respond(&live, wait).await
    }

    /// Next page of a live query. Unknown ids are `NotFound`, which callers
    /// answer by resubmitting.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_page(&self, id: &str, wait: bool) -> Result<Waited<QueryRecord>> {
        let live = self
            .get(id)
            .ok_or_else(|| DbnetError::NotFound(format!("could not find query {}", id)))?;
        live.touch();

        if !live.is_finished() {
            if !wait {
                return Ok(Waited::Ready(live.snapshot()));
            }
            if !live.wait_done(self.config.continue_after).await {
                return Ok(Waited::Pending(live.snapshot()));
            }
        }
        Ok(Waited::Ready(self.take_page(&live, true).await))
    }

    /// Cancel a live query, close its cursor and evict it
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, id: &str) -> Result<QueryRecord> {
        let live = self
            .live
            .lock()
            .remove(id)
            .ok_or_else(|| DbnetError::NotFound(format!("could not find query {}", id)))?;

        let record = mark_cancelled(&mut live.record.lock(), &live.cancel);
        live.shut().await;
        self.persist(&record);

        tracing::info!("query cancelled");
        Ok(record)
    }

    /// Evict every live query idle past the TTL, cancelling it first
    pub async fn expire(&self) -> usize {
        let stale: Vec<Arc<LiveQuery>> = {
            let mut live = self.live.lock();
            let ids: Vec<String> = live
                .iter()
                .filter(|(_, q)| q.idle_for() >= self.config.query_ttl)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| live.remove(id)).collect()
        };

        for query in &stale {
            tracing::debug!(query_id = %query.id(), "expiring idle query");
            self.retire(query).await;
        }
        stale.len()
    }

    /// Run [`expire`](Self::expire) every sweep interval until `shutdown` fires
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let broker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(broker.config.sweep_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let expired = broker.expire().await;
                        if expired > 0 {
                            tracing::info!(expired, "expired idle queries");
                        }
                    }
                }
            }
        })
    }

    /// Cancel and evict everything still live
    pub async fn shutdown(&self) {
        let all: Vec<Arc<LiveQuery>> = self.live.lock().drain().map(|(_, q)| q).collect();
        for query in &all {
            self.retire(query).await;
        }
    }

    /// Shut an evicted query, recording it as cancelled when it was still
    /// running. Settled records already hold their outcome.
    async fn retire(&self, query: &LiveQuery) {
        let unsettled = {
            let mut record = query.record.lock();
            (!record.status.is_settled()).then(|| mark_cancelled(&mut record, &query.cancel))
        };
        query.shut().await;
        if let Some(record) = unsettled {
            self.persist(&record);
        }
    }

    /// Render a named analysis template of a connection's dialect
    pub async fn analysis_sql(
        &self,
        conn: &str,
        database: &str,
        name: &str,
        data: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<String> {
        let handle = self.registry.resolve(conn, database).await?;
        handle.templates().analysis_sql(name, data)
    }

    /// The persisted record of a past execution
    pub fn cached_result(&self, id: &str) -> Result<QueryRecord> {
        self.store
            .load_query(id)?
            .ok_or_else(|| DbnetError::NotFound(format!("could not find query {}", id)))
    }

    /// Most recent queries of a connection
    pub fn get_latest(&self, conn: &str) -> Result<Vec<QueryRecord>> {
        Ok(self.store.latest_queries(conn, HISTORY_LIMIT)?)
    }

    /// Queries of a connection whose text contains `needle`
    pub fn search(&self, conn: &str, needle: &str) -> Result<Vec<QueryRecord>> {
        Ok(self.store.search_queries(conn, needle, HISTORY_LIMIT)?)
    }

    /// Dispatch a history procedure by name
    pub fn history(&self, conn: &str, procedure: &str, name: &str) -> Result<Vec<QueryRecord>> {
        match procedure {
            "get_latest" => self.get_latest(conn),
            "search" => self.search(conn, name),
            other => Err(DbnetError::Config(format!("unknown history procedure '{}'", other))),
        }
    }

    /// Register a fresh execution and spawn its worker
    async fn start(&self, mut record: QueryRecord) -> Result<Arc<LiveQuery>> {
        if record.id.is_empty() {
            record.id = uuid::Uuid::new_v4().to_string();
        }
        if record.limit == 0 {
            record.limit = self.config.default_limit as i64;
        }
        record.text = trim_separator(&record.text);
        record.time = now_millis();
        record.duration = 0.0;
        record.status = QueryStatus::Submitted;
        record.err.clear();
        record.headers.clear();
        record.rows.clear();
        record.affected = -1;

        let conn = self.registry.resolve(&record.conn, &record.database).await?;
        let config = self.registry.config(&record.conn, &record.database)?;
        let dbt = config.get_bool("dbt").then(|| DbtStep {
            compiler: self.compiler.clone(),
            key: DbtKey {
                project_dir: record.proj_dir.clone().into(),
                profile: config.get_string("profile").unwrap_or_default(),
                target: config.get_string("target").unwrap_or_default(),
            },
        });

        let live = LiveQuery::new(record.clone(), config.database().unwrap_or_default());
        let previous = self
            .live
            .lock()
            .insert(record.id.clone(), Arc::clone(&live));
        if let Some(previous) = previous {
            tracing::debug!("replacing live query with the same id");
            previous.shut().await;
        }
        self.persist(&record);

        tokio::spawn(execute(
            Arc::clone(&live),
            conn,
            dbt,
            self.store.clone(),
            self.config.history_row_cap,
        ));
        Ok(live)
    }

    async fn respond(&self, live: &Arc<LiveQuery>, wait: bool) -> Result<Waited<QueryRecord>> {
        if live.is_delivered() {
            return Ok(Waited::Ready(self.stored_snapshot(live)));
        }
        if !wait {
            return Ok(Waited::Ready(live.snapshot()));
        }
        if !live.wait_done(self.config.continue_after).await {
            return Ok(Waited::Pending(live.snapshot()));
        }
        Ok(Waited::Ready(self.take_page(live, false).await))
    }

    /// Hand out a page under the cursor lock. The first call delivers the
    /// execution outcome; later calls advance the cursor only when `advance`
    /// is set and otherwise repeat the stored snapshot.
    async fn take_page(&self, live: &LiveQuery, advance: bool) -> QueryRecord {
        let mut slot = live.cursor.lock().await;
        let first = !live.mark_delivered();
        if !first && !advance {
            return self.stored_snapshot(live);
        }

        let Some(cursor) = slot.as_mut() else {
            // Error, cancellation, DML count or a drained cursor
            let mut record = live.snapshot();
            if !first {
                record.rows.clear();
            }
            return record;
        };

        let limit = live.record.lock().limit;
        let page = cursor.fetch(usize::try_from(limit).ok()).await;

        let delivered = {
            let mut record = live.record.lock();
            match page {
                Ok(page) => {
                    record.rows = page
                        .rows
                        .iter()
                        .map(|row| row.iter().map(Value::to_json).collect())
                        .collect();
                    if page.exhausted {
                        record.status = QueryStatus::Completed;
                        if let Some(mut cursor) = slot.take() {
                            cursor.close();
                        }
                    } else {
                        record.status = QueryStatus::Fetched;
                    }
                }
                Err(e) => {
                    if let Some(mut cursor) = slot.take() {
                        cursor.close();
                    }
                    record.status = if e.is_cancelled() {
                        QueryStatus::Cancelled
                    } else {
                        QueryStatus::Errorred
                    };
                    record.err = e.to_string();
                    record.rows.clear();
                }
            }
            record.duration = elapsed_secs(record.time);
            let delivered = record.clone();
            record.rows.truncate(1);
            delivered
        };
        drop(slot);

        tracing::debug!(
            query_id = %delivered.id,
            rows = delivered.rows.len(),
            status = %delivered.status,
            "page delivered"
        );
        self.persist(&delivered);
        if first && live.is_field_analysis() {
            self.sync_field_stats(&delivered, &live.database);
        }
        delivered
    }

    /// The persisted record, or the in-memory one if the store has none
    fn stored_snapshot(&self, live: &LiveQuery) -> QueryRecord {
        match self.store.load_query(&live.id()) {
            Ok(Some(record)) => record,
            Ok(None) => live.snapshot(),
            Err(e) => {
                tracing::warn!(error = %e, "could not load stored query");
                live.snapshot()
            }
        }
    }

    fn persist(&self, record: &QueryRecord) {
        persist(&self.store, record, self.config.history_row_cap);
    }

    fn sync_field_stats(&self, record: &QueryRecord, database: &str) {
        let rows = stats_rows(record, database);
        if rows.is_empty() {
            return;
        }
        match self.store.upsert_column_stats(&rows) {
            Ok(()) => tracing::debug!(columns = rows.len(), "column statistics synced"),
            Err(e) => tracing::warn!(error = %e, "could not sync column statistics"),
        }
    }
}

/// The execution worker: owns the statement until it settles
/// Take ownership of a live record as cancelled. Callers hold the record
/// lock so the worker sees the token fired and leaves the record alone.
fn mark_cancelled(record: &mut QueryRecord, cancel: &CancellationToken) -> QueryRecord {
    cancel.cancel();
    record.status = QueryStatus::Cancelled;
    record.rows.clear();
    record.duration = elapsed_secs(record.time);
    record.clone()
}

async fn execute(
    live: Arc<LiveQuery>,
    conn: Arc<dyn Connection>,
    dbt: Option<DbtStep>,
    store: Store,
    row_cap: usize,
) {
    let outcome = run(&live, conn.as_ref(), dbt).await;

    let mut slot = live.cursor.lock().await;
    let settled = {
        let mut record = live.record.lock();
        if live.cancel.is_cancelled() {
            // Cancelled or evicted meanwhile; whoever did it owns the record
            if let Ok(Executed::Cursor(mut cursor)) = outcome {
                cursor.close();
            }
            None
        } else {
            match outcome {
                Ok(Executed::Cursor(cursor)) => {
                    record.headers = cursor.columns().iter().map(|c| c.name.clone()).collect();
                    record.status = QueryStatus::Completed;
                    *slot = Some(cursor);
                }
                Ok(Executed::Affected(affected)) => {
                    record.affected = affected as i64;
                    record.status = QueryStatus::Completed;
                }
                Err(e) => {
                    tracing::warn!(query_id = %record.id, error = %e, "query failed");
                    record.status = QueryStatus::Errorred;
                    record.err = e.to_string();
                }
            }
            record.duration = elapsed_secs(record.time);
            Some(record.clone())
        }
    };
    drop(slot);

    if let Some(record) = settled {
        persist(&store, &record, row_cap);
    }
    live.finish();
}

async fn run(live: &LiveQuery, conn: &dyn Connection, dbt: Option<DbtStep>) -> Result<Executed> {
    let (id, mut text) = {
        let record = live.record.lock();
        (record.id.clone(), record.text.clone())
    };

    if let Some(step) = dbt
        && is_templated(&text)
    {
        text = step
            .compile(&id, &text, &live.cancel)
            .await
            .map_err(|e| match e {
                DbnetError::Cancelled => e,
                e => DbnetError::Subprocess(format!("could not compile dbt query: {}", e)),
            })?;
    }

    if let Some(request) = SecondaryRequest::parse(&text)? {
        let sql = request.resolve(conn.templates())?;
        live.set_field_analysis(request.is_field_analysis());
        text = format!("{}\n\n{}", text, sql);
    }
    live.record.lock().text = text.clone();

    tracing::debug!(query_id = %id, "submitting\n{}", text);

    let statements = split_statements(&text);
    match statements.as_slice() {
        [] => Err(DbnetError::Config("no SQL statement to execute".into())),
        [single] => {
            let mut cursor = conn.stream(single, live.cancel.clone()).await?;
            match cursor.rows_affected() {
                Some(affected) => {
                    cursor.close();
                    Ok(Executed::Affected(affected))
                }
                None => Ok(Executed::Cursor(cursor)),
            }
        }
        many => {
            let tx = conn.begin_transaction().await?;
            let mut affected = 0;
            for statement in many {
                let result = if live.cancel.is_cancelled() {
                    Err(DbnetError::Cancelled)
                } else {
                    tx.execute(statement, &live.cancel).await
                };
                match result {
                    Ok(n) => affected += n,
                    Err(e) => {
                        if let Err(rollback) = tx.rollback().await {
                            tracing::warn!(error = %rollback, "rollback failed");
                        }
                        return Err(e);
                    }
                }
            }
            tx.commit().await?;
            Ok(Executed::Affected(affected))
        }
    }
}

impl DbtStep {
    async fn compile(&self, id: &str, text: &str, cancel: &CancellationToken) -> Result<String> {
        let compiler = self
            .compiler
            .as_ref()
            .ok_or_else(|| DbnetError::Config("no dbt compiler configured".into()))?;
        compiler.compile(&self.key, id, text, cancel).await
    }
}

fn persist(store: &Store, record: &QueryRecord, row_cap: usize) {
    let mut stored = record.clone();
    stored.rows.truncate(row_cap);
    if let Err(e) = store.save_query(&stored) {
        tracing::warn!(query_id = %record.id, error = %e, "could not persist query");
    }
}

fn trim_separator(text: &str) -> String {
    let text = text.trim();
    text.strip_suffix(';').unwrap_or(text).to_string()
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn elapsed_secs(since_millis: i64) -> f64 {
    (now_millis() - since_millis) as f64 / 1000.0
}
