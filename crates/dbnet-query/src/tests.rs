use super::*;
use async_trait::async_trait;
use dbnet_connection::{ConnectionRegistry, DriverRegistry};
use dbnet_core::{
    CancellationToken, ColumnMeta, Connection, ConnectionConfig, DatabaseDriver, DbnetError,
    DbtKey, QueryResult, Result, RowCursor, SqlCompiler, TemplateCatalog, Transaction, Value,
    Waited,
};
use dbnet_store::{MetaScope, QueryRecord, QueryStatus, Store};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

const LONG_COUNT: &str = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 50000000) SELECT count(*) FROM c";

struct VecCursor {
    columns: Vec<ColumnMeta>,
    rows: VecDeque<Vec<Value>>,
}

#[async_trait]
impl RowCursor for VecCursor {
    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    async fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        Ok(self.rows.pop_front())
    }

    fn close(&mut self) {
        self.rows.clear();
    }
}

/// Answers every statement with `rows` integers after `delay`
struct SlowConnection {
    delay: Duration,
    rows: i64,
    templates: TemplateCatalog,
}

#[async_trait]
impl Connection for SlowConnection {
    fn driver_name(&self) -> &str {
        "slow"
    }

    async fn stream(&self, _sql: &str, cancel: CancellationToken) -> Result<Box<dyn RowCursor>> {
        tokio::select! {
            _ = cancel.cancelled() => return Err(DbnetError::Cancelled),
            _ = tokio::time::sleep(self.delay) => {}
        }
        Ok(Box::new(VecCursor {
            columns: vec![ColumnMeta::new("n", "INTEGER", 0)],
            rows: (1..=self.rows).map(|i| vec![Value::Int64(i)]).collect(),
        }))
    }

    async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<u64> {
        Ok(0)
    }

    async fn query(&self, _sql: &str, _params: &[Value]) -> Result<QueryResult> {
        Ok(QueryResult::empty())
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        Err(DbnetError::Driver("not supported".into()))
    }

    fn templates(&self) -> &TemplateCatalog {
        &self.templates
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }
}

struct SlowDriver;

#[async_trait]
impl DatabaseDriver for SlowDriver {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn url_schemes(&self) -> &'static [&'static str] {
        &["slow"]
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        let delay_ms: u64 = config
            .get_string("delay_ms")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(Arc::new(SlowConnection {
            delay: Duration::from_millis(delay_ms),
            rows: 7,
            templates: TemplateCatalog::default(),
        }))
    }
}

#[derive(Default)]
struct StubCompiler {
    calls: AtomicUsize,
    keys: parking_lot::Mutex<Vec<DbtKey>>,
}

#[async_trait]
impl SqlCompiler for StubCompiler {
    async fn compile(
        &self,
        key: &DbtKey,
        _name: &str,
        sql: &str,
        _cancel: &CancellationToken,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.keys.lock().push(key.clone());
        Ok(sql.replace("{{ ref('items') }}", "items"))
    }
}

struct Fixture {
    dir: TempDir,
    registry: Arc<ConnectionRegistry>,
    store: Store,
}

impl Fixture {
    /// A sqlite `LOCAL` connection holding `items` with `rows` rows
    async fn new(rows: i64) -> Self {
        let dir = TempDir::new().unwrap();
        let mut drivers = DriverRegistry::with_defaults();
        drivers.register(Arc::new(SlowDriver));
        let registry = ConnectionRegistry::new(drivers);
        registry.insert(
            ConnectionConfig::new("sqlite", "LOCAL")
                .with_param("path", dir.path().join("app.db").to_string_lossy().to_string()),
        );
        registry.insert(ConnectionConfig::new("slow", "SLOW").with_param("delay_ms", 600));
        registry.insert(ConnectionConfig::new("slow", "FAST"));

        let conn = registry.resolve("LOCAL", "").await.unwrap();
        conn.execute(
            "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT, price REAL)",
            &[],
        )
        .await
        .unwrap();
        conn.execute(
            &format!(
                "WITH RECURSIVE s(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM s WHERE i < {}) \
                 INSERT INTO items (id, name, price) SELECT i, 'item-' || i, i * 1.5 FROM s",
                rows
            ),
            &[],
        )
        .await
        .unwrap();

        let store = Store::open(dir.path().join("dbnet.db")).unwrap();
        Self {
            dir,
            registry: Arc::new(registry),
            store,
        }
    }

    fn broker(&self, config: QueryBrokerConfig) -> QueryBroker {
        QueryBroker::new(self.registry.clone(), self.store.clone(), config)
    }
}

fn request(id: &str, conn: &str, text: &str, limit: i64, wait: bool) -> QueryRecord {
    QueryRecord {
        id: id.into(),
        conn: conn.into(),
        text: text.into(),
        limit,
        wait,
        ..Default::default()
    }
}

fn ready(reply: Waited<QueryRecord>) -> QueryRecord {
    assert!(!reply.is_pending(), "expected a settled reply");
    reply.into_inner()
}

#[tokio::test]
async fn test_first_page_then_remainder() {
    let f = Fixture::new(150).await;
    let broker = f.broker(QueryBrokerConfig::default());

    let first = ready(
        broker
            .submit(request("q1", "LOCAL", "SELECT * FROM items LIMIT 138;", 100, true), false)
            .await
            .unwrap(),
    );
    assert_eq!(first.status, QueryStatus::Fetched);
    assert_eq!(first.rows.len(), 100);
    assert_eq!(first.headers, vec!["id", "name", "price"]);
    assert_eq!(first.affected, -1);
    assert_eq!(first.text, "SELECT * FROM items LIMIT 138");

    let rest = ready(broker.fetch_page("q1", true).await.unwrap());
    assert_eq!(rest.status, QueryStatus::Completed);
    assert_eq!(rest.rows.len(), 38);
    assert_eq!(rest.rows[0][0], json!(101));

    let drained = ready(broker.fetch_page("q1", true).await.unwrap());
    assert!(drained.rows.is_empty());
    assert_eq!(drained.status, QueryStatus::Completed);
}

#[tokio::test]
async fn test_persisted_rows_are_capped() {
    let f = Fixture::new(60).await;
    let broker = f.broker(QueryBrokerConfig {
        history_row_cap: 5,
        ..Default::default()
    });

    let reply = ready(
        broker
            .submit(request("capped", "LOCAL", "SELECT id FROM items", 50, true), false)
            .await
            .unwrap(),
    );
    assert_eq!(reply.rows.len(), 50);

    let stored = broker.cached_result("capped").unwrap();
    assert_eq!(stored.rows.len(), 5);
    assert_eq!(stored.status, QueryStatus::Fetched);

    let err = broker.cached_result("nope").err().unwrap();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_zero_limit_uses_default_and_negative_drains() {
    let f = Fixture::new(130).await;
    let broker = f.broker(QueryBrokerConfig::default());

    let paged = ready(
        broker
            .submit(request("a", "LOCAL", "SELECT id FROM items", 0, true), false)
            .await
            .unwrap(),
    );
    assert_eq!(paged.limit, 100);
    assert_eq!(paged.rows.len(), 100);

    let all = ready(
        broker
            .submit(request("b", "LOCAL", "SELECT id FROM items", -1, true), false)
            .await
            .unwrap(),
    );
    assert_eq!(all.rows.len(), 130);
    assert_eq!(all.status, QueryStatus::Completed);
}

#[tokio::test]
async fn test_cancel_long_statement() {
    let f = Fixture::new(1).await;
    let broker = f.broker(QueryBrokerConfig::default());

    let submitted = ready(
        broker
            .submit(request("long", "LOCAL", LONG_COUNT, 100, false), false)
            .await
            .unwrap(),
    );
    assert_eq!(submitted.status, QueryStatus::Submitted);

    let cancelled = broker.cancel("long").await.unwrap();
    assert_eq!(cancelled.status, QueryStatus::Cancelled);
    assert!(cancelled.rows.is_empty());
    assert!(!broker.is_live("long"));

    let err = broker.fetch_page("long", true).await.err().unwrap();
    assert!(err.is_not_found());
    let again = broker.cancel("long").await.err().unwrap();
    assert!(again.is_not_found());

    // The worker unwinds without overwriting the cancelled record
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        broker.cached_result("long").unwrap().status,
        QueryStatus::Cancelled
    );
}

#[tokio::test]
async fn test_continuation_matches_immediate_result() {
    let f = Fixture::new(1).await;
    let broker = f.broker(QueryBrokerConfig {
        continue_after: Duration::from_millis(150),
        ..Default::default()
    });

    let fast = ready(
        broker
            .submit(request("fast", "FAST", "select n", 100, true), false)
            .await
            .unwrap(),
    );

    let mut reply = broker
        .submit(request("slow", "SLOW", "select n", 100, true), false)
        .await
        .unwrap();
    assert!(reply.is_pending());
    assert_eq!(reply.clone().into_inner().status, QueryStatus::Submitted);

    let mut rounds = 0;
    while reply.is_pending() {
        rounds += 1;
        assert!(rounds < 20, "continuation never settled");
        reply = broker
            .submit(request("slow", "SLOW", "", 0, true), true)
            .await
            .unwrap();
    }
    let slow = reply.into_inner();
    assert_eq!(slow.rows, fast.rows);
    assert_eq!(slow.headers, fast.headers);
    assert_eq!(slow.status, QueryStatus::Completed);

    // Continuing a delivered query returns the stored snapshot
    let repeat = ready(
        broker
            .submit(request("slow", "SLOW", "", 0, true), true)
            .await
            .unwrap(),
    );
    assert_eq!(repeat.rows, slow.rows);
}

#[tokio::test]
async fn test_continuation_of_unknown_query() {
    let f = Fixture::new(1).await;
    let broker = f.broker(QueryBrokerConfig::default());
    let err = broker
        .submit(request("ghost", "LOCAL", "", 0, true), true)
        .await
        .err()
        .unwrap();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_concurrent_fetches_never_share_rows() {
    let f = Fixture::new(100).await;
    let broker = Arc::new(f.broker(QueryBrokerConfig::default()));

    let first = ready(
        broker
            .submit(request("pages", "LOCAL", "SELECT id FROM items ORDER BY id", 10, true), false)
            .await
            .unwrap(),
    );
    let mut seen: Vec<i64> = first.rows.iter().map(|r| r[0].as_i64().unwrap()).collect();

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let broker = broker.clone();
            tokio::spawn(async move { broker.fetch_page("pages", true).await.unwrap().into_inner() })
        })
        .collect();
    for handle in handles {
        let page = handle.await.unwrap();
        assert!(page.rows.len() <= 10);
        seen.extend(page.rows.iter().map(|r| r[0].as_i64().unwrap()));
    }

    let unique: HashSet<i64> = seen.iter().copied().collect();
    assert_eq!(unique.len(), seen.len());
    assert_eq!(seen.len(), 100);
}

#[tokio::test]
async fn test_dml_reports_affected_rows() {
    let f = Fixture::new(10).await;
    let broker = f.broker(QueryBrokerConfig::default());

    let single = ready(
        broker
            .submit(
                request("upd", "LOCAL", "UPDATE items SET price = 0 WHERE id <= 4", 0, true),
                false,
            )
            .await
            .unwrap(),
    );
    assert_eq!(single.status, QueryStatus::Completed);
    assert_eq!(single.affected, 4);
    assert!(single.rows.is_empty());

    let multi = ready(
        broker
            .submit(
                request(
                    "multi",
                    "LOCAL",
                    "DELETE FROM items WHERE id = 1; UPDATE items SET name = 'x;y' WHERE id > 8;",
                    0,
                    true,
                ),
                false,
            )
            .await
            .unwrap(),
    );
    assert_eq!(multi.status, QueryStatus::Completed);
    assert_eq!(multi.affected, 3);
}

#[tokio::test]
async fn test_failed_batch_rolls_back() {
    let f = Fixture::new(3).await;
    let broker = f.broker(QueryBrokerConfig::default());

    let failed = ready(
        broker
            .submit(
                request("bad", "LOCAL", "DELETE FROM items; SELECT * FROM missing_table", 0, true),
                false,
            )
            .await
            .unwrap(),
    );
    assert_eq!(failed.status, QueryStatus::Errorred);
    assert!(failed.err.contains("missing_table"));

    let count = ready(
        broker
            .submit(request("count", "LOCAL", "SELECT count(*) FROM items", 0, true), false)
            .await
            .unwrap(),
    );
    assert_eq!(count.rows, vec![vec![json!(3)]]);
}

#[tokio::test]
async fn test_cancelled_batch_is_interrupted_and_rolled_back() {
    let f = Fixture::new(10).await;
    let broker = f.broker(QueryBrokerConfig::default());

    let batch = format!("DELETE FROM items; {}", LONG_COUNT);
    broker
        .submit(request("batch", "LOCAL", &batch, 0, false), false)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    broker.cancel("batch").await.unwrap();

    // The write lock taken by the DELETE is only released once the running
    // statement is interrupted and the transaction rolled back
    let insert = tokio::time::timeout(
        Duration::from_secs(3),
        broker.submit(
            request("insert", "LOCAL", "INSERT INTO items (id, name) VALUES (11, 'late')", 0, true),
            false,
        ),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(ready(insert).status, QueryStatus::Completed);

    let count = ready(
        broker
            .submit(request("count", "LOCAL", "SELECT count(*) FROM items", 0, true), false)
            .await
            .unwrap(),
    );
    assert_eq!(count.rows, vec![vec![json!(11)]]);
}

#[tokio::test]
async fn test_field_analysis_syncs_column_stats() {
    let f = Fixture::new(4).await;
    let broker = f.broker(QueryBrokerConfig::default());

    let text = r#"/*--{"analysis": "field_stat", "data": {"schema": "main", "table": "items", "fields": ["name", "price"]}}--*/"#;
    let reply = ready(
        broker
            .submit(request("stats", "LOCAL", text, 0, true), false)
            .await
            .unwrap(),
    );
    assert_eq!(reply.status, QueryStatus::Completed, "{}", reply.err);
    assert_eq!(reply.rows.len(), 2);
    assert!(reply.text.contains("union all"));

    let scope = MetaScope::new("LOCAL", "").with_schema("main").with_table("items");
    let stats = f.store.read_column_stats(&scope).unwrap();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].column_name, "name");
    assert_eq!(stats[0].tot_cnt, 4);
    assert_eq!(stats[0].f_dstct_cnt, 4);
    assert!(stats[0].last_analyzed.is_some());
}

#[tokio::test]
async fn test_metadata_envelope_and_unknown_envelope() {
    let f = Fixture::new(1).await;
    let broker = f.broker(QueryBrokerConfig::default());

    let tables = ready(
        broker
            .submit(
                request("meta", "LOCAL", r#"/*@{"metadata": "tables", "data": {"schema": "main"}}@*/"#, 0, true),
                false,
            )
            .await
            .unwrap(),
    );
    assert_eq!(tables.status, QueryStatus::Completed, "{}", tables.err);
    assert_eq!(tables.rows[0][0], json!("items"));

    let unknown = ready(
        broker
            .submit(request("odd", "LOCAL", "/*--{\"report\": \"x\"}--*/", 0, true), false)
            .await
            .unwrap(),
    );
    assert_eq!(unknown.status, QueryStatus::Errorred);
    assert!(unknown.err.contains("neither an analysis nor a metadata"));
}

#[tokio::test]
async fn test_dbt_text_is_compiled_first() {
    let f = Fixture::new(3).await;
    f.registry.insert(
        ConnectionConfig::new("sqlite", "WAREHOUSE")
            .with_param("path", f.dir.path().join("app.db").to_string_lossy().to_string())
            .with_param("dbt", true)
            .with_param("profile", "shop")
            .with_param("target", "dev"),
    );
    let compiler = Arc::new(StubCompiler::default());
    let broker = f
        .broker(QueryBrokerConfig::default())
        .with_compiler(compiler.clone());

    let mut req = request("dbt", "WAREHOUSE", "select count(*) from {{ ref('items') }}", 0, true);
    req.proj_dir = "/projects/shop".into();
    let reply = ready(broker.submit(req, false).await.unwrap());
    assert_eq!(reply.status, QueryStatus::Completed, "{}", reply.err);
    assert_eq!(reply.text, "select count(*) from items");
    assert_eq!(reply.rows, vec![vec![json!(3)]]);

    let keys = compiler.keys.lock().clone();
    assert_eq!(
        keys,
        vec![DbtKey {
            project_dir: "/projects/shop".into(),
            profile: "shop".into(),
            target: "dev".into(),
        }]
    );

    // Non-dbt connections pass braces through untouched
    let plain = ready(
        broker
            .submit(request("plain", "LOCAL", "select '{{x}}' as t", 0, true), false)
            .await
            .unwrap(),
    );
    assert_eq!(plain.rows, vec![vec![json!("{{x}}")]]);
    assert_eq!(compiler.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dbt_without_compiler_fails_the_query() {
    let f = Fixture::new(1).await;
    f.registry.insert(
        ConnectionConfig::new("sqlite", "DBT")
            .with_param("path", f.dir.path().join("app.db").to_string_lossy().to_string())
            .with_param("dbt", "true"),
    );
    let broker = f.broker(QueryBrokerConfig::default());
    let reply = ready(
        broker
            .submit(request("x", "DBT", "select {{ 1 }}", 0, true), false)
            .await
            .unwrap(),
    );
    assert_eq!(reply.status, QueryStatus::Errorred);
    assert!(reply.err.contains("could not compile dbt query"));
}

#[tokio::test]
async fn test_resubmitting_a_live_id_replaces_it() {
    let f = Fixture::new(5).await;
    let broker = f.broker(QueryBrokerConfig::default());

    broker
        .submit(request("tab1", "LOCAL", LONG_COUNT, 0, false), false)
        .await
        .unwrap();
    let reply = ready(
        broker
            .submit(request("tab1", "LOCAL", "SELECT 1 AS one", 0, true), false)
            .await
            .unwrap(),
    );
    assert_eq!(reply.rows, vec![vec![json!(1)]]);
    assert_eq!(broker.live_count(), 1);
}

#[tokio::test]
async fn test_idle_queries_expire() {
    let f = Fixture::new(20).await;
    let broker = f.broker(QueryBrokerConfig {
        query_ttl: Duration::from_millis(50),
        ..Default::default()
    });

    ready(
        broker
            .submit(request("idle", "LOCAL", "SELECT id FROM items", 5, true), false)
            .await
            .unwrap(),
    );
    assert_eq!(broker.expire().await, 0);

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(broker.expire().await, 1);
    assert!(broker.fetch_page("idle", true).await.err().unwrap().is_not_found());
}

#[tokio::test]
async fn test_expiring_a_running_query_records_it_cancelled() {
    let f = Fixture::new(1).await;
    let broker = f.broker(QueryBrokerConfig {
        query_ttl: Duration::from_millis(50),
        ..Default::default()
    });

    broker
        .submit(request("stuck", "LOCAL", LONG_COUNT, 0, false), false)
        .await
        .unwrap();
    ready(
        broker
            .submit(request("done", "LOCAL", "SELECT id FROM items", 0, true), false)
            .await
            .unwrap(),
    );
    assert_eq!(
        broker.cached_result("stuck").unwrap().status,
        QueryStatus::Submitted
    );

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(broker.expire().await, 2);

    let stuck = broker.cached_result("stuck").unwrap();
    assert_eq!(stuck.status, QueryStatus::Cancelled);
    assert!(stuck.duration > 0.0);
    // A settled query keeps its outcome
    let done = broker.cached_result("done").unwrap().status;
    assert!(done.is_settled());
    assert_ne!(done, QueryStatus::Cancelled);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        broker.cached_result("stuck").unwrap().status,
        QueryStatus::Cancelled
    );
}

#[tokio::test]
async fn test_concurrent_submissions_with_one_id_keep_a_single_live_query() {
    let f = Fixture::new(5).await;
    let broker = f.broker(QueryBrokerConfig::default());

    let (first, second) = tokio::join!(
        broker.submit(request("tab2", "LOCAL", LONG_COUNT, 0, false), false),
        broker.submit(request("tab2", "LOCAL", LONG_COUNT, 0, false), false),
    );
    first.unwrap();
    second.unwrap();
    assert_eq!(broker.live_count(), 1);

    let cancelled = broker.cancel("tab2").await.unwrap();
    assert_eq!(cancelled.status, QueryStatus::Cancelled);
    assert_eq!(broker.live_count(), 0);

    // Neither worker is left to overwrite the record
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        broker.cached_result("tab2").unwrap().status,
        QueryStatus::Cancelled
    );
}

#[tokio::test]
async fn test_sweeper_stops_on_shutdown() {
    let f = Fixture::new(1).await;
    let broker = Arc::new(f.broker(QueryBrokerConfig {
        query_ttl: Duration::from_millis(10),
        sweep_interval: Duration::from_millis(20),
        ..Default::default()
    }));
    let shutdown = CancellationToken::new();
    let sweeper = broker.spawn_sweeper(shutdown.clone());

    broker
        .submit(request("s", "LOCAL", "SELECT 1", 0, true), false)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(broker.live_count(), 0);

    shutdown.cancel();
    sweeper.await.unwrap();
}

#[tokio::test]
async fn test_history_procedures() {
    let f = Fixture::new(2).await;
    let broker = f.broker(QueryBrokerConfig::default());

    for (id, text) in [("h1", "SELECT id FROM items"), ("h2", "SELECT name FROM items")] {
        ready(broker.submit(request(id, "LOCAL", text, 0, true), false).await.unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let latest = broker.history("local", "get_latest", "").unwrap();
    let ids: Vec<_> = latest.iter().map(|q| q.id.as_str()).collect();
    assert_eq!(ids, vec!["h2", "h1"]);

    let found = broker.history("LOCAL", "search", "NAME").unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, "h2");

    assert!(matches!(
        broker.history("LOCAL", "purge", ""),
        Err(DbnetError::Config(_))
    ));
}

#[tokio::test]
async fn test_analysis_sql_renders_template() {
    let f = Fixture::new(1).await;
    let broker = f.broker(QueryBrokerConfig::default());

    let data = json!({"schema": "main", "table": "items", "fields": ["id"]});
    let sql = broker
        .analysis_sql("local", "", "field_stat", data.as_object().unwrap())
        .await
        .unwrap();
    assert!(sql.contains(r#"from "main"."items""#));

    let err = broker
        .analysis_sql("local", "", "nope", data.as_object().unwrap())
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("did not find Analysis: nope"));
}

#[tokio::test]
async fn test_unknown_connection_is_rejected_before_registering() {
    let f = Fixture::new(1).await;
    let broker = f.broker(QueryBrokerConfig::default());
    let err = broker
        .submit(request("q", "MISSING", "select 1", 0, true), false)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, DbnetError::ConnectionNotFound(_)));
    assert_eq!(broker.live_count(), 0);
}

#[test]
fn test_split_statements() {
    assert_eq!(split_statements("SELECT 1; SELECT 2;"), vec!["SELECT 1", "SELECT 2"]);
    assert_eq!(
        split_statements("SELECT 'a;b', \"c;d\" FROM t; SELECT 'it''s'"),
        vec!["SELECT 'a;b', \"c;d\" FROM t", "SELECT 'it''s'"]
    );
    assert_eq!(
        split_statements("SELECT 1 -- trailing; note\n; /* a; b */ SELECT 2"),
        vec!["SELECT 1 -- trailing; note", "/* a; b */ SELECT 2"]
    );
    assert_eq!(split_statements("select 1; -- done"), vec!["select 1"]);
    assert!(split_statements("  ;  /* only a comment */ ").is_empty());
}

#[test]
fn test_secondary_request_parsing() {
    assert_eq!(SecondaryRequest::parse("select 1").unwrap(), None);

    let request = SecondaryRequest::parse("/*--\nanalysis: field_stat\ndata:\n  schema: main\n--*/")
        .unwrap()
        .unwrap();
    assert!(request.is_field_analysis());
    match &request {
        SecondaryRequest::Analysis { name, data } => {
            assert_eq!(name, "field_stat");
            assert_eq!(data.get("schema"), Some(&json!("main")));
        }
        other => panic!("unexpected request: {:?}", other),
    }

    let metadata = SecondaryRequest::parse(r#"/*@{"metadata": "ddl_table"}@*/"#)
        .unwrap()
        .unwrap();
    assert!(!metadata.is_field_analysis());
    let templates = TemplateCatalog::default().with_metadata("ddl_table", "select 1");
    assert_eq!(metadata.resolve(&templates).unwrap(), "select 1");

    assert!(matches!(
        SecondaryRequest::parse(r#"/*--{"analysis": "a", "metadata": "b"}--*/"#),
        Err(DbnetError::Config(_))
    ));
    assert!(matches!(
        SecondaryRequest::parse("/*--[not, a, map--*/"),
        Err(DbnetError::Config(_))
    ));
}
