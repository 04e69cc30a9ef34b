use super::*;
use async_trait::async_trait;
use dbnet_connection::{ConnectionRegistry, DriverRegistry};
use dbnet_core::{
    CancellationToken, ColumnInfo, Connection, ConnectionConfig, DatabaseDriver, DatabaseInfo,
    DbnetError, QueryResult, Result, RowCursor, SchemaInfo, SchemaIntrospection, TableInfo,
    TableType, TemplateCatalog, Transaction, Value,
};
use dbnet_store::{ColumnStatsRow, MetaScope, Store};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// A database with a `public` schema whose objects tests can rewrite
struct StubWarehouse {
    templates: TemplateCatalog,
    schemas: Mutex<Vec<String>>,
    tables: Mutex<Vec<TableInfo>>,
    column_calls: AtomicUsize,
    table_calls: AtomicUsize,
}

impl StubWarehouse {
    fn new() -> Self {
        Self {
            templates: TemplateCatalog::default(),
            schemas: Mutex::new(vec!["public".into()]),
            tables: Mutex::new(vec![
                table("Orders", TableType::Table),
                table("customers", TableType::Table),
                table("Order_Totals", TableType::View),
            ]),
            column_calls: AtomicUsize::new(0),
            table_calls: AtomicUsize::new(0),
        }
    }
}

fn table(name: &str, table_type: TableType) -> TableInfo {
    table_in("public", name, table_type)
}

fn table_in(schema: &str, name: &str, table_type: TableType) -> TableInfo {
    TableInfo {
        schema: Some(schema.into()),
        name: name.into(),
        table_type,
    }
}

fn column(name: &str, ordinal: usize, data_type: &str) -> ColumnInfo {
    ColumnInfo {
        name: name.into(),
        ordinal,
        data_type: data_type.into(),
        nullable: true,
        precision: None,
        scale: None,
    }
}

#[async_trait]
impl Connection for StubWarehouse {
    fn driver_name(&self) -> &str {
        "stub"
    }

    async fn stream(&self, _sql: &str, _cancel: CancellationToken) -> Result<Box<dyn RowCursor>> {
        Err(DbnetError::Driver("not supported".into()))
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

    fn as_schema_introspection(&self) -> Option<&dyn SchemaIntrospection> {
        Some(self)
    }
}

#[async_trait]
impl SchemaIntrospection for StubWarehouse {
    async fn list_databases(&self) -> Result<Vec<DatabaseInfo>> {
        Ok(vec![DatabaseInfo {
            name: "analytics".into(),
        }])
    }

    async fn list_schemas(&self) -> Result<Vec<SchemaInfo>> {
        Ok(self
            .schemas
            .lock()
            .iter()
            .map(|name| SchemaInfo { name: name.clone() })
            .collect())
    }

    async fn list_tables(&self, schema: Option<&str>) -> Result<Vec<TableInfo>> {
        self.table_calls.fetch_add(1, Ordering::SeqCst);
        assert!(schema.is_some(), "schema should be resolved before listing");
        Ok(self
            .tables
            .lock()
            .iter()
            .filter(|t| !t.is_view() && t.schema.as_deref() == schema)
            .cloned()
            .collect())
    }

    async fn list_views(&self, schema: Option<&str>) -> Result<Vec<TableInfo>> {
        Ok(self
            .tables
            .lock()
            .iter()
            .filter(|t| t.is_view() && t.schema.as_deref() == schema)
            .cloned()
            .collect())
    }

    async fn get_columns(&self, _schema: Option<&str>, table: &str) -> Result<Vec<ColumnInfo>> {
        self.column_calls.fetch_add(1, Ordering::SeqCst);
        let columns = match table.to_lowercase().as_str() {
            "orders" => vec![
                column("ID", 1, "INTEGER"),
                column("Amount", 2, "NUMERIC"),
                column("customer_id", 3, "INTEGER"),
            ],
            "customers" => vec![column("id", 1, "INTEGER"), column("name", 2, "TEXT")],
            "order_totals" => vec![column("total", 1, "NUMERIC")],
            _ => Vec::new(),
        };
        Ok(columns)
    }
}

struct StubDriver {
    warehouse: Arc<StubWarehouse>,
}

#[async_trait]
impl DatabaseDriver for StubDriver {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn url_schemes(&self) -> &'static [&'static str] {
        &["stub"]
    }

    async fn connect(&self, _config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        Ok(self.warehouse.clone() as Arc<dyn Connection>)
    }
}

struct Fixture {
    _dir: TempDir,
    warehouse: Arc<StubWarehouse>,
    cache: SchemaCache,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let warehouse = Arc::new(StubWarehouse::new());
    let mut drivers = DriverRegistry::new();
    drivers.register(Arc::new(StubDriver {
        warehouse: warehouse.clone(),
    }));
    let registry = ConnectionRegistry::new(drivers);
    registry.insert(ConnectionConfig::new("stub", "wh").with_param("database", "Analytics"));

    let store = Store::open(dir.path().join("dbnet.db")).unwrap();
    Fixture {
        _dir: dir,
        warehouse,
        cache: SchemaCache::new(Arc::new(registry), store),
    }
}

#[tokio::test]
async fn test_get_columns_second_read_is_served_from_cache() {
    let f = fixture();

    let first = f
        .cache
        .get_columns("wh", "", "public", "Orders", false)
        .await
        .unwrap();
    assert_eq!(
        first.columns[..5],
        ["schema_name", "table_name", "column_name", "data_type", "position"]
    );
    assert_eq!(
        first.rows[0][..5],
        [json!("public"), json!("orders"), json!("id"), json!("integer"), json!(1)]
    );
    assert!(first.rows[0][5..].iter().all(|v| v.is_null()));
    assert_eq!(first.len(), 3);
    assert_eq!(f.warehouse.column_calls.load(Ordering::SeqCst), 1);

    let second = f
        .cache
        .get_columns("WH", "analytics", "PUBLIC", "orders", false)
        .await
        .unwrap();
    assert_eq!(second, first);
    assert_eq!(f.warehouse.column_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_get_columns_refresh_is_idempotent() {
    let f = fixture();

    let first = f
        .cache
        .get_columns("wh", "", "public", "orders", true)
        .await
        .unwrap();
    let second = f
        .cache
        .get_columns("wh", "", "public", "orders", true)
        .await
        .unwrap();
    assert_eq!(serde_json::to_string(&first).unwrap(), serde_json::to_string(&second).unwrap());
    assert_eq!(f.warehouse.column_calls.load(Ordering::SeqCst), 2);

    let scope = MetaScope::new("WH", "analytics")
        .with_schema("public")
        .with_table("orders");
    assert_eq!(f.cache.store().read_columns(&scope).unwrap().len(), 3);
}

#[tokio::test]
async fn test_get_columns_unknown_table_is_not_found() {
    let f = fixture();
    let err = f
        .cache
        .get_columns("wh", "", "public", "missing", false)
        .await
        .err()
        .unwrap();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("No columns found for table public.missing"));
}

#[tokio::test]
async fn test_get_schemata_loads_tables_and_columns() {
    let f = fixture();

    let schemata = f.cache.get_schemata("wh", "", false).await.unwrap();
    assert_eq!(schemata.columns, vec!["schema_name", "table_name", "is_view"]);
    assert_eq!(
        schemata.rows,
        vec![
            vec![json!("public"), json!("customers"), json!(false)],
            vec![json!("public"), json!("order_totals"), json!(true)],
            vec![json!("public"), json!("orders"), json!(false)],
        ]
    );
    assert_eq!(f.warehouse.column_calls.load(Ordering::SeqCst), 3);

    // Columns were cached by the schemata pass
    f.cache
        .get_columns("wh", "", "public", "customers", false)
        .await
        .unwrap();
    assert_eq!(f.warehouse.column_calls.load(Ordering::SeqCst), 3);

    let again = f.cache.get_schemata("wh", "", false).await.unwrap();
    assert_eq!(again, schemata);
    assert_eq!(f.warehouse.table_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_get_columns_carries_field_statistics() {
    let f = fixture();
    f.cache
        .store()
        .upsert_column_stats(&[ColumnStatsRow {
            conn: "WH".into(),
            database_name: "analytics".into(),
            schema_name: "public".into(),
            table_name: "Orders".into(),
            column_name: "Amount".into(),
            tot_cnt: 40,
            f_cnt: 38,
            f_dstct_cnt: 12,
            f_null_cnt: 2,
            f_min_len: 1,
            f_max_len: 6,
            last_analyzed: Some("2026-10-01 09:30:00".into()),
        }])
        .unwrap();

    let columns = f
        .cache
        .get_columns("wh", "", "public", "orders", false)
        .await
        .unwrap();
    assert_eq!(
        columns.columns[5..],
        ["tot_cnt", "f_cnt", "f_dstct_cnt", "f_null_cnt", "f_min_len", "f_max_len", "last_analyzed"]
    );
    assert_eq!(columns.rows[1][2], json!("amount"));
    assert_eq!(
        columns.rows[1][5..],
        [
            json!(40),
            json!(38),
            json!(12),
            json!(2),
            json!(1),
            json!(6),
            json!("2026-10-01 09:30:00")
        ]
    );
    // Columns never analyzed carry nulls
    assert!(columns.rows[0][5..].iter().all(|v| v.is_null()));
}

#[tokio::test]
async fn test_default_schema_tables_do_not_mask_other_schemas() {
    let f = fixture();
    f.warehouse.schemas.lock().push("audit".into());
    f.warehouse
        .tables
        .lock()
        .push(table_in("audit", "Events", TableType::Table));

    // An empty schema is cached under the default one
    let tables = f.cache.get_tables("wh", "", "", false).await.unwrap();
    assert_eq!(tables.len(), 3);
    let again = f.cache.get_tables("wh", "", "PUBLIC", false).await.unwrap();
    assert_eq!(again, tables);
    assert_eq!(f.warehouse.table_calls.load(Ordering::SeqCst), 1);

    let schemata = f.cache.get_schemata("wh", "", false).await.unwrap();
    let names: Vec<_> = schemata
        .rows
        .iter()
        .map(|r| format!("{}.{}", r[0].as_str().unwrap(), r[1].as_str().unwrap()))
        .collect();
    assert_eq!(
        names,
        vec![
            "audit.events",
            "public.customers",
            "public.order_totals",
            "public.orders"
        ]
    );

    let calls = f.warehouse.table_calls.load(Ordering::SeqCst);
    f.cache.get_schemata("wh", "", false).await.unwrap();
    assert_eq!(f.warehouse.table_calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn test_refresh_drops_objects_that_disappeared() {
    let f = fixture();

    let before = f.cache.get_tables("wh", "", "public", false).await.unwrap();
    assert_eq!(before.len(), 3);

    f.warehouse
        .tables
        .lock()
        .retain(|t| !t.name.eq_ignore_ascii_case("customers"));

    let cached = f.cache.get_tables("wh", "", "public", false).await.unwrap();
    assert_eq!(cached, before);

    let refreshed = f.cache.get_tables("wh", "", "public", true).await.unwrap();
    assert_eq!(refreshed.columns, vec!["name", "is_view"]);
    assert_eq!(
        refreshed.rows,
        vec![
            vec![json!("order_totals"), json!(true)],
            vec![json!("orders"), json!(false)],
        ]
    );
}

#[tokio::test]
async fn test_databases_fall_back_to_introspection() {
    let f = fixture();
    let databases = f.cache.get_databases("wh").await.unwrap();
    assert_eq!(databases.columns, vec!["name"]);
    assert_eq!(databases.rows, vec![vec![json!("analytics")]]);

    let schemas = f.cache.get_schemas("wh", "").await.unwrap();
    assert_eq!(schemas.rows, vec![vec![json!("public")]]);
}

#[tokio::test]
async fn test_unknown_connection() {
    let f = fixture();
    let err = f.cache.get_schemata("nope", "", false).await.err().unwrap();
    assert!(matches!(err, DbnetError::ConnectionNotFound(_)));
}

#[tokio::test]
async fn test_sqlite_backed_cache() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("app.db");
    let registry = ConnectionRegistry::new(DriverRegistry::with_defaults());
    registry.insert(
        ConnectionConfig::new("sqlite", "local").with_param("path", db_path.to_string_lossy().to_string()),
    );
    let registry = Arc::new(registry);

    let conn = registry.resolve("LOCAL", "").await.unwrap();
    conn.execute(
        "CREATE TABLE Events (id INTEGER PRIMARY KEY, Kind TEXT, weight REAL)",
        &[],
    )
    .await
    .unwrap();
    conn.execute("CREATE VIEW heavy AS SELECT * FROM Events WHERE weight > 1", &[])
        .await
        .unwrap();

    let cache = SchemaCache::new(registry, Store::open(dir.path().join("dbnet.db")).unwrap());

    let databases = cache.get_databases("local").await.unwrap();
    assert_eq!(databases.rows[0], vec![json!("main")]);

    let tables = cache.get_tables("local", "", "main", false).await.unwrap();
    assert_eq!(
        tables.rows,
        vec![
            vec![json!("events"), json!(false)],
            vec![json!("heavy"), json!(true)],
        ]
    );

    let columns = cache
        .get_columns("local", "", "main", "Events", false)
        .await
        .unwrap();
    let names: Vec<_> = columns.rows.iter().map(|r| r[2].clone()).collect();
    assert_eq!(names, vec![json!("id"), json!("kind"), json!("weight")]);
    assert_eq!(columns.rows[2][3], json!("real"));
}
