//! Cache-first metadata reads over the store

use dbnet_connection::ConnectionRegistry;
use dbnet_core::{Connection, Dataset, DbnetError, Result, SchemaIntrospection, TableInfo};
use dbnet_store::{ColumnStatsRow, MetaScope, SchemaTableRow, Store, TableColumnRow};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const STATS_COLUMNS: [&str; 7] = [
    "tot_cnt",
    "f_cnt",
    "f_dstct_cnt",
    "f_null_cnt",
    "f_min_len",
    "f_max_len",
    "last_analyzed",
];

/// Schema-metadata cache keyed by (conn, database, schema, table, column)
pub struct SchemaCache {
    registry: Arc<ConnectionRegistry>,
    store: Store,
    /// (conn, database) pairs whose cached tables cover every schema
    complete: Mutex<HashSet<(String, String)>>,
}

impl SchemaCache {
    pub fn new(registry: Arc<ConnectionRegistry>, store: Store) -> Self {
        Self {
            registry,
            store,
            complete: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Databases visible through a connection. Uses the driver's `databases`
    /// metadata template when it has one.
    #[tracing::instrument(skip(self))]
    pub async fn get_databases(&self, conn: &str) -> Result<Dataset> {
        let handle = self.registry.resolve(conn, "").await?;
        if handle.templates().metadata.contains_key("databases") {
            let sql = handle.templates().metadata_sql("databases", &Map::new())?;
            let result = handle.query(&sql, &[]).await?;
            return Ok(Dataset::from(&result));
        }

        let mut data = Dataset::new(["name"]);
        for db in introspection(handle.as_ref(), conn)?.list_databases().await? {
            data.push(vec![json!(db.name)]);
        }
        Ok(data)
    }

    /// Live schema names, never cached
    #[tracing::instrument(skip(self))]
    pub async fn get_schemas(&self, conn: &str, database: &str) -> Result<Dataset> {
        let handle = self.registry.resolve(conn, database).await?;
        let mut data = Dataset::new(["schema_name"]);
        for schema in introspection(handle.as_ref(), conn)?.list_schemas().await? {
            data.push(vec![json!(schema.name)]);
        }
        Ok(data)
    }

    /// Every table and view of a database, loading all schemas (tables and
    /// their columns) on a miss or when `refresh` is set
    #[tracing::instrument(skip(self))]
    pub async fn get_schemata(&self, conn: &str, database: &str, refresh: bool) -> Result<Dataset> {
        let scope = self.scope(conn, database)?;
        let mut cached = self.store.read_tables(&scope)?;
        if refresh || !self.covers_all_schemas(&scope, database, &cached).await? {
            self.load_schemata(&scope, database).await?;
            cached = self.store.read_tables(&scope)?;
        }

        let mut data = Dataset::new(["schema_name", "table_name", "is_view"]);
        for row in cached {
            data.push(vec![
                json!(row.schema_name),
                json!(row.table_name),
                json!(row.is_view),
            ]);
        }
        Ok(data)
    }

    /// Tables and views of one schema; an empty schema means the default one
    #[tracing::instrument(skip(self))]
    pub async fn get_tables(
        &self,
        conn: &str,
        database: &str,
        schema: &str,
        refresh: bool,
    ) -> Result<Dataset> {
        let schema = self.schema_key(conn, database, schema).await?;
        let scope = self.scope(conn, database)?.with_schema(&schema);
        let mut cached = self.store.read_tables(&scope)?;
        if cached.is_empty() || refresh {
            let handle = self.registry.resolve(conn, database).await?;
            let introspect = introspection(handle.as_ref(), conn)?;
            let objects = list_objects(introspect, &schema).await?;
            let rows: Vec<SchemaTableRow> = objects
                .iter()
                .map(|t| table_row(&scope, &schema, t))
                .collect();
            self.store.replace_tables(&scope, &rows)?;
            cached = self.store.read_tables(&scope)?;
        }

        let mut data = Dataset::new(["name", "is_view"]);
        for row in cached {
            data.push(vec![json!(row.table_name), json!(row.is_view)]);
        }
        Ok(data)
    }

    /// Columns of one table in position order, with the field statistics of
    /// the last analysis (null when the column was never analyzed)
    #[tracing::instrument(skip(self))]
    pub async fn get_columns(
        &self,
        conn: &str,
        database: &str,
        schema: &str,
        table: &str,
        refresh: bool,
    ) -> Result<Dataset> {
        let schema = self.schema_key(conn, database, schema).await?;
        let schema = schema.as_str();
        let scope = self
            .scope(conn, database)?
            .with_schema(schema)
            .with_table(table);
        let mut cached = self.store.read_columns(&scope)?;
        if cached.is_empty() || refresh {
            let handle = self.registry.resolve(conn, database).await?;
            let introspect = introspection(handle.as_ref(), conn)?;
            let columns = introspect
                .get_columns(non_empty(schema), table)
                .await?;
            if columns.is_empty() {
                return Err(DbnetError::NotFound(format!(
                    "No columns found for table {}",
                    qualified(schema, table)
                )));
            }

            let rows: Vec<TableColumnRow> = columns
                .into_iter()
                .enumerate()
                .map(|(i, c)| TableColumnRow {
                    conn: scope.conn.clone(),
                    database_name: scope.database.clone(),
                    schema_name: schema.to_string(),
                    table_name: table.to_string(),
                    column_name: c.name,
                    data_type: c.data_type,
                    position: i as i64 + 1,
                    precision: c.precision.map(i64::from),
                    scale: c.scale.map(i64::from),
                })
                .collect();
            self.store.replace_columns(&scope, &rows)?;
            cached = self.store.read_columns(&scope)?;
        }

        let stats: HashMap<String, ColumnStatsRow> = self
            .store
            .read_column_stats(&scope)?
            .into_iter()
            .map(|s| (s.column_name.clone(), s))
            .collect();

        let mut data = Dataset::new(
            ["schema_name", "table_name", "column_name", "data_type", "position"]
                .into_iter()
                .chain(STATS_COLUMNS),
        );
        for row in cached {
            let mut values = vec![
                json!(row.schema_name),
                json!(row.table_name),
                json!(row.column_name),
                json!(row.data_type),
                json!(row.position),
            ];
            values.extend(stats_values(stats.get(&row.column_name)));
            data.push(values);
        }
        Ok(data)
    }

    /// Whether the cached tables already span every live schema
    async fn covers_all_schemas(
        &self,
        scope: &MetaScope,
        database: &str,
        cached: &[SchemaTableRow],
    ) -> Result<bool> {
        let key = (scope.conn.clone(), scope.database.clone());
        if self.complete.lock().contains(&key) {
            return Ok(true);
        }
        if cached.is_empty() {
            return Ok(false);
        }

        // Tables cached one schema at a time may leave others unloaded
        let handle = self.registry.resolve(&scope.conn, database).await?;
        let schemas = introspection(handle.as_ref(), &scope.conn)?
            .list_schemas()
            .await?;
        let covered = schemas.iter().all(|schema| {
            let name = schema.name.to_lowercase();
            cached.iter().any(|row| row.schema_name == name)
        });
        if covered {
            self.complete.lock().insert(key);
        }
        Ok(covered)
    }

    /// Re-introspect a whole database and replace its cached tables and columns
    async fn load_schemata(&self, scope: &MetaScope, database: &str) -> Result<()> {
        let handle = self.registry.resolve(&scope.conn, database).await?;
        let introspect = introspection(handle.as_ref(), &scope.conn)?;

        let mut tables = Vec::new();
        let mut columns = Vec::new();
        for schema in introspect.list_schemas().await? {
            for object in list_objects(introspect, &schema.name).await? {
                let cols = introspect
                    .get_columns(Some(&schema.name), &object.name)
                    .await?;
                columns.extend(cols.into_iter().enumerate().map(|(i, c)| TableColumnRow {
                    conn: scope.conn.clone(),
                    database_name: scope.database.clone(),
                    schema_name: schema.name.clone(),
                    table_name: object.name.clone(),
                    column_name: c.name,
                    data_type: c.data_type,
                    position: i as i64 + 1,
                    precision: c.precision.map(i64::from),
                    scale: c.scale.map(i64::from),
                }));
                tables.push(table_row(scope, &schema.name, &object));
            }
        }

        tracing::info!(
            conn = %scope.conn,
            database = %scope.database,
            tables = tables.len(),
            columns = columns.len(),
            "schemata loaded"
        );
        self.store.replace_tables(scope, &tables)?;
        self.store.replace_columns(scope, &columns)?;
        self.complete
            .lock()
            .insert((scope.conn.clone(), scope.database.clone()));
        Ok(())
    }

    /// Schema a request is cached under: an empty schema resolves to the
    /// first one the connection lists
    async fn schema_key(&self, conn: &str, database: &str, schema: &str) -> Result<String> {
        if !schema.trim().is_empty() {
            return Ok(schema.to_string());
        }
        let handle = self.registry.resolve(conn, database).await?;
        let schemas = introspection(handle.as_ref(), conn)?.list_schemas().await?;
        Ok(schemas
            .into_iter()
            .next()
            .map(|s| s.name)
            .unwrap_or_default())
    }

    /// Cache key for a request; an empty database means the connection's default
    fn scope(&self, conn: &str, database: &str) -> Result<MetaScope> {
        let database = if database.trim().is_empty() {
            self.registry.default_database(conn)?
        } else {
            database.to_string()
        };
        Ok(MetaScope::new(&dbnet_connection::normalize_name(conn), &database))
    }
}

fn introspection<'a>(
    handle: &'a dyn Connection,
    conn: &str,
) -> Result<&'a dyn SchemaIntrospection> {
    handle.as_schema_introspection().ok_or_else(|| {
        DbnetError::Config(format!("connection {} does not support schema introspection", conn))
    })
}

async fn list_objects(introspect: &dyn SchemaIntrospection, schema: &str) -> Result<Vec<TableInfo>> {
    let mut objects = introspect.list_tables(non_empty(schema)).await?;
    objects.extend(introspect.list_views(non_empty(schema)).await?);
    Ok(objects)
}

fn table_row(scope: &MetaScope, schema: &str, table: &TableInfo) -> SchemaTableRow {
    SchemaTableRow {
        conn: scope.conn.clone(),
        database_name: scope.database.clone(),
        schema_name: schema.to_string(),
        table_name: table.name.clone(),
        is_view: table.is_view(),
        num_rows: None,
    }
}

fn stats_values(stats: Option<&ColumnStatsRow>) -> Vec<Value> {
    match stats {
        Some(s) => vec![
            json!(s.tot_cnt),
            json!(s.f_cnt),
            json!(s.f_dstct_cnt),
            json!(s.f_null_cnt),
            json!(s.f_min_len),
            json!(s.f_max_len),
            json!(s.last_analyzed),
        ],
        None => vec![Value::Null; STATS_COLUMNS.len()],
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() { None } else { Some(s) }
}

fn qualified(schema: &str, table: &str) -> String {
    if schema.is_empty() {
        table.to_string()
    } else {
        format!("{}.{}", schema, table)
    }
}
