//! Schema-metadata cache tables

use anyhow::{Context, Result};
use rusqlite::{params, params_from_iter};

use crate::{ColumnStatsRow, SchemaTableRow, Store, TableColumnRow, now_stamp};

/// Key prefix of cached metadata: connection and database, optionally
/// narrowed to a schema and then a table. Identifiers are lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetaScope {
    pub conn: String,
    pub database: String,
    pub schema: Option<String>,
    pub table: Option<String>,
}

impl MetaScope {
    pub fn new(conn: &str, database: &str) -> Self {
        Self {
            conn: conn.to_uppercase(),
            database: database.to_lowercase(),
            schema: None,
            table: None,
        }
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_lowercase());
        self
    }

    pub fn with_table(mut self, table: &str) -> Self {
        self.table = Some(table.to_lowercase());
        self
    }

    /// `WHERE` body and its positional parameters
    fn filter(&self) -> (String, Vec<String>) {
        let mut clauses = vec!["conn = ?1", "database_name = ?2"];
        let mut values = vec![self.conn.clone(), self.database.clone()];
        if let Some(schema) = &self.schema {
            clauses.push("schema_name = ?3");
            values.push(schema.clone());
            if let Some(table) = &self.table {
                clauses.push("table_name = ?4");
                values.push(table.clone());
            }
        }
        (clauses.join(" AND "), values)
    }
}

impl Store {
    /// Cached tables under `scope`, ordered by schema then table
    pub fn read_tables(&self, scope: &MetaScope) -> Result<Vec<SchemaTableRow>> {
        let conn = self.connect()?;
        let (filter, values) = scope.filter();
        let mut stmt = conn.prepare(&format!(
            "SELECT conn, database_name, schema_name, table_name, is_view, num_rows
             FROM schema_tables
             WHERE {}
             ORDER BY schema_name, table_name",
            filter
        ))?;

        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok(SchemaTableRow {
                    conn: row.get(0)?,
                    database_name: row.get(1)?,
                    schema_name: row.get(2)?,
                    table_name: row.get(3)?,
                    is_view: row.get(4)?,
                    num_rows: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Replace every cached table under `scope` with `rows` in one transaction
    pub fn replace_tables(&self, scope: &MetaScope, rows: &[SchemaTableRow]) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let (filter, values) = scope.filter();
        let deleted = tx.execute(
            &format!("DELETE FROM schema_tables WHERE {}", filter),
            params_from_iter(values.iter()),
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO schema_tables (conn, database_name, schema_name, table_name, is_view, num_rows, updated_dt)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (conn, database_name, schema_name, table_name) DO UPDATE SET
                    is_view = excluded.is_view,
                    num_rows = excluded.num_rows,
                    updated_dt = excluded.updated_dt",
            )?;
            let stamp = now_stamp();
            for row in rows {
                stmt.execute(params![
                    row.conn.to_uppercase(),
                    row.database_name.to_lowercase(),
                    row.schema_name.to_lowercase(),
                    row.table_name.to_lowercase(),
                    row.is_view,
                    row.num_rows,
                    stamp,
                ])?;
            }
        }

        tx.commit().context("Failed to commit schema_tables refresh")?;
        tracing::debug!(scope = ?scope, deleted, inserted = rows.len(), "schema_tables refreshed");
        Ok(())
    }

    /// Cached columns under `scope`, ordered by schema, table and position
    pub fn read_columns(&self, scope: &MetaScope) -> Result<Vec<TableColumnRow>> {
        let conn = self.connect()?;
        let (filter, values) = scope.filter();
        let mut stmt = conn.prepare(&format!(
            "SELECT conn, database_name, schema_name, table_name, column_name, data_type, position, precision, scale
             FROM table_columns
             WHERE {}
             ORDER BY schema_name, table_name, position",
            filter
        ))?;

        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok(TableColumnRow {
                    conn: row.get(0)?,
                    database_name: row.get(1)?,
                    schema_name: row.get(2)?,
                    table_name: row.get(3)?,
                    column_name: row.get(4)?,
                    data_type: row.get(5)?,
                    position: row.get(6)?,
                    precision: row.get(7)?,
                    scale: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Replace every cached column under `scope` with `rows` in one transaction.
    /// Column statistics live in their own table and survive the refresh.
    pub fn replace_columns(&self, scope: &MetaScope, rows: &[TableColumnRow]) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let (filter, values) = scope.filter();
        let deleted = tx.execute(
            &format!("DELETE FROM table_columns WHERE {}", filter),
            params_from_iter(values.iter()),
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO table_columns (conn, database_name, schema_name, table_name, column_name, data_type, position, precision, scale, updated_dt)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT (conn, database_name, schema_name, table_name, column_name) DO UPDATE SET
                    data_type = excluded.data_type,
                    position = excluded.position,
                    precision = excluded.precision,
                    scale = excluded.scale,
                    updated_dt = excluded.updated_dt",
            )?;
            let stamp = now_stamp();
            for row in rows {
                stmt.execute(params![
                    row.conn.to_uppercase(),
                    row.database_name.to_lowercase(),
                    row.schema_name.to_lowercase(),
                    row.table_name.to_lowercase(),
                    row.column_name.to_lowercase(),
                    row.data_type.to_lowercase(),
                    row.position,
                    row.precision,
                    row.scale,
                    stamp,
                ])?;
            }
        }

        tx.commit().context("Failed to commit table_columns refresh")?;
        tracing::debug!(scope = ?scope, deleted, inserted = rows.len(), "table_columns refreshed");
        Ok(())
    }

    /// Upsert profiling counters, touching only the statistic columns
    pub fn upsert_column_stats(&self, rows: &[ColumnStatsRow]) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO table_column_stats (conn, database_name, schema_name, table_name, column_name,
                    tot_cnt, f_cnt, f_dstct_cnt, f_null_cnt, f_min_len, f_max_len, last_analyzed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT (conn, database_name, schema_name, table_name, column_name) DO UPDATE SET
                    tot_cnt = excluded.tot_cnt,
                    f_cnt = excluded.f_cnt,
                    f_dstct_cnt = excluded.f_dstct_cnt,
                    f_null_cnt = excluded.f_null_cnt,
                    f_min_len = excluded.f_min_len,
                    f_max_len = excluded.f_max_len,
                    last_analyzed = excluded.last_analyzed",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.conn.to_uppercase(),
                    row.database_name.to_lowercase(),
                    row.schema_name.to_lowercase(),
                    row.table_name.to_lowercase(),
                    row.column_name.to_lowercase(),
                    row.tot_cnt,
                    row.f_cnt,
                    row.f_dstct_cnt,
                    row.f_null_cnt,
                    row.f_min_len,
                    row.f_max_len,
                    row.last_analyzed.clone().unwrap_or_else(now_stamp),
                ])?;
            }
        }
        tx.commit().context("Failed to commit table_column_stats upsert")?;
        Ok(())
    }

    pub fn read_column_stats(&self, scope: &MetaScope) -> Result<Vec<ColumnStatsRow>> {
        let conn = self.connect()?;
        let (filter, values) = scope.filter();
        let mut stmt = conn.prepare(&format!(
            "SELECT conn, database_name, schema_name, table_name, column_name,
                    tot_cnt, f_cnt, f_dstct_cnt, f_null_cnt, f_min_len, f_max_len, last_analyzed
             FROM table_column_stats
             WHERE {}
             ORDER BY schema_name, table_name, column_name",
            filter
        ))?;

        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok(ColumnStatsRow {
                    conn: row.get(0)?,
                    database_name: row.get(1)?,
                    schema_name: row.get(2)?,
                    table_name: row.get(3)?,
                    column_name: row.get(4)?,
                    tot_cnt: row.get(5)?,
                    f_cnt: row.get(6)?,
                    f_dstct_cnt: row.get(7)?,
                    f_null_cnt: row.get(8)?,
                    f_min_len: row.get(9)?,
                    f_max_len: row.get(10)?,
                    last_analyzed: row.get(11)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}
