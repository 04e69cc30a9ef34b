//! Query and job history

use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use crate::{JobRecord, QueryRecord, Store, now_stamp};

const QUERY_COLUMNS: &str = "id, conn, database_name, tab, text, time, duration, status, err, headers, result_rows, row_limit, wait, affected, proj_dir";

impl Store {
    /// Insert or overwrite a query record
    pub fn save_query(&self, record: &QueryRecord) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO queries (id, conn, database_name, tab, text, time, duration, status, err, headers, result_rows, row_limit, wait, affected, proj_dir, updated_dt)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             ON CONFLICT (id) DO UPDATE SET
                conn = excluded.conn,
                database_name = excluded.database_name,
                tab = excluded.tab,
                text = excluded.text,
                time = excluded.time,
                duration = excluded.duration,
                status = excluded.status,
                err = excluded.err,
                headers = excluded.headers,
                result_rows = excluded.result_rows,
                row_limit = excluded.row_limit,
                wait = excluded.wait,
                affected = excluded.affected,
                proj_dir = excluded.proj_dir,
                updated_dt = excluded.updated_dt",
            params![
                record.id,
                record.conn,
                record.database,
                record.tab,
                record.text,
                record.time,
                record.duration,
                record.status.as_str(),
                record.err,
                serde_json::to_string(&record.headers)?,
                serde_json::to_string(&record.rows)?,
                record.limit,
                record.wait,
                record.affected,
                record.proj_dir,
                now_stamp(),
            ],
        )
        .with_context(|| format!("Failed to save query {}", record.id))?;
        Ok(())
    }

    pub fn load_query(&self, id: &str) -> Result<Option<QueryRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM queries WHERE id = ?1",
            QUERY_COLUMNS
        ))?;
        let record = stmt.query_row(params![id], query_from_row).optional()?;
        Ok(record)
    }

    /// Most recent queries of a connection, newest first
    pub fn latest_queries(&self, conn_name: &str, limit: usize) -> Result<Vec<QueryRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM queries
             WHERE upper(conn) = upper(?1)
             ORDER BY time DESC
             LIMIT ?2",
            QUERY_COLUMNS
        ))?;
        let records = stmt
            .query_map(params![conn_name, limit as i64], query_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Queries of a connection whose text contains `needle`, case-insensitively
    pub fn search_queries(
        &self,
        conn_name: &str,
        needle: &str,
        limit: usize,
    ) -> Result<Vec<QueryRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM queries
             WHERE upper(conn) = upper(?1) AND lower(text) LIKE ?2
             ORDER BY time DESC
             LIMIT ?3",
            QUERY_COLUMNS
        ))?;
        let pattern = format!("%{}%", needle.to_lowercase());
        let records = stmt
            .query_map(params![conn_name, pattern, limit as i64], query_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Insert or overwrite a job record
    pub fn save_job(&self, record: &JobRecord) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO jobs (id, type, status, error, request, result, time, duration, updated_dt)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (id) DO UPDATE SET
                type = excluded.type,
                status = excluded.status,
                error = excluded.error,
                request = excluded.request,
                result = excluded.result,
                time = excluded.time,
                duration = excluded.duration,
                updated_dt = excluded.updated_dt",
            params![
                record.id,
                record.job_type,
                record.status,
                record.error,
                record.request.to_string(),
                record.result.to_string(),
                record.time,
                record.duration,
                now_stamp(),
            ],
        )
        .with_context(|| format!("Failed to save job {}", record.id))?;
        Ok(())
    }

    pub fn load_job(&self, id: &str) -> Result<Option<JobRecord>> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                "SELECT id, type, status, error, request, result, time, duration FROM jobs WHERE id = ?1",
                params![id],
                |row| {
                    Ok(JobRecord {
                        id: row.get(0)?,
                        job_type: row.get(1)?,
                        status: row.get(2)?,
                        error: row.get(3)?,
                        request: parse_json(row.get::<_, String>(4)?),
                        result: parse_json(row.get::<_, String>(5)?),
                        time: row.get(6)?,
                        duration: row.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

fn query_from_row(row: &Row<'_>) -> rusqlite::Result<QueryRecord> {
    let status: String = row.get(7)?;
    let headers: String = row.get(9)?;
    let rows: String = row.get(10)?;
    Ok(QueryRecord {
        id: row.get(0)?,
        conn: row.get(1)?,
        database: row.get(2)?,
        tab: row.get(3)?,
        text: row.get(4)?,
        time: row.get(5)?,
        duration: row.get(6)?,
        status: status.parse().unwrap_or_default(),
        err: row.get(8)?,
        headers: serde_json::from_str(&headers).unwrap_or_default(),
        rows: serde_json::from_str(&rows).unwrap_or_default(),
        limit: row.get(11)?,
        wait: row.get(12)?,
        affected: row.get(13)?,
        proj_dir: row.get(14)?,
    })
}

fn parse_json(text: String) -> serde_json::Value {
    serde_json::from_str(&text).unwrap_or(serde_json::Value::Null)
}
