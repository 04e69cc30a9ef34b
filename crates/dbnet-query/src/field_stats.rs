//! Column profiling results to `table_column_stats`

use dbnet_store::{ColumnStatsRow, QueryRecord};
use serde_json::Value;
use std::collections::HashMap;

/// One statistics row per result row of a `field_stat` analysis
pub(crate) fn stats_rows(record: &QueryRecord, database: &str) -> Vec<ColumnStatsRow> {
    let positions: HashMap<String, usize> = record
        .headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.to_lowercase(), i))
        .collect();
    let stamp = chrono::Utc::now().to_rfc3339();

    record
        .rows
        .iter()
        .map(|row| {
            let text = |key: &str| {
                positions
                    .get(key)
                    .and_then(|&i| row.get(i))
                    .map(json_text)
                    .unwrap_or_default()
                    .to_lowercase()
            };
            let count = |key: &str| {
                positions
                    .get(key)
                    .and_then(|&i| row.get(i))
                    .and_then(json_i64)
                    .unwrap_or_default()
            };

            ColumnStatsRow {
                conn: record.conn.clone(),
                database_name: database.to_string(),
                schema_name: text("schema_nm"),
                table_name: text("table_nm"),
                column_name: text("field"),
                tot_cnt: count("tot_cnt"),
                f_cnt: count("f_cnt"),
                f_dstct_cnt: count("f_dstct_cnt"),
                f_null_cnt: count("f_null_cnt"),
                f_min_len: count("f_min_len"),
                f_max_len: count("f_max_len"),
                last_analyzed: Some(stamp.clone()),
            }
        })
        .collect()
}

fn json_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn json_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
