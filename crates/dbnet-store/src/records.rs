//! Persisted record shapes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a query execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    #[default]
    Submitted,
    Completed,
    Fetched,
    Errorred,
    Cancelled,
}

impl QueryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryStatus::Submitted => "submitted",
            QueryStatus::Completed => "completed",
            QueryStatus::Fetched => "fetched",
            QueryStatus::Errorred => "errorred",
            QueryStatus::Cancelled => "cancelled",
        }
    }

    /// The execution has produced its outcome (rows may remain on a cursor)
    pub fn is_settled(self) -> bool {
        !matches!(self, QueryStatus::Submitted)
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(QueryStatus::Submitted),
            "completed" => Ok(QueryStatus::Completed),
            "fetched" => Ok(QueryStatus::Fetched),
            "errorred" => Ok(QueryStatus::Errorred),
            "cancelled" => Ok(QueryStatus::Cancelled),
            other => Err(format!("unknown query status: {}", other)),
        }
    }
}

/// A query execution as the client sees it and as history keeps it.
/// Doubles as the submit request body, so every field has a default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryRecord {
    pub id: String,
    pub conn: String,
    pub database: String,
    pub tab: String,
    pub text: String,
    /// Submission time, epoch milliseconds
    pub time: i64,
    /// Seconds from submission to outcome
    pub duration: f64,
    pub status: QueryStatus,
    pub err: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    /// Page size; 0 means the broker default and negative drains everything
    pub limit: i64,
    pub wait: bool,
    /// Rows changed by a statement without a result set, -1 when rows stream
    pub affected: i64,
    pub proj_dir: String,
}

/// A job execution snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: String,
    pub error: String,
    /// Request payload as submitted
    pub request: serde_json::Value,
    /// Last result snapshot
    pub result: serde_json::Value,
    pub time: i64,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub conn: String,
    pub name: String,
    pub data: serde_json::Value,
}

/// One cached table or view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaTableRow {
    pub conn: String,
    pub database_name: String,
    pub schema_name: String,
    pub table_name: String,
    pub is_view: bool,
    pub num_rows: Option<i64>,
}

/// One cached column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableColumnRow {
    pub conn: String,
    pub database_name: String,
    pub schema_name: String,
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    pub position: i64,
    pub precision: Option<i64>,
    pub scale: Option<i64>,
}

/// Profiling counters for one column
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnStatsRow {
    pub conn: String,
    pub database_name: String,
    pub schema_name: String,
    pub table_name: String,
    pub column_name: String,
    pub tot_cnt: i64,
    pub f_cnt: i64,
    pub f_dstct_cnt: i64,
    pub f_null_cnt: i64,
    pub f_min_len: i64,
    pub f_max_len: i64,
    pub last_analyzed: Option<String>,
}
