//! Core types for DbNet

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A database value as produced by a driver cursor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    /// Decimal/Numeric (stored as string for precision)
    Decimal(String),
    String(String),
    Bytes(Vec<u8>),
    DateTime(NaiveDateTime),
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view of the value. Strings and whole floats are coerced,
    /// which is what profiling queries on loosely typed dialects return.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            Value::Float64(v) if v.fract() == 0.0 => Some(*v as i64),
            Value::Decimal(s) | Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(v) => Some(*v),
            Value::Int64(v) => Some(*v as f64),
            Value::Decimal(s) | Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// JSON rendering used for result pages and persisted history rows
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::Bool(v) => Json::Bool(*v),
            Value::Int64(v) => Json::from(*v),
            Value::Float64(v) => serde_json::Number::from_f64(*v)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Decimal(v) | Value::String(v) => Json::String(v.clone()),
            Value::Bytes(v) => Json::String(String::from_utf8_lossy(v).into_owned()),
            Value::DateTime(v) => Json::String(v.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            Value::Json(v) => v.clone(),
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match value {
            Json::Null => Value::Null,
            Json::Bool(v) => Value::Bool(*v),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int64(i),
                None => Value::Float64(n.as_f64().unwrap_or_default()),
            },
            Json::String(s) => Value::String(s.clone()),
            other => Value::Json(other.clone()),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Decimal(v) | Value::String(v) => write!(f, "{}", v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::DateTime(v) => write!(f, "{}", v),
            Value::Json(v) => write!(f, "{}", v),
        }
    }
}

/// A row from a materialized query result
#[derive(Debug, Clone)]
pub struct Row {
    pub values: Vec<Value>,
    columns: Vec<String>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Case-insensitive lookup by column name
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .and_then(|idx| self.values.get(idx))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn to_map(&self) -> HashMap<String, Value> {
        self.columns
            .iter()
            .zip(self.values.iter())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Result column metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ColumnMeta {
    #[serde(default)]
    pub name: String,
    /// Data type (database-specific string)
    #[serde(default)]
    pub data_type: String,
    /// Column ordinal position (0-based)
    #[serde(default)]
    pub ordinal: usize,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, ordinal: usize) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            ordinal,
        }
    }
}

/// Fully materialized query result, for small metadata queries
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Row>,
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has_rows(&self) -> bool {
        !self.rows.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Values of the first column, rendered as text
    pub fn first_column(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|r| r.get(0))
            .map(|v| v.to_string())
            .collect()
    }
}

/// Tabular JSON payload: `{"columns": [...], "rows": [[...]]}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl Dataset {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<serde_json::Value>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl From<&QueryResult> for Dataset {
    fn from(result: &QueryResult) -> Self {
        Self {
            columns: result.columns.iter().map(|c| c.name.clone()).collect(),
            rows: result
                .rows
                .iter()
                .map(|r| r.values.iter().map(Value::to_json).collect())
                .collect(),
        }
    }
}

/// Outcome of a bounded wait on a running execution
#[derive(Debug, Clone, PartialEq)]
pub enum Waited<T> {
    /// The execution settled; `T` carries its result
    Ready(T),
    /// The continuation ticker fired first; `T` is an intermediate snapshot
    Pending(T),
}

impl<T> Waited<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Waited::Pending(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Waited::Ready(v) | Waited::Pending(v) => v,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Waited<U> {
        match self {
            Waited::Ready(v) => Waited::Ready(f(v)),
            Waited::Pending(v) => Waited::Pending(f(v)),
        }
    }
}
