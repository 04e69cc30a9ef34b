//! Request payloads, decoded from query strings, JSON bodies and websocket
//! envelopes alike

use dbnet_core::{DbnetError, Result};
use dbnet_dbt::RpcRequest;
use dbnet_store::QueryRecord;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata, history and analysis lookups
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaRequest {
    pub conn: String,
    pub database: String,
    pub schema: String,
    pub table: String,
    /// `refresh` bypasses the metadata cache; names the analysis or the
    /// history procedure elsewhere
    pub procedure: String,
    pub name: String,
    /// Template parameters, as an object or as JSON text in a query string
    pub data: Value,
}

impl MetaRequest {
    pub fn refresh(&self) -> bool {
        self.procedure == "refresh"
    }

    pub fn data_map(&self) -> Result<Map<String, Value>> {
        match &self.data {
            Value::Null => Ok(Map::new()),
            Value::Object(map) => Ok(map.clone()),
            Value::String(text) if text.trim().is_empty() => Ok(Map::new()),
            Value::String(text) => serde_json::from_str(text)
                .map_err(|e| DbnetError::Config(format!("could not parse request data: {}", e))),
            other => Err(DbnetError::Config(format!(
                "request data must be an object, got {}",
                other
            ))),
        }
    }
}

/// A SQL submission, page request or cancellation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlRequest {
    pub id: String,
    pub conn: String,
    pub database: String,
    pub tab: String,
    pub text: String,
    pub limit: i64,
    pub wait: bool,
    pub proj_dir: String,
}

impl SqlRequest {
    pub fn into_record(self) -> QueryRecord {
        QueryRecord {
            id: self.id,
            conn: self.conn,
            database: self.database,
            tab: self.tab,
            text: self.text,
            limit: self.limit,
            wait: self.wait,
            proj_dir: self.proj_dir,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionRequest {
    pub conn: String,
    pub name: String,
    pub data: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobIdRequest {
    pub id: String,
}

/// A raw call to the dbt helper, or a `refresh` of it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbtRequest {
    /// Connection whose `profile` and `target` fill in blanks below
    pub conn: String,
    pub proj_dir: String,
    pub profile: String,
    pub target: String,
    pub procedure: String,
    pub request: Option<RpcRequest>,
}
