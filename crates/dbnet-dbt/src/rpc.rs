//! JSON-RPC 2.0 envelopes exchanged with the helper

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

fn jsonrpc_version() -> String {
    "2.0".to_string()
}

impl RpcRequest {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            jsonrpc: jsonrpc_version(),
            method: method.into(),
            params,
        }
    }

    pub fn status(id: impl Into<String>) -> Self {
        Self::new(id, "status", Value::Null)
    }

    /// `compile_sql` with the SQL base64-encoded, as the helper expects
    pub fn compile_sql(name: &str, sql: &str) -> Self {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(sql.as_bytes());
        Self::new(
            name,
            "compile_sql",
            json!({ "timeout": 60, "sql": encoded, "name": name }),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl RpcResponse {
    /// `result.results[0].compiled_sql` of a `compile_sql` reply
    pub fn compiled_sql(&self) -> Option<&str> {
        self.result
            .get("results")?
            .get(0)?
            .get("compiled_sql")?
            .as_str()
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| match e.get("message").and_then(Value::as_str) {
            Some(message) => message.to_string(),
            None => e.to_string(),
        })
    }
}
