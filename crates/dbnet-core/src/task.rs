//! Extract/load task engine seam
//!
//! The job broker never moves data itself. It builds a [`TaskConfig`],
//! asks a [`TaskEngine`] for a [`Task`], and runs `execute` on its own
//! worker while polling the task's progress counters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{CancellationToken, ConnectionConfig, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecStatus {
    Created,
    Running,
    Success,
    Error,
    Cancelled,
}

impl ExecStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecStatus::Created => "created",
            ExecStatus::Running => "running",
            ExecStatus::Success => "success",
            ExecStatus::Error => "error",
            ExecStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExecStatus::Success | ExecStatus::Error | ExecStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub conn: String,
    /// Table name or SQL text
    #[serde(default)]
    pub stream: String,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub update_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub conn: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

/// Engine configuration built from an extract/load request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConfig {
    pub source: SourceConfig,
    pub target: TargetConfig,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
    /// Resolved source connection
    #[serde(skip)]
    pub source_conn: Option<ConnectionConfig>,
    /// Resolved target connection
    #[serde(skip)]
    pub target_conn: Option<ConnectionConfig>,
}

/// One data-movement execution owned by the engine
#[async_trait]
pub trait Task: Send + Sync {
    /// Engine-specific type tag (e.g. "db-db")
    fn task_type(&self) -> String;

    fn config(&self) -> &TaskConfig;

    /// Run to completion. Outcome is reported through `status` and `error`.
    async fn execute(&self, cancel: CancellationToken);

    fn status(&self) -> ExecStatus;

    fn error(&self) -> Option<String>;

    /// Percentage complete, when the engine can tell
    fn progress(&self) -> f64;

    fn rows(&self) -> u64;

    fn bytes(&self) -> u64;

    /// (rows per second, bytes per second)
    fn rates(&self) -> (f64, f64);
}

pub trait TaskEngine: Send + Sync {
    fn new_task(&self, id: &str, config: TaskConfig) -> Result<Arc<dyn Task>>;
}
