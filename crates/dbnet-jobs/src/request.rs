//! Job request and result snapshot payloads

use dbnet_core::{ExecStatus, SourceConfig, TargetConfig, TaskConfig};
use serde::{Deserialize, Serialize};

/// Mode used when a request names none
pub const DEFAULT_MODE: &str = "full-refresh";

/// An extract/load submission as received from the UI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(default)]
    pub id: String,
    pub source: SourceConfig,
    pub target: TargetConfig,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub wait: bool,
}

impl JobRequest {
    /// Engine configuration, connections not yet resolved
    pub(crate) fn task_config(&self) -> TaskConfig {
        TaskConfig {
            source: self.source.clone(),
            target: self.target.clone(),
            mode: if self.mode.is_empty() {
                DEFAULT_MODE.to_string()
            } else {
                self.mode.clone()
            },
            options: self.options.clone(),
            source_conn: None,
            target_conn: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobConfigSummary {
    pub source: SourceConfig,
    pub target: TargetConfig,
    pub mode: String,
}

/// Progress and outcome of a job, as returned to clients and persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: ExecStatus,
    pub error: String,
    pub rows: u64,
    pub row_rate: f64,
    pub byte_rate: f64,
    pub progress: f64,
    /// Epoch milliseconds
    pub start_time: i64,
    /// Seconds
    pub duration: f64,
    pub bytes: u64,
    pub config: JobConfigSummary,
}
