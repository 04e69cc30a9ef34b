//! Templated SQL compilation seam
//!
//! Connections flagged `dbt` route templated text (`{{ ... }}`) through a
//! compiler before execution. The subprocess broker provides the real
//! implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{CancellationToken, Result};

/// Identifies one helper process: project directory plus profile and target
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DbtKey {
    pub project_dir: PathBuf,
    pub profile: String,
    pub target: String,
}

impl std::fmt::Display for DbtKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}|{}", self.project_dir.display(), self.profile, self.target)
    }
}

#[async_trait]
pub trait SqlCompiler: Send + Sync {
    /// Compile `sql` under `key`; `name` correlates the request. Gives up
    /// with `Cancelled` once `cancel` fires.
    async fn compile(
        &self,
        key: &DbtKey,
        name: &str,
        sql: &str,
        cancel: &CancellationToken,
    ) -> Result<String>;
}

/// Whether the text carries template markup worth compiling
pub fn is_templated(sql: &str) -> bool {
    sql.contains("{{") && sql.contains("}}")
}
