//! DbNet home directory layout

use dbnet_core::{DbnetError, Result};
use std::path::{Path, PathBuf};

const DEFAULT_ENV_FILE: &str = "# Environment Credentials for dbNet
# Declare connections by name, e.g.
#
# connections:
#   LOCAL:
#     type: sqlite
#     path: /path/to/database.db
#   WAREHOUSE:
#     url: sqlite:///path/to/warehouse.db
#     dbt: true

connections: {}
";

/// Root of DbNet's on-disk state: `env.yaml`, `dbnet.db` and `logs/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbnetHome {
    root: PathBuf,
}

impl DbnetHome {
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `DBNET_HOME_DIR`, then `DBNET_DIR`, then `~/.dbnet`
    pub fn from_env() -> Result<Self> {
        for var in ["DBNET_HOME_DIR", "DBNET_DIR"] {
            if let Ok(dir) = std::env::var(var)
                && !dir.trim().is_empty()
            {
                return Ok(Self::at(dir));
            }
        }
        let home = dirs::home_dir()
            .ok_or_else(|| DbnetError::Config("Unable to determine home directory".into()))?;
        Ok(Self::at(home.join(".dbnet")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn env_file(&self) -> PathBuf {
        self.root.join("env.yaml")
    }

    pub fn store_path(&self) -> PathBuf {
        self.root.join("dbnet.db")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Create the directory tree and a commented `env.yaml` if none exists
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(self.logs_dir())?;
        let env_file = self.env_file();
        if !env_file.exists() {
            std::fs::write(&env_file, DEFAULT_ENV_FILE)?;
            tracing::info!(path = ?env_file, "wrote default env file");
        }
        Ok(())
    }
}
