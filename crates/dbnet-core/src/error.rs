//! Error types for DbNet

use thiserror::Error;

/// Core error type for DbNet operations
#[derive(Error, Debug)]
pub enum DbnetError {
    #[error("could not find conn {0}")]
    ConnectionNotFound(String),

    #[error("could not connect: {0}")]
    ConnectionFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Driver(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Subprocess error: {0}")]
    Subprocess(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl DbnetError {
    /// Unknown connection, query, job or session. Safe to retry as a fresh submission.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DbnetError::NotFound(_) | DbnetError::ConnectionNotFound(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DbnetError::Cancelled)
    }
}

/// Result type alias for DbNet operations
pub type Result<T> = std::result::Result<T, DbnetError>;
