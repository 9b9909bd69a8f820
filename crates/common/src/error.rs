use thiserror::Error;

use crate::config::ConfigError;

/// Run-level error types for the bridge sanitizer
#[derive(Debug, Error)]
pub enum SanitizerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Import error: {0}")]
    Import(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type for run-level operations
pub type Result<T> = std::result::Result<T, SanitizerError>;

impl SanitizerError {
    pub fn import(msg: impl Into<String>) -> Self {
        Self::Import(msg.into())
    }
}
