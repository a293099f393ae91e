//! Error types for meterctl

use meterline_engine::EngineError;
use thiserror::Error;

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

/// CLI errors
#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<config::ConfigError> for CliError {
    fn from(err: config::ConfigError) -> Self {
        CliError::Config(err.to_string())
    }
}

impl CliError {
    /// Process exit code: 2 for caller mistakes, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Engine(err) if err.kind().is_client_error() => 2,
            CliError::InvalidInput(_) => 2,
            _ => 1,
        }
    }
}
