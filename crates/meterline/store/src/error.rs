use chrono::{DateTime, Utc};
use meterline_types::{EngineError, SourceId};
use thiserror::Error;

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage-layer errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate reading for {source_id} at {timestamp}")]
    DuplicateTimestamp {
        source_id: SourceId,
        timestamp: DateTime<Utc>,
    },

    #[error("record not found: {0}")]
    NotFound(SourceId),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("rejected: {0}")]
    Rejected(EngineError),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateTimestamp {
                source_id,
                timestamp,
            } => EngineError::DuplicateTimestamp {
                source_id,
                timestamp,
            },
            StoreError::NotFound(source_id) => EngineError::not_found(source_id),
            StoreError::InvalidInput(reason) => EngineError::BadInterval(reason),
            StoreError::Rejected(inner) => inner,
            StoreError::Backend(reason) => EngineError::Storage(reason),
        }
    }
}
