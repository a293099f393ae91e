//! Error kinds surfaced by the meterline engine.
//!
//! Every failure is classified by [`ErrorKind`] so transport layers can map
//! errors to status codes without inspecting messages.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{ReadingField, SourceId};

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors returned by queries and ingestion.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Unknown source, or a virtual source referencing an unknown child.
    #[error("source not found: {source_id}{}", parent_suffix(.referenced_by))]
    ResourceNotFound {
        source_id: SourceId,
        referenced_by: Option<SourceId>,
    },

    /// The query instant lies outside the data available for a leaf.
    #[error("no data bracketing {at} for source {source_id}")]
    OutOfRange {
        source_id: SourceId,
        at: DateTime<Utc>,
    },

    /// The source holds no readings carrying the requested field. Classified
    /// as [`ErrorKind::NoData`], apart from a query outside existing data.
    #[error("source {source_id} has no {field} readings")]
    NoData {
        source_id: SourceId,
        field: ReadingField,
    },

    /// Start after end, or otherwise malformed range.
    #[error("bad interval: {0}")]
    BadInterval(String),

    /// A virtual source reaches itself.
    #[error("cycle detected in source graph: {}", format_path(.path))]
    CycleDetected { path: Vec<SourceId> },

    /// A reading already exists at this timestamp.
    #[error("duplicate reading for source {source_id} at {timestamp}")]
    DuplicateTimestamp {
        source_id: SourceId,
        timestamp: DateTime<Utc>,
    },

    /// Caller cancelled or the deadline elapsed.
    #[error("query cancelled: {0}")]
    Cancelled(String),

    /// Source definition violates a structural rule.
    #[error("invalid source {source_id}: {reason}")]
    InvalidSource { source_id: SourceId, reason: String },

    /// Reading store or catalog failure.
    #[error("storage error: {0}")]
    Storage(String),
}

fn parent_suffix(parent: &Option<SourceId>) -> String {
    parent
        .as_ref()
        .map(|p| format!(" (child of {})", p))
        .unwrap_or_default()
}

fn format_path(path: &[SourceId]) -> String {
    path.iter()
        .map(SourceId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Coarse classification of [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ResourceNotFound,
    OutOfRange,
    NoData,
    BadInterval,
    CycleDetected,
    DuplicateTimestamp,
    Cancelled,
    InvalidSource,
    Storage,
}

impl ErrorKind {
    /// Whether the caller, rather than the system, is at fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, ErrorKind::Storage | ErrorKind::CycleDetected)
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::ResourceNotFound { .. } => ErrorKind::ResourceNotFound,
            EngineError::OutOfRange { .. } => ErrorKind::OutOfRange,
            EngineError::NoData { .. } => ErrorKind::NoData,
            EngineError::BadInterval(_) => ErrorKind::BadInterval,
            EngineError::CycleDetected { .. } => ErrorKind::CycleDetected,
            EngineError::DuplicateTimestamp { .. } => ErrorKind::DuplicateTimestamp,
            EngineError::Cancelled(_) => ErrorKind::Cancelled,
            EngineError::InvalidSource { .. } => ErrorKind::InvalidSource,
            EngineError::Storage(_) => ErrorKind::Storage,
        }
    }

    pub fn not_found(source_id: SourceId) -> Self {
        EngineError::ResourceNotFound {
            source_id,
            referenced_by: None,
        }
    }

    /// The leaf or source this error is about, when it names one.
    pub fn source_id(&self) -> Option<&SourceId> {
        match self {
            EngineError::ResourceNotFound { source_id, .. }
            | EngineError::OutOfRange { source_id, .. }
            | EngineError::NoData { source_id, .. }
            | EngineError::DuplicateTimestamp { source_id, .. }
            | EngineError::InvalidSource { source_id, .. } => Some(source_id),
            _ => None,
        }
    }
}
