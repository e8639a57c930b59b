use std::collections::TryReserveError;

use thiserror::Error;

/// Errors surfaced by the flag cache.
///
/// Missing flags are reported as `None` by the read API and stale updates as
/// [`ChangeKind::Unchanged`](crate::ChangeKind::Unchanged); neither is an
/// error.
#[derive(Debug, Error)]
pub enum FlagCacheError {
    /// Snapshot text is not valid JSON or does not match the snapshot schema.
    #[error("failed to parse snapshot: {0}")]
    Parse(#[from] serde_json::Error),

    /// Snapshot text parsed but has the wrong shape.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// A flag handed to a wholesale replacement is malformed.
    #[error("invalid flag '{key}': {reason}")]
    InvalidFlag { key: String, reason: String },

    /// An allocation needed to register a listener or build a batch failed.
    #[error("out of memory")]
    OutOfMemory,

    /// The persistence backend failed.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TryReserveError> for FlagCacheError {
    fn from(_: TryReserveError) -> Self {
        FlagCacheError::OutOfMemory
    }
}

pub type Result<T> = std::result::Result<T, FlagCacheError>;
