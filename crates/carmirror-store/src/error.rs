//! Error types for the store module.

use carmirror_core::CoreError;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Block failed verification on the way in.
    #[error("invalid block: {0}")]
    InvalidBlock(#[from] CoreError),

    /// Diff marker could not be parsed.
    #[error("invalid diff marker {0:?}")]
    InvalidMarker(String),

    /// Backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
