//! Error types for CAR Mirror core.

use thiserror::Error;

use crate::types::Cid;

/// Core errors for identifiers, blocks and filters.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown hash function id: {0}")]
    UnknownHashFunction(u8),

    #[error("invalid cid {input:?}: {reason}")]
    InvalidCid { input: String, reason: String },

    #[error("block hash mismatch: expected {expected}, computed {actual}")]
    BlockHashMismatch { expected: Cid, actual: Cid },
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
