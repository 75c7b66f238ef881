//! Error types for the sync module.

use carmirror_core::{Cid, CoreError};
use carmirror_store::{StoreError, TraversalError};
use thiserror::Error;

use crate::messages::{ErrorCode, SessionId};
use crate::protocol::TransferState;

/// Errors that can occur during reconciliation.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Configuration rejected at construction.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Filter names a hash function ID that is not registered.
    #[error("unknown hash function id: {0}")]
    UnknownHashFunction(u8),

    /// Malformed content identifier.
    #[error("invalid cid {input:?}: {reason}")]
    InvalidCid { input: String, reason: String },

    /// Block failed verification.
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// Diff marker could not be parsed.
    #[error("invalid diff marker {0:?}")]
    InvalidDiff(String),

    /// Message validation failed.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Protocol version mismatch with peer.
    #[error("unknown protocol version: {0}")]
    UnknownProtocolVersion(u8),

    /// Session reference is unknown or expired.
    #[error("session not found or expired: {0}")]
    SessionNotFound(SessionId),

    /// Traversal of the local DAG failed.
    #[error(transparent)]
    Traversal(#[from] TraversalError),

    /// Blocks needed to finish are held by neither side of the exchange.
    #[error("{} block(s) missing under root {root}", missing.len())]
    MissingBlocks { root: Cid, missing: Vec<Cid> },

    /// The reconciler hit its round limit.
    #[error("no convergence after {0} rounds")]
    RoundLimit(usize),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Peer answered with a structured error.
    #[error("peer error ({code}): {message}")]
    Peer { code: ErrorCode, message: String },

    /// Block store failure.
    #[error("store error: {0}")]
    Store(String),

    /// Session was finalized or its deadline passed.
    #[error("transfer cancelled")]
    Cancelled,

    /// A push or pull failed; carries the root and the remote address.
    #[error("transfer of {root} with {address} failed: {source}")]
    TransferFailed {
        root: Cid,
        address: String,
        #[source]
        source: Box<MirrorError>,
    },
}

impl MirrorError {
    /// The innermost error, looking through [`MirrorError::TransferFailed`].
    pub fn root_cause(&self) -> &MirrorError {
        match self {
            MirrorError::TransferFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Wire code for this error.
    pub fn code(&self) -> ErrorCode {
        match self.root_cause() {
            MirrorError::Config(_) | MirrorError::UnknownHashFunction(_) => ErrorCode::Config,
            MirrorError::InvalidCid { .. } => ErrorCode::InvalidCid,
            MirrorError::InvalidBlock(_) => ErrorCode::InvalidBlock,
            MirrorError::InvalidDiff(_) | MirrorError::InvalidMessage(_) => {
                ErrorCode::InvalidMessage
            }
            MirrorError::UnknownProtocolVersion(_) => ErrorCode::UnknownProtocolVersion,
            MirrorError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            MirrorError::MissingBlocks { .. } => ErrorCode::MissingBlocks,
            MirrorError::Cancelled => ErrorCode::Cancelled,
            MirrorError::Transport(_) => ErrorCode::Transport,
            MirrorError::Peer { code, .. } => *code,
            MirrorError::Store(_) | MirrorError::Traversal(_) => ErrorCode::Store,
            MirrorError::RoundLimit(_) | MirrorError::TransferFailed { .. } => {
                ErrorCode::Internal
            }
        }
    }

    /// Version mismatch or an invalid/expired session reference.
    ///
    /// The caller decides whether to retry with a fresh session.
    pub fn is_protocol_error(&self) -> bool {
        self.code().is_protocol()
    }

    /// Failure to reach or talk to the remote.
    pub fn is_transport_error(&self) -> bool {
        matches!(self.root_cause(), MirrorError::Transport(_))
    }

    pub fn is_session_not_found(&self) -> bool {
        self.code() == ErrorCode::SessionNotFound
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), MirrorError::Cancelled)
    }

    /// Terminal state of a transfer that ended with this error.
    pub fn transfer_state(&self) -> TransferState {
        if self.is_cancelled() {
            TransferState::Cancelled
        } else {
            TransferState::Failed
        }
    }

    /// Wrap with the root and address of the transfer that failed.
    pub fn during_transfer(self, root: Cid, address: &str) -> Self {
        match self {
            wrapped @ MirrorError::TransferFailed { .. } => wrapped,
            source => MirrorError::TransferFailed {
                root,
                address: address.to_string(),
                source: Box::new(source),
            },
        }
    }
}

impl From<CoreError> for MirrorError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnknownHashFunction(id) => MirrorError::UnknownHashFunction(id),
            CoreError::InvalidCid { input, reason } => MirrorError::InvalidCid { input, reason },
            other @ CoreError::BlockHashMismatch { .. } => {
                MirrorError::InvalidBlock(other.to_string())
            }
        }
    }
}

impl From<StoreError> for MirrorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidBlock(core) => MirrorError::InvalidBlock(core.to_string()),
            StoreError::InvalidMarker(marker) => MirrorError::InvalidDiff(marker),
            StoreError::Backend(message) => MirrorError::Store(message),
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_failed_keeps_cause() {
        let root = Cid::from_bytes([3; 32]);
        let err = MirrorError::Transport("connection refused".into())
            .during_transfer(root, "http://peer:8080");

        assert!(err.is_transport_error());
        assert!(!err.is_protocol_error());
        let message = err.to_string();
        assert!(message.contains("http://peer:8080"));
        assert!(message.contains(&root.to_string()));

        // Wrapping twice keeps the first context.
        let again = err.during_transfer(Cid::from_bytes([4; 32]), "mem://other");
        assert!(again.to_string().contains("http://peer:8080"));
    }

    #[test]
    fn test_protocol_errors() {
        assert!(MirrorError::UnknownProtocolVersion(3).is_protocol_error());
        assert!(MirrorError::SessionNotFound(SessionId::from("gone")).is_protocol_error());
        assert!(MirrorError::Peer {
            code: ErrorCode::SessionNotFound,
            message: "gone".into(),
        }
        .is_session_not_found());
        assert!(!MirrorError::Cancelled.is_protocol_error());
    }

    #[test]
    fn test_core_error_mapping() {
        let err: MirrorError = CoreError::UnknownHashFunction(9).into();
        assert!(matches!(err, MirrorError::UnknownHashFunction(9)));
        assert_eq!(err.code(), ErrorCode::Config);

        let err: MirrorError = StoreError::InvalidMarker("x".into()).into();
        assert!(matches!(err, MirrorError::InvalidDiff(_)));
    }
}
