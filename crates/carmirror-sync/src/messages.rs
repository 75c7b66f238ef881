//! CAR Mirror wire messages.
//!
//! Every body is the CBOR encoding of one of these types. Push and pull
//! requests may name a session; responses always carry the session the
//! provider used, so a requester can correlate later rounds.

use std::fmt;

use carmirror_core::{Block, Cid, FilterPayload};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{MirrorError, Result};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 0;

/// Protocol identifier, for transports that negotiate by name.
pub const PROTOCOL_ID: &str = "/car-mirror/0";

/// HTTP header carrying the session identifier.
pub const SESSION_ID_HEADER: &str = "car-mirror-sid";

/// Message size limits.
pub mod limits {
    /// Max blocks in one PushRequest or PullResponse.
    pub const MAX_BLOCKS_PER_MESSAGE: usize = 4096;
    /// Max roots in one PullRequest.
    pub const MAX_ROOTS_PER_REQUEST: usize = 1024;
    /// Max missing identifiers reported in one PushResponse.
    pub const MAX_MISSING_PER_RESPONSE: usize = 1024;
    /// Max Bloom filter size accepted from a peer (16 MiB of bits).
    pub const MAX_FILTER_BYTES: usize = 16 * 1024 * 1024;
    /// Max hash draws per membership test in a peer's filter.
    pub const MAX_HASH_COUNT: u64 = 64;
}

/// Session identifier: 16 random bytes, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a random session ID.
    pub fn generate() -> Self {
        use rand::Rng;
        let bytes: [u8; 16] = rand::thread_rng().gen();
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Requester → provider: store these blocks for `root`.
///
/// A request with no blocks opens the session and asks for the provider's
/// current filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    pub version: u8,
    pub session: Option<SessionId>,
    pub root: Cid,
    pub blocks: Vec<Block>,
}

impl PushRequest {
    /// An empty request that opens a session for `root`.
    pub fn open(root: Cid) -> Self {
        Self::new(None, root, Vec::new())
    }

    pub fn new(session: Option<SessionId>, root: Cid, blocks: Vec<Block>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            session,
            root,
            blocks,
        }
    }
}

/// Provider → requester after a push round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    pub version: u8,
    pub session: SessionId,
    /// What the provider holds under the root, after this round.
    pub filter: Option<FilterPayload>,
    /// Subgraph roots: linked from blocks the provider holds under the root,
    /// but not present.
    pub missing: Vec<Cid>,
}

/// Requester → provider: send me what I lack under `roots`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub version: u8,
    pub session: Option<SessionId>,
    pub roots: Vec<Cid>,
    /// What the requester already holds.
    pub filter: Option<FilterPayload>,
    /// Cap on blocks in the response; set when streaming.
    pub max_blocks: Option<usize>,
}

impl PullRequest {
    pub fn new(session: Option<SessionId>, roots: Vec<Cid>, filter: Option<FilterPayload>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            session,
            roots,
            filter,
            max_blocks: None,
        }
    }

    pub fn with_max_blocks(mut self, max_blocks: Option<usize>) -> Self {
        self.max_blocks = max_blocks;
        self
    }
}

/// Provider → requester: blocks the requester's filter did not claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullResponse {
    pub version: u8,
    pub session: SessionId,
    pub blocks: Vec<Block>,
}

/// Error codes for the wire. Stable snake_case strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Config,
    InvalidCid,
    InvalidBlock,
    InvalidMessage,
    UnknownProtocolVersion,
    SessionNotFound,
    MissingBlocks,
    Cancelled,
    Transport,
    Store,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Config => "config",
            ErrorCode::InvalidCid => "invalid_cid",
            ErrorCode::InvalidBlock => "invalid_block",
            ErrorCode::InvalidMessage => "invalid_message",
            ErrorCode::UnknownProtocolVersion => "unknown_protocol_version",
            ErrorCode::SessionNotFound => "session_not_found",
            ErrorCode::MissingBlocks => "missing_blocks",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::Transport => "transport",
            ErrorCode::Store => "store",
            ErrorCode::Internal => "internal",
        }
    }

    /// Codes a caller may fix by starting a fresh session or upgrading.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            ErrorCode::UnknownProtocolVersion | ErrorCode::SessionNotFound
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error body returned by providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

/// Reject messages from a different protocol version.
pub fn check_version(version: u8) -> Result<()> {
    if version != PROTOCOL_VERSION {
        return Err(MirrorError::UnknownProtocolVersion(version));
    }
    Ok(())
}

fn check_filter(filter: Option<&FilterPayload>) -> Result<()> {
    if let Some(filter) = filter {
        let max_bits = (limits::MAX_FILTER_BYTES as u64) * 8;
        if filter.bytes.len() > limits::MAX_FILTER_BYTES || filter.bit_count > max_bits {
            return Err(MirrorError::InvalidMessage("filter too large".into()));
        }
        if filter.hash_count > limits::MAX_HASH_COUNT {
            return Err(MirrorError::InvalidMessage(format!(
                "filter hash count {} exceeds {}",
                filter.hash_count,
                limits::MAX_HASH_COUNT
            )));
        }
    }
    Ok(())
}

impl PushRequest {
    /// Check version and size limits.
    pub fn validate(&self) -> Result<()> {
        check_version(self.version)?;
        if self.blocks.len() > limits::MAX_BLOCKS_PER_MESSAGE {
            return Err(MirrorError::InvalidMessage("too many blocks".into()));
        }
        Ok(())
    }
}

impl PushResponse {
    pub fn validate(&self) -> Result<()> {
        check_version(self.version)?;
        check_filter(self.filter.as_ref())?;
        if self.missing.len() > limits::MAX_MISSING_PER_RESPONSE {
            return Err(MirrorError::InvalidMessage("too many missing cids".into()));
        }
        Ok(())
    }
}

impl PullRequest {
    pub fn validate(&self) -> Result<()> {
        check_version(self.version)?;
        check_filter(self.filter.as_ref())?;
        if self.roots.len() > limits::MAX_ROOTS_PER_REQUEST {
            return Err(MirrorError::InvalidMessage("too many roots".into()));
        }
        Ok(())
    }
}

impl PullResponse {
    pub fn validate(&self) -> Result<()> {
        check_version(self.version)?;
        if self.blocks.len() > limits::MAX_BLOCKS_PER_MESSAGE {
            return Err(MirrorError::InvalidMessage("too many blocks".into()));
        }
        Ok(())
    }
}

/// Encode a message as CBOR.
pub fn to_cbor<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(message, &mut buf)
        .map_err(|e| MirrorError::InvalidMessage(format!("encode: {e}")))?;
    Ok(buf)
}

/// Decode a CBOR message.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| MirrorError::InvalidMessage(format!("decode: {e}")))
}
