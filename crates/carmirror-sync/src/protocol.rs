//! Reconciliation configuration, states and reports.

use std::time::Duration;

use carmirror_core::{BloomFilter, Cid, HashRegistry, XXH3_HASH_ID};
use serde::{Deserialize, Serialize};

use crate::error::{MirrorError, Result};
use crate::messages::{limits, SessionId};

/// Configuration for reconciliation behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Maximum blocks per round when streaming.
    pub max_batch_size: usize,
    /// Upper bound on rounds for one transfer.
    pub max_rounds: usize,
    /// Target false-positive rate for filters this side builds.
    pub fpp: f64,
    /// Hash function ID for filters this side builds.
    pub hash_function: u8,
    /// Idle time after which a session is discarded.
    pub session_ttl: Duration,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            max_rounds: 1024,
            fpp: 1e-4,
            hash_function: XXH3_HASH_ID,
            session_ttl: Duration::from_secs(30),
        }
    }
}

impl MirrorConfig {
    /// Reject settings the reconcilers cannot run with.
    pub fn validate(&self, registry: &HashRegistry) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(MirrorError::Config("max_batch_size must be at least 1".into()));
        }
        if self.max_rounds == 0 {
            return Err(MirrorError::Config("max_rounds must be at least 1".into()));
        }
        if !(self.fpp > 0.0 && self.fpp < 1.0) {
            return Err(MirrorError::Config(format!(
                "fpp must be in (0, 1), got {}",
                self.fpp
            )));
        }
        let (_, hashes) = BloomFilter::estimate_parameters(1024, self.fpp);
        if hashes > limits::MAX_HASH_COUNT {
            return Err(MirrorError::Config(format!(
                "fpp {} needs {hashes} hashes, peers accept at most {}",
                self.fpp,
                limits::MAX_HASH_COUNT
            )));
        }
        if self.session_ttl.is_zero() {
            return Err(MirrorError::Config("session_ttl must be non-zero".into()));
        }
        if !registry.contains(self.hash_function) {
            return Err(MirrorError::UnknownHashFunction(self.hash_function));
        }
        Ok(())
    }
}

/// Filter advertising `cids`, sized for their count at `config.fpp`.
pub fn have_filter(
    registry: &HashRegistry,
    config: &MirrorConfig,
    cids: &[Cid],
) -> Result<BloomFilter> {
    let n = cids.len().max(1) as u64;
    let mut filter =
        BloomFilter::with_estimates_and_hash(registry, config.hash_function, n, config.fpp)?;
    for cid in cids {
        filter.add(cid.as_bytes());
    }
    Ok(filter)
}

/// Which way blocks flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Push,
    Pull,
}

/// Lifecycle of one transfer.
///
/// ```text
/// Initialized -> Resolving -> Filtering -> Transferring -> Filtering ... -> Converged
///                                  any state -> Cancelled | Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Initialized,
    /// Enumerating the candidate set.
    Resolving,
    /// Testing candidates against the peer's filter.
    Filtering,
    /// Sending or receiving a batch.
    Transferring,
    Converged,
    Cancelled,
    Failed,
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Converged | TransferState::Cancelled | TransferState::Failed
        )
    }
}

/// Result of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReport {
    pub direction: Direction,
    pub root: Cid,
    pub address: String,
    /// Session used on the remote side, once one was opened.
    pub session: Option<SessionId>,
    pub state: TransferState,
    /// Number of batch rounds.
    pub rounds: usize,
    /// Size of the resolved candidate set.
    pub candidates: usize,
    pub blocks_sent: usize,
    pub blocks_received: usize,
    /// Candidates the peer's filter claimed, so never sent.
    pub blocks_skipped: usize,
    /// Blocks resent because a filter false positive hid them.
    pub recovered: usize,
}

impl TransferReport {
    pub fn new(direction: Direction, root: Cid, address: &str) -> Self {
        Self {
            direction,
            root,
            address: address.to_string(),
            session: None,
            state: TransferState::Initialized,
            rounds: 0,
            candidates: 0,
            blocks_sent: 0,
            blocks_received: 0,
            blocks_skipped: 0,
            recovered: 0,
        }
    }

    pub fn is_converged(&self) -> bool {
        self.state == TransferState::Converged
    }
}
