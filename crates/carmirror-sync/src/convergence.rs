//! Convergence verification.
//!
//! After a transfer, two peers can check they hold the same DAG by comparing
//! a digest of its identifiers, without exchanging the identifiers.

use carmirror_core::Cid;
use carmirror_store::{walk, BlockStore};

use crate::error::Result;

/// Digest of the complete DAG under `root`.
///
/// Returns `None` if any block under the root is missing locally.
///
/// Algorithm:
/// 1. Walk from the root; bail out on any missing link
/// 2. Sort the identifiers
/// 3. Hash: Blake3("carmirror-dag-v0:" || root || cid_1 || ... || cid_n)
pub async fn dag_digest<S: BlockStore + ?Sized>(store: &S, root: &Cid) -> Result<Option<[u8; 32]>> {
    let held = walk(store, &[*root]).await?;
    if !held.is_complete() {
        return Ok(None);
    }

    let mut cids = held.present;
    cids.sort_unstable();

    let mut hasher = blake3::Hasher::new();
    hasher.update(b"carmirror-dag-v0:");
    hasher.update(root.as_bytes());
    for cid in &cids {
        hasher.update(cid.as_bytes());
    }
    Ok(Some(*hasher.finalize().as_bytes()))
}

/// Result of convergence verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Both sides hold the complete DAG.
    Converged,
    /// The local side is still missing blocks.
    Incomplete { missing: Vec<Cid> },
    /// Both sides are complete but disagree on the block set.
    Diverged,
}

impl ConvergenceResult {
    /// Check if both sides have converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }
}

/// Compare the local DAG under `root` with a digest from the other side.
pub async fn verify_convergence<S: BlockStore + ?Sized>(
    local: &S,
    root: &Cid,
    remote_digest: &[u8; 32],
) -> Result<ConvergenceResult> {
    let held = walk(local, &[*root]).await?;
    if !held.is_complete() {
        return Ok(ConvergenceResult::Incomplete {
            missing: held.missing,
        });
    }

    match dag_digest(local, root).await? {
        Some(digest) if &digest == remote_digest => Ok(ConvergenceResult::Converged),
        _ => Ok(ConvergenceResult::Diverged),
    }
}
