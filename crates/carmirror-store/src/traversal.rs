//! DAG traversal over a [`BlockStore`].
//!
//! Order is depth-first, pre-order, with duplicates suppressed: the root
//! comes first, then each child subtree in link order. Peers must accept any
//! order, so this is a convenience rather than a guarantee of the protocol.

use std::collections::HashSet;

use carmirror_core::Cid;
use thiserror::Error;
use tracing::trace;

use crate::error::StoreError;
use crate::traits::BlockStore;

/// Why a traversal stopped early.
#[derive(Debug, Error)]
pub enum TraversalFailure {
    #[error("block {0} not found")]
    MissingBlock(Cid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A traversal that could not finish.
///
/// `partial` holds every identifier discovered before the failure, root
/// first, so callers can choose to continue best-effort.
#[derive(Debug, Error)]
#[error("traversal from root {root} failed: {source}")]
pub struct TraversalError {
    pub root: Cid,
    pub partial: Vec<Cid>,
    #[source]
    pub source: TraversalFailure,
}

/// Enumerate every identifier reachable from `root`, root included.
///
/// Stops at the first block the store does not have.
pub async fn traverse<S: BlockStore + ?Sized>(
    store: &S,
    root: &Cid,
) -> Result<Vec<Cid>, TraversalError> {
    let mut order = vec![*root];
    let mut seen = HashSet::new();
    let mut stack = vec![*root];

    let fail = |partial: Vec<Cid>, source: TraversalFailure| TraversalError {
        root: *root,
        partial,
        source,
    };

    while let Some(cid) = stack.pop() {
        if !seen.insert(cid) {
            continue;
        }

        let block = match store.get(&cid).await {
            Ok(Some(block)) => block,
            Ok(None) => {
                trace!(%root, missing = %cid, found = order.len(), "traversal stopped");
                return Err(fail(order, TraversalFailure::MissingBlock(cid)));
            }
            Err(e) => return Err(fail(order, e.into())),
        };

        if cid != *root {
            order.push(cid);
        }
        stack.extend(block.links().iter().rev().filter(|l| !seen.contains(*l)));
    }

    Ok(order)
}

/// Result of a walk that tolerates missing blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Walk {
    /// Blocks found under the roots, in traversal order.
    pub present: Vec<Cid>,
    /// Identifiers linked from present blocks (or given as roots) that the
    /// store does not hold, in discovery order.
    pub missing: Vec<Cid>,
}

impl Walk {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Bring the walk up to date after blocks were added to `store`.
    ///
    /// Only the missing frontier is re-walked; blocks already present stay
    /// present since stores never shrink.
    pub async fn resume<S: BlockStore + ?Sized>(&mut self, store: &S) -> Result<(), StoreError> {
        if self.missing.is_empty() {
            return Ok(());
        }
        let step = walk(store, &self.missing).await?;
        let mut known: HashSet<Cid> = self.present.iter().copied().collect();
        self.present
            .extend(step.present.into_iter().filter(|cid| known.insert(*cid)));
        self.missing = step.missing;
        Ok(())
    }
}

/// Walk everything present under `roots`, recording what is absent.
pub async fn walk<S: BlockStore + ?Sized>(
    store: &S,
    roots: &[Cid],
) -> Result<Walk, StoreError> {
    let mut result = Walk::default();
    let mut seen = HashSet::new();
    let mut stack: Vec<Cid> = roots.iter().rev().copied().collect();

    while let Some(cid) = stack.pop() {
        if !seen.insert(cid) {
            continue;
        }
        match store.get(&cid).await? {
            Some(block) => {
                result.present.push(cid);
                stack.extend(block.links().iter().rev().filter(|l| !seen.contains(*l)));
            }
            None => result.missing.push(cid),
        }
    }

    Ok(result)
}

/// Missing-block detector: identifiers referenced under `roots` that the
/// store does not have.
///
/// A destination runs this after ingesting a batch. Bloom filter false
/// positives show up here as blocks the sender skipped.
pub async fn missing_links<S: BlockStore + ?Sized>(
    store: &S,
    roots: &[Cid],
) -> Result<Vec<Cid>, StoreError> {
    Ok(walk(store, roots).await?.missing)
}
