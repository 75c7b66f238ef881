//! BlockStore trait: the abstract interface for block persistence.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use carmirror_core::{Block, Cid};

use crate::error::{Result, StoreError};

/// A position in a store's insertion log.
///
/// Pushing with a marker narrows the candidate set to blocks inserted after
/// it. The string form is the decimal sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DiffMarker(pub u64);

impl fmt::Display for DiffMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DiffMarker {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse()
            .map(DiffMarker)
            .map_err(|_| StoreError::InvalidMarker(s.to_string()))
    }
}

/// The BlockStore trait: async get/put by content identifier.
///
/// Implementations must tolerate concurrent readers; the reconciliation
/// engine never takes an exclusive lock on the store.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Store a block.
    ///
    /// Returns `true` if the block was new, `false` if it was already present.
    async fn put(&self, block: Block) -> Result<bool>;

    /// Get a block by identifier.
    async fn get(&self, cid: &Cid) -> Result<Option<Block>>;

    /// Check if a block exists.
    async fn has(&self, cid: &Cid) -> Result<bool>;

    /// The current end of the insertion log.
    async fn marker(&self) -> Result<DiffMarker>;

    /// Identifiers inserted after `marker`, oldest first.
    async fn added_since(&self, marker: DiffMarker) -> Result<Vec<Cid>>;

    /// Number of stored blocks.
    async fn len(&self) -> Result<usize>;
}

#[async_trait]
impl<S: BlockStore + ?Sized> BlockStore for std::sync::Arc<S> {
    async fn put(&self, block: Block) -> Result<bool> {
        (**self).put(block).await
    }

    async fn get(&self, cid: &Cid) -> Result<Option<Block>> {
        (**self).get(cid).await
    }

    async fn has(&self, cid: &Cid) -> Result<bool> {
        (**self).has(cid).await
    }

    async fn marker(&self) -> Result<DiffMarker> {
        (**self).marker().await
    }

    async fn added_since(&self, marker: DiffMarker) -> Result<Vec<Cid>> {
        (**self).added_since(marker).await
    }

    async fn len(&self) -> Result<usize> {
        (**self).len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_string_roundtrip() {
        let marker = DiffMarker(42);
        assert_eq!(marker.to_string(), "42");
        assert_eq!("42".parse::<DiffMarker>().unwrap(), marker);
    }

    #[test]
    fn test_marker_rejects_garbage() {
        assert!(matches!(
            "yesterday".parse::<DiffMarker>(),
            Err(StoreError::InvalidMarker(_))
        ));
    }
}
