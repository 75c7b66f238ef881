//! In-memory implementation of the BlockStore trait.
//!
//! Used by tests and by embedders that do not need persistence. Thread-safe
//! via RwLock; readers never block each other.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use carmirror_core::{Block, Cid};

use crate::error::{Result, StoreError};
use crate::traits::{BlockStore, DiffMarker};

/// In-memory block store.
pub struct MemoryBlockStore {
    inner: RwLock<MemoryStoreInner>,
}

struct MemoryStoreInner {
    /// Blocks indexed by identifier.
    blocks: HashMap<Cid, Block>,

    /// Insertion log; a DiffMarker is an index into it.
    log: Vec<Cid>,
}

impl MemoryBlockStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner {
                blocks: HashMap::new(),
                log: Vec::new(),
            }),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }
}

impl Default for MemoryBlockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn put(&self, block: Block) -> Result<bool> {
        block.verify()?;

        let mut inner = self.write()?;
        let cid = *block.cid();
        if inner.blocks.contains_key(&cid) {
            return Ok(false);
        }

        inner.blocks.insert(cid, block);
        inner.log.push(cid);
        Ok(true)
    }

    async fn get(&self, cid: &Cid) -> Result<Option<Block>> {
        Ok(self.read()?.blocks.get(cid).cloned())
    }

    async fn has(&self, cid: &Cid) -> Result<bool> {
        Ok(self.read()?.blocks.contains_key(cid))
    }

    async fn marker(&self) -> Result<DiffMarker> {
        Ok(DiffMarker(self.read()?.log.len() as u64))
    }

    async fn added_since(&self, marker: DiffMarker) -> Result<Vec<Cid>> {
        let inner = self.read()?;
        let start = (marker.0 as usize).min(inner.log.len());
        Ok(inner.log[start..].to_vec())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.read()?.blocks.len())
    }
}
