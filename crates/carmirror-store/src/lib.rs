//! # CAR Mirror Store
//!
//! Storage abstraction for CAR Mirror. The reconciliation engine only needs
//! get/put by identifier and a way to enumerate the blocks under a root; both
//! live here behind the [`BlockStore`] trait.
//!
//! ## Key Types
//!
//! - [`BlockStore`] - The async trait for block storage
//! - [`MemoryBlockStore`] - In-memory implementation with an insertion log
//! - [`DiffMarker`] - A point in the insertion log, for incremental pushes
//! - [`traverse`] - Depth-first, pre-order, de-duplicated DAG walk
//! - [`missing_links`] - Identifiers referenced under a root but not stored
//!
//! ## Usage
//!
//! ```rust,no_run
//! use carmirror_core::Block;
//! use carmirror_store::{traverse, BlockStore, MemoryBlockStore};
//!
//! async fn example() {
//!     let store = MemoryBlockStore::new();
//!     let leaf = Block::leaf(&b"leaf"[..]);
//!     let root = Block::new(&b"root"[..], vec![*leaf.cid()]);
//!     store.put(leaf).await.unwrap();
//!     store.put(root.clone()).await.unwrap();
//!
//!     let cids = traverse(&store, root.cid()).await.unwrap();
//!     assert_eq!(cids.len(), 2);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent puts**: Putting the same block twice reports `false` the
//!   second time and does not move its position in the insertion log
//! - **Partial traversal**: A walk that hits a missing block still returns
//!   everything it found, attached to the error

pub mod error;
pub mod memory;
pub mod traits;
pub mod traversal;

pub use error::{Result, StoreError};
pub use memory::MemoryBlockStore;
pub use traits::{BlockStore, DiffMarker};
pub use traversal::{missing_links, traverse, walk, TraversalError, TraversalFailure, Walk};
