//! # CAR Mirror Core
//!
//! Pure primitives for CAR Mirror: content identifiers, blocks, and the
//! Bloom filter used to advertise which blocks a peer already holds.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Cid`] - Content identifier (Blake3 hash of a block)
//! - [`Block`] - A content-addressed node: links to children plus opaque data
//! - [`BloomFilter`] - Probabilistic "have" set exchanged between peers
//! - [`HashRegistry`] - Seeded hash functions keyed by their wire ID
//!
//! ## Bloom Filters
//!
//! ```rust
//! use carmirror_core::BloomFilter;
//!
//! let (bits, hashes) = BloomFilter::estimate_parameters(1000, 0.01);
//! assert_eq!((bits, hashes), (9586, 7));
//!
//! let mut filter = BloomFilter::new(bits, hashes);
//! filter.add(b"hello").add(b"world");
//! assert!(filter.test(b"hello"));
//! assert_eq!(filter.bit_count(), 16384);
//! ```

pub mod bitset;
pub mod block;
pub mod bloom;
pub mod error;
pub mod hasher;
pub mod types;

pub use bitset::BitSet;
pub use block::Block;
pub use bloom::{BloomFilter, FilterPayload};
pub use error::{CoreError, Result};
pub use hasher::{HashFn, HashRegistry, Hasher, BLAKE3_HASH_ID, XXH3_HASH_ID};
pub use types::Cid;
