//! # CAR Mirror Testkit
//!
//! Testing utilities for CAR Mirror.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Filter sizing cases every implementation must agree on
//! - **Generators**: Proptest strategies for identifiers and DAG shapes
//! - **Fixtures**: DAG builders and in-memory peers
//!
//! ## Golden Vectors
//!
//! ```rust
//! use carmirror_testkit::vectors::verify_all_vectors;
//!
//! for (name, matches, got) in verify_all_vectors() {
//!     assert!(matches, "{name}: {got:?}");
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use carmirror_testkit::generators::DagShape;
//!
//! proptest! {
//!     #[test]
//!     fn shapes_are_small(shape: DagShape) {
//!         prop_assert!(shape.len() < 40);
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use carmirror_store::MemoryBlockStore;
//! use carmirror_testkit::fixtures::balanced;
//!
//! async fn example() {
//!     let store = MemoryBlockStore::new();
//!     let root = balanced(&store, 3, 4).await;
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{balanced, balanced_size, chain, copy_dag, fan, random_dag, TestPeer};
