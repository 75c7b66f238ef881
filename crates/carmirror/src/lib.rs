//! # CAR Mirror
//!
//! The unified API for CAR Mirror: push and pull content-addressed DAGs
//! between peers, sending only the blocks the other side lacks.
//!
//! ## Overview
//!
//! A [`CarMirror`] node owns a block store and plays both roles:
//!
//! - **Requester**: [`CarMirror::push`] and [`CarMirror::pull`] reconcile a
//!   DAG with a remote provider, round by round, using Bloom filters
//! - **Provider**: [`CarMirror::provider`] answers the same rounds from peers
//! - **HTTP**: [`CarMirror::router`] serves the provider endpoints plus
//!   `/mirror/push` and `/mirror/pull` control routes
//!
//! ## Key Concepts
//!
//! - **Session**: Per-transfer state with an idle TTL; finalized when the
//!   transfer ends, successful or not.
//! - **Round**: One request/response exchange. Each response advertises what
//!   the receiving side already holds.
//! - **False positive**: A block a filter wrongly claims. Recovered by
//!   missing-link detection on the receiving side.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use carmirror::{CarMirror, CarMirrorConfig};
//! use carmirror::store::MemoryBlockStore;
//!
//! async fn example(root: &str) {
//!     let store = Arc::new(MemoryBlockStore::new());
//!     let node = CarMirror::new(store, CarMirrorConfig::default()).unwrap();
//!
//!     let report = node
//!         .push(root, "http://peer:8080", None, true)
//!         .await
//!         .unwrap();
//!     println!("sent {} blocks in {} rounds", report.blocks_sent, report.rounds);
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `carmirror::core` - Identifiers, blocks, Bloom filters
//! - `carmirror::store` - Block storage and traversal
//! - `carmirror::sync` - Messages, sessions, reconcilers
//! - `carmirror::http` - HTTP transport and provider routes

pub mod api;
pub mod config;
pub mod service;

pub use carmirror_core as core;
pub use carmirror_http as http;
pub use carmirror_store as store;
pub use carmirror_sync as sync;

pub use api::{PullParams, PushParams, TransferResponse, MIRROR_PULL_PATH, MIRROR_PUSH_PATH};
pub use config::CarMirrorConfig;
pub use service::CarMirror;

pub use carmirror_core::{Block, BloomFilter, Cid, HashRegistry};
pub use carmirror_sync::{
    ConvergenceResult, MirrorConfig, MirrorError, Result, SessionId, TransferReport,
    TransferState,
};
