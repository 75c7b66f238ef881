//! # CAR Mirror Sync
//!
//! Session-based reconciliation of content-addressed DAGs between a
//! requester and a provider.
//!
//! ## Overview
//!
//! A requester pushes a DAG to, or pulls one from, a remote provider in
//! rounds. Each round exchanges a Bloom filter of what one side already
//! holds, so only blocks the other side lacks cross the wire. Filter false
//! positives are recovered through missing-link detection.
//!
//! ## Key Properties
//!
//! - **Idempotent**: storing a block twice is a no-op
//! - **Order-free**: a provider accepts blocks in any order
//! - **Bounded**: sessions expire after an idle TTL; transfers stop after
//!   a round limit
//! - **Bandwidth-efficient**: only unclaimed blocks are sent
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use carmirror_core::HashRegistry;
//! use carmirror_store::MemoryBlockStore;
//! use carmirror_sync::{MirrorConfig, Push, SessionScope, Transport};
//!
//! async fn example(transport: &dyn Transport, root: carmirror_core::Cid) {
//!     let store = MemoryBlockStore::new();
//!     let registry = HashRegistry::default();
//!     let config = MirrorConfig::default();
//!
//!     let report = Push::new(&store, transport, &registry, &config, root, "mem://peer")
//!         .streaming(true)
//!         .run(&SessionScope::unbounded())
//!         .await;
//!     println!("{:?}", report.map(|r| r.blocks_sent));
//! }
//! ```
//!
//! ## Message Flow (push)
//!
//! ```text
//! Requester                               Provider
//!   |-------- PushRequest (no blocks) ------>|
//!   |<------- PushResponse (filter, missing)-|
//!   |-------- PushRequest (batch) ---------->|
//!   |<------- PushResponse (filter, missing)-|
//!   |                 ...                    |
//!   |-------- close ------------------------>|
//! ```

pub mod convergence;
pub mod error;
pub mod messages;
pub mod protocol;
pub mod provider;
pub mod pull;
pub mod push;
pub mod session;
pub mod transport;

pub use convergence::{dag_digest, verify_convergence, ConvergenceResult};
pub use error::{MirrorError, Result};
pub use messages::{
    check_version, from_cbor, limits, to_cbor, ErrorBody, ErrorCode, PullRequest, PullResponse,
    PushRequest, PushResponse, SessionId, PROTOCOL_ID, PROTOCOL_VERSION, SESSION_ID_HEADER,
};
pub use protocol::{have_filter, Direction, MirrorConfig, TransferReport, TransferState};
pub use provider::Provider;
pub use pull::Pull;
pub use push::{Candidates, Push, TransportExt};
pub use session::{
    spawn_reaper, CancelHandle, MemorySessionStore, Reaper, Session, SessionScope, SessionStats,
    SessionStore,
};
pub use transport::{memory::MemoryNetwork, memory::MemoryTransport, Transport};
