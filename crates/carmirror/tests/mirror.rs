//! End-to-end push and pull between nodes on an in-memory network.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use carmirror::store::{BlockStore, MemoryBlockStore};
use carmirror::sync::{dag_digest, MemoryNetwork, SessionStore};
use carmirror::{
    Block, CarMirror, CarMirrorConfig, ConvergenceResult, MirrorConfig, MirrorError,
    TransferState,
};
use carmirror_testkit::{balanced, balanced_size, chain, copy_dag, random_dag, TestPeer};

struct Setup {
    node: CarMirror,
    store: Arc<MemoryBlockStore>,
    peer: TestPeer,
    network: Arc<MemoryNetwork>,
}

async fn setup(mirror: MirrorConfig) -> Setup {
    let network = MemoryNetwork::new();
    let peer = TestPeer::join(&network, "peer", mirror.clone()).await;
    let store = Arc::new(MemoryBlockStore::new());
    let config = CarMirrorConfig {
        mirror,
        ..Default::default()
    };
    let node = CarMirror::new(store.clone(), config)
        .unwrap()
        .attach_network(network.clone());
    Setup {
        node,
        store,
        peer,
        network,
    }
}

#[tokio::test]
async fn push_whole_dag_to_peer() {
    let s = setup(MirrorConfig::default()).await;
    let root = balanced(&s.store, 3, 3).await;

    let report = s
        .node
        .push(&root.to_hex(), &s.peer.address, None, false)
        .await
        .unwrap();

    assert_eq!(report.state, TransferState::Converged);
    assert_eq!(report.blocks_sent, balanced_size(3, 3));
    assert!(s.peer.has_dag(&root).await);
    assert!(s.node.sessions().is_empty(), "local session finalized");
    assert!(s.peer.sessions.is_empty(), "remote session closed");

    let remote = dag_digest(s.peer.store.as_ref(), &root).await.unwrap().unwrap();
    assert_eq!(s.node.verify(&root, &remote).await.unwrap(), ConvergenceResult::Converged);
}

#[tokio::test]
async fn push_streaming_honours_batch_size() {
    let s = setup(MirrorConfig {
        max_batch_size: 5,
        ..Default::default()
    })
    .await;
    let root = balanced(&s.store, 3, 3).await;

    let report = s
        .node
        .push(&root.to_hex(), &s.peer.address, None, true)
        .await
        .unwrap();

    assert!(report.is_converged());
    assert_eq!(report.blocks_sent, 40);
    assert!(report.rounds >= 8, "40 blocks at 5 per round");
    assert!(s.peer.has_dag(&root).await);
}

#[tokio::test]
async fn push_to_peer_that_has_everything() {
    let s = setup(MirrorConfig::default()).await;
    let root = random_dag(&s.store, 11, 30).await;
    let count = copy_dag(&s.store, &s.peer.store, &root).await;

    let report = s
        .node
        .push(&root.to_hex(), &s.peer.address, None, false)
        .await
        .unwrap();

    assert!(report.is_converged());
    assert_eq!(report.blocks_sent, 0);
    assert_eq!(report.blocks_skipped, count);
}

#[tokio::test]
async fn push_since_marker_sends_only_new_blocks() {
    let s = setup(MirrorConfig::default()).await;
    let old_head = chain(&s.store, 6).await;
    copy_dag(&s.store, &s.peer.store, &old_head).await;
    let marker = s.node.marker().await.unwrap();

    let next = Block::new(&b"next"[..], vec![old_head]);
    let newest = Block::new(&b"newest"[..], vec![*next.cid()]);
    let root = *newest.cid();
    s.store.put(next).await.unwrap();
    s.store.put(newest).await.unwrap();

    let report = s
        .node
        .push(&root.to_hex(), &s.peer.address, Some(&marker.to_string()), false)
        .await
        .unwrap();

    assert!(report.is_converged());
    assert_eq!(report.candidates, 2);
    assert_eq!(report.blocks_sent, 2);
    assert!(s.peer.has_dag(&root).await);
}

#[tokio::test]
async fn pull_whole_dag_from_peer() {
    let s = setup(MirrorConfig::default()).await;
    let root = random_dag(&s.peer.store, 3, 60).await;

    let report = s.node.pull(&root.to_hex(), &s.peer.address, false).await.unwrap();

    assert!(report.is_converged());
    assert_eq!(report.blocks_received, 61);
    assert_eq!(s.node.local_cids(&root).await.unwrap().len(), 61);
    assert!(s.node.sessions().is_empty());
    assert!(s.peer.sessions.is_empty());
    assert_eq!(
        s.node.digest(&root).await.unwrap(),
        dag_digest(s.peer.store.as_ref(), &root).await.unwrap()
    );
}

#[tokio::test]
async fn pull_streaming_converges() {
    let s = setup(MirrorConfig {
        max_batch_size: 4,
        ..Default::default()
    })
    .await;
    let root = balanced(&s.peer.store, 2, 5).await;

    let report = s.node.pull(&root.to_hex(), &s.peer.address, true).await.unwrap();

    assert!(report.is_converged());
    assert_eq!(report.blocks_received, balanced_size(2, 5));
    assert!(report.rounds > 1);
}

#[tokio::test]
async fn pull_unknown_root_reports_missing_blocks() {
    let s = setup(MirrorConfig::default()).await;
    let root = carmirror::Cid::from_bytes([0x5a; 32]);

    let err = s
        .node
        .pull(&root.to_hex(), &s.peer.address, false)
        .await
        .unwrap_err();

    assert!(matches!(err.root_cause(), MirrorError::MissingBlocks { .. }));
    assert!(s.node.sessions().is_empty(), "session finalized on failure");
    assert_eq!(s.node.digest(&root).await.unwrap(), None);
}

#[tokio::test]
async fn push_to_departed_peer_is_a_transport_error() {
    let s = setup(MirrorConfig::default()).await;
    let root = chain(&s.store, 3).await;
    s.network.disconnect("peer").await;

    let err = s
        .node
        .push(&root.to_hex(), &s.peer.address, None, false)
        .await
        .unwrap_err();

    assert!(err.is_transport_error());
    assert!(s.node.sessions().is_empty());
}

#[tokio::test]
async fn concurrent_sessions_are_unique() {
    let s = setup(MirrorConfig::default()).await;
    let node = Arc::new(s.node);

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let node = Arc::clone(&node);
        tasks.push(tokio::spawn(async move {
            (0..50).map(|_| node.create_session()).collect::<Vec<_>>()
        }));
    }

    let mut ids = HashSet::new();
    for task in tasks {
        for id in task.await.unwrap() {
            assert!(ids.insert(id), "duplicate session id");
        }
    }
    assert_eq!(ids.len(), 800);
    assert_eq!(node.sessions().len(), 800);
}

#[tokio::test(start_paused = true)]
async fn reaper_purges_idle_sessions() {
    let s = setup(MirrorConfig {
        session_ttl: Duration::from_secs(5),
        ..Default::default()
    })
    .await;
    let _reaper = s.node.spawn_reaper(Duration::from_secs(1));
    let id = s.node.create_session();
    assert_eq!(s.node.sessions().len(), 1);

    tokio::time::sleep(Duration::from_secs(8)).await;

    assert!(s.node.sessions().is_empty());
    assert!(!s.node.finalize(&id));
}

#[tokio::test]
async fn provider_serves_other_nodes() {
    // A second node pulls from the first node's provider.
    let s = setup(MirrorConfig::default()).await;
    let root = balanced(&s.store, 2, 3).await;
    let address = s.network.register("first", s.node.provider()).await;

    let other = CarMirror::new(Arc::new(MemoryBlockStore::new()), CarMirrorConfig::default())
        .unwrap()
        .attach_network(s.network.clone());
    let report = other.pull(&root.to_hex(), &address, false).await.unwrap();

    assert_eq!(report.blocks_received, balanced_size(2, 3));
    assert!(s.node.sessions().is_empty(), "provider session closed");
}
