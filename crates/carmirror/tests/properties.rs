//! Convergence properties over arbitrary DAGs and partial overlaps.

use std::sync::Arc;

use carmirror::store::{BlockStore, MemoryBlockStore};
use carmirror::sync::{dag_digest, MemoryNetwork};
use carmirror::{CarMirror, CarMirrorConfig, Cid, MirrorConfig};
use carmirror_testkit::generators::{build_dag, DagShape};
use carmirror_testkit::TestPeer;
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn node(network: &Arc<MemoryNetwork>, mirror: MirrorConfig) -> (CarMirror, Arc<MemoryBlockStore>) {
    let store = Arc::new(MemoryBlockStore::new());
    let config = CarMirrorConfig {
        mirror,
        ..Default::default()
    };
    let node = CarMirror::new(store.clone(), config)
        .unwrap()
        .attach_network(network.clone());
    (node, store)
}

/// Copy the blocks selected by `held` from `from` into `to`. Returns how many.
async fn share(from: &MemoryBlockStore, to: &MemoryBlockStore, cids: &[Cid], held: &[bool]) -> usize {
    let mut copied = 0;
    for (cid, _) in cids.iter().zip(held).filter(|(_, h)| **h) {
        let block = from.get(cid).await.unwrap().unwrap();
        to.put(block).await.unwrap();
        copied += 1;
    }
    copied
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn push_converges_from_any_overlap(
        shape in any::<DagShape>(),
        held in prop::collection::vec(any::<bool>(), 41),
        batch in 1usize..8,
        stream in any::<bool>(),
    ) {
        let (sent, missing, complete) = runtime().block_on(async {
            let network = MemoryNetwork::new();
            let mirror = MirrorConfig { max_batch_size: batch, ..Default::default() };
            let peer = TestPeer::join(&network, "peer", mirror.clone()).await;
            let (node, store) = node(&network, mirror).await;

            let (root, cids) = build_dag(&store, &shape).await;
            let shared = share(&store, &peer.store, &cids, &held).await;

            let report = node.push(&root.to_hex(), &peer.address, None, stream).await.unwrap();
            (report.blocks_sent, cids.len() - shared, peer.has_dag(&root).await)
        });

        prop_assert!(complete);
        prop_assert!(sent >= missing, "sent {} of {} missing", sent, missing);
    }

    #[test]
    fn pull_matches_source_digest(
        shape in any::<DagShape>(),
        held in prop::collection::vec(any::<bool>(), 41),
        stream in any::<bool>(),
    ) {
        let (local, remote) = runtime().block_on(async {
            let network = MemoryNetwork::new();
            let peer = TestPeer::join(&network, "peer", MirrorConfig::default()).await;
            let (node, store) = node(&network, MirrorConfig::default()).await;

            let (root, cids) = build_dag(&peer.store, &shape).await;
            share(&peer.store, &store, &cids, &held).await;

            node.pull(&root.to_hex(), &peer.address, stream).await.unwrap();
            (
                node.digest(&root).await.unwrap(),
                dag_digest(peer.store.as_ref(), &root).await.unwrap(),
            )
        });

        prop_assert!(local.is_some());
        prop_assert_eq!(local, remote);
    }
}
