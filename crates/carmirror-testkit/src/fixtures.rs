//! Test fixtures and helpers.
//!
//! DAG builders and in-memory peers for integration tests. Every builder
//! labels its blocks uniquely, so no two nodes share an identifier.

use std::sync::Arc;

use carmirror_core::{Block, Cid, HashRegistry};
use carmirror_store::{traverse, BlockStore, MemoryBlockStore};
use carmirror_sync::{MemoryNetwork, MemorySessionStore, MirrorConfig, Provider};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

async fn put(store: &MemoryBlockStore, block: Block) -> Cid {
    let cid = *block.cid();
    store.put(block).await.expect("memory store put");
    cid
}

/// A linked list of `len` blocks; returns the head. Each block links to the
/// one before it.
pub async fn chain(store: &MemoryBlockStore, len: usize) -> Cid {
    assert!(len > 0, "chain needs at least one block");
    let mut prev: Option<Cid> = None;
    for i in 0..len {
        let block = Block::new(format!("chain-{i}").into_bytes(), prev.into_iter().collect());
        prev = Some(put(store, block).await);
    }
    prev.expect("len > 0")
}

/// A root with `width` leaf children.
pub async fn fan(store: &MemoryBlockStore, width: usize) -> Cid {
    let mut links = Vec::with_capacity(width);
    for i in 0..width {
        links.push(put(store, Block::leaf(format!("fan-leaf-{i}").into_bytes())).await);
    }
    put(store, Block::new(&b"fan-root"[..], links)).await
}

/// A complete tree of the given depth: `1 + fanout + ... + fanout^depth`
/// blocks.
pub async fn balanced(store: &MemoryBlockStore, depth: u32, fanout: usize) -> Cid {
    assert!(fanout > 0, "fanout must be at least 1");
    let mut level: Vec<Cid> = Vec::new();
    let width = fanout.pow(depth);
    for i in 0..width {
        level.push(put(store, Block::leaf(format!("tree-{depth}-{i}").into_bytes())).await);
    }

    for d in (0..depth).rev() {
        let mut parents = Vec::with_capacity(level.len() / fanout);
        for (i, children) in level.chunks(fanout).enumerate() {
            let block = Block::new(format!("tree-{d}-{i}").into_bytes(), children.to_vec());
            parents.push(put(store, block).await);
        }
        level = parents;
    }

    level[0]
}

/// Number of blocks [`balanced`] creates.
pub fn balanced_size(depth: u32, fanout: usize) -> usize {
    (0..=depth).map(|d| fanout.pow(d)).sum()
}

/// A random DAG of `nodes` blocks plus a root, reproducible from `seed`.
///
/// Each block links to a few earlier ones, so subtrees are shared. The root
/// links to every block nothing else points at.
pub async fn random_dag(store: &MemoryBlockStore, seed: u64, nodes: usize) -> Cid {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut cids: Vec<Cid> = Vec::with_capacity(nodes);
    let mut has_parent = vec![false; nodes];

    for i in 0..nodes {
        let mut links = Vec::new();
        if i > 0 {
            for _ in 0..rng.gen_range(0..=3usize) {
                let target = rng.gen_range(0..i);
                if !links.contains(&cids[target]) {
                    links.push(cids[target]);
                    has_parent[target] = true;
                }
            }
        }
        let block = Block::new(format!("random-{seed}-{i}").into_bytes(), links);
        cids.push(put(store, block).await);
    }

    let orphans = cids
        .iter()
        .zip(&has_parent)
        .filter(|(_, parent)| !**parent)
        .map(|(cid, _)| *cid)
        .collect();
    put(store, Block::new(format!("random-{seed}-root").into_bytes(), orphans)).await
}

/// Copy every block under `root` from `from` into `to`.
pub async fn copy_dag(from: &MemoryBlockStore, to: &MemoryBlockStore, root: &Cid) -> usize {
    let cids = traverse(from, root).await.expect("source dag is complete");
    for cid in &cids {
        let block = from.get(cid).await.expect("get").expect("present");
        to.put(block).await.expect("put");
    }
    cids.len()
}

/// A provider registered on a [`MemoryNetwork`].
pub struct TestPeer {
    pub store: Arc<MemoryBlockStore>,
    pub sessions: Arc<MemorySessionStore>,
    pub provider: Arc<Provider>,
    pub address: String,
}

impl TestPeer {
    /// Register a fresh provider called `name` on `network`.
    pub async fn join(network: &MemoryNetwork, name: &str, config: MirrorConfig) -> Self {
        let store = Arc::new(MemoryBlockStore::new());
        let sessions = Arc::new(MemorySessionStore::new(config.session_ttl));
        let provider = Arc::new(Provider::new(
            store.clone(),
            sessions.clone(),
            Arc::new(HashRegistry::default()),
            config,
        ));
        let address = network.register(name, provider.clone()).await;
        Self {
            store,
            sessions,
            provider,
            address,
        }
    }

    /// Whether every block under `root` is held.
    pub async fn has_dag(&self, root: &Cid) -> bool {
        traverse(self.store.as_ref(), root).await.is_ok()
    }
}
