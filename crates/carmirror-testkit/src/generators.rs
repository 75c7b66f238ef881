//! Proptest generators for property-based testing.

use proptest::prelude::*;

use carmirror_core::{Block, Cid};
use carmirror_store::{BlockStore, MemoryBlockStore};

/// Generate a random Cid.
pub fn cid() -> impl Strategy<Value = Cid> {
    any::<[u8; 32]>().prop_map(Cid::from_bytes)
}

/// Generate a set of distinct Cids.
pub fn cids(max: usize) -> impl Strategy<Value = Vec<Cid>> {
    prop::collection::hash_set(cid(), 0..=max).prop_map(|set| set.into_iter().collect())
}

/// Generate block data bytes of specified max length.
pub fn block_data(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Filter sizing inputs: element count and a false-positive rate.
pub fn filter_params() -> impl Strategy<Value = (u64, f64)> {
    (1u64..=5_000, 0.0001f64..0.5)
}

/// Arbitrary bit counts, including non-powers of two.
pub fn bit_count() -> impl Strategy<Value = u64> {
    1u64..=1 << 20
}

/// The shape of a DAG: `links[i]` lists the earlier nodes node `i` points to.
#[derive(Debug, Clone)]
pub struct DagShape {
    pub links: Vec<Vec<usize>>,
}

impl DagShape {
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl Arbitrary for DagShape {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..4), 1..40)
            .prop_map(|raw| {
                let links = raw
                    .into_iter()
                    .enumerate()
                    .map(|(i, picks)| {
                        let mut targets: Vec<usize> = if i == 0 {
                            Vec::new()
                        } else {
                            picks.iter().map(|pick| pick.index(i)).collect()
                        };
                        targets.sort_unstable();
                        targets.dedup();
                        targets
                    })
                    .collect();
                DagShape { links }
            })
            .boxed()
    }
}

/// Store the blocks of `shape`, plus a root over every unreferenced node.
///
/// Returns the root and every block identifier, root last.
pub async fn build_dag(store: &MemoryBlockStore, shape: &DagShape) -> (Cid, Vec<Cid>) {
    let mut cids = Vec::with_capacity(shape.len() + 1);
    let mut referenced = vec![false; shape.len()];

    for (i, targets) in shape.links.iter().enumerate() {
        let links = targets
            .iter()
            .map(|&t| {
                referenced[t] = true;
                cids[t]
            })
            .collect();
        let block = Block::new(format!("shape-{i}").into_bytes(), links);
        cids.push(*block.cid());
        store.put(block).await.expect("memory store put");
    }

    let orphans = cids
        .iter()
        .zip(&referenced)
        .filter(|(_, r)| !**r)
        .map(|(c, _)| *c)
        .collect();
    let root = Block::new(&b"shape-root"[..], orphans);
    let root_cid = *root.cid();
    store.put(root).await.expect("memory store put");
    cids.push(root_cid);

    (root_cid, cids)
}
