//! The serving side of CAR Mirror.
//!
//! A provider answers push rounds by storing the blocks it receives and
//! replying with a filter of what it holds under the root, plus the links it
//! still lacks. It answers pull rounds by walking the requested roots and
//! sending every block the requester's filter does not claim.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use carmirror_core::{BloomFilter, HashRegistry};
use carmirror_store::{walk, BlockStore};
use tracing::{debug, instrument};

use crate::error::{MirrorError, Result};
use crate::messages::{
    limits, PullRequest, PullResponse, PushRequest, PushResponse, SessionId, PROTOCOL_VERSION,
};
use crate::protocol::{have_filter, MirrorConfig};
use crate::session::{Session, SessionStore};

/// Serves push and pull rounds against a local block store.
pub struct Provider {
    store: Arc<dyn BlockStore>,
    sessions: Arc<dyn SessionStore>,
    registry: Arc<HashRegistry>,
    config: MirrorConfig,
}

impl Provider {
    pub fn new(
        store: Arc<dyn BlockStore>,
        sessions: Arc<dyn SessionStore>,
        registry: Arc<HashRegistry>,
        config: MirrorConfig,
    ) -> Self {
        Self {
            store,
            sessions,
            registry,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// A missing reference opens a new session; an unknown one is an error.
    fn resolve(&self, id: Option<SessionId>) -> Result<Arc<Session>> {
        match id {
            None => Ok(self.sessions.create()),
            Some(id) => self
                .sessions
                .get(&id)
                .ok_or(MirrorError::SessionNotFound(id)),
        }
    }

    /// Store pushed blocks; reply with what is held and what is still missing.
    #[instrument(skip_all, fields(root = %request.root, blocks = request.blocks.len()))]
    pub async fn receive_push(&self, request: PushRequest) -> Result<PushResponse> {
        request.validate()?;
        let session = self.resolve(request.session)?;

        let mut stored = 0;
        for block in request.blocks {
            if self.store.put(block).await? {
                stored += 1;
            }
        }
        session
            .stats()
            .blocks_received
            .fetch_add(stored, Ordering::Relaxed);

        let held = match session.take_walk(&request.root) {
            Some(mut held) => {
                held.resume(&*self.store).await?;
                held
            }
            None => walk(&*self.store, &[request.root]).await?,
        };
        let filter = have_filter(&self.registry, &self.config, &held.present)?;
        let mut missing = held.missing.clone();
        missing.truncate(limits::MAX_MISSING_PER_RESPONSE);

        session.touch();
        debug!(
            session = %session.id(),
            stored,
            held = held.present.len(),
            missing = missing.len(),
            "push round"
        );
        session.keep_walk(request.root, held);

        Ok(PushResponse {
            version: PROTOCOL_VERSION,
            session: session.id().clone(),
            filter: Some(filter.to_payload()),
            missing,
        })
    }

    /// Send the blocks under `roots` that the requester's filter does not claim.
    ///
    /// Requested roots are always sent when held: they were asked for because
    /// the requester lacks them, so a positive filter test there is a false
    /// positive.
    #[instrument(skip_all, fields(roots = request.roots.len()))]
    pub async fn serve_pull(&self, request: PullRequest) -> Result<PullResponse> {
        request.validate()?;
        let session = self.resolve(request.session.clone())?;

        let filter = request
            .filter
            .as_ref()
            .map(|payload| BloomFilter::from_payload(&self.registry, payload))
            .transpose()?;
        let limit = request
            .max_blocks
            .unwrap_or(limits::MAX_BLOCKS_PER_MESSAGE)
            .clamp(1, limits::MAX_BLOCKS_PER_MESSAGE);

        let held = walk(&*self.store, &request.roots).await?;
        let mut blocks = Vec::new();
        let mut skipped = 0usize;
        for cid in &held.present {
            if blocks.len() >= limit {
                break;
            }
            let claimed = filter.as_ref().is_some_and(|f| f.test(cid.as_bytes()));
            if claimed && !request.roots.contains(cid) {
                skipped += 1;
                continue;
            }
            if let Some(block) = self.store.get(cid).await? {
                blocks.push(block);
            }
        }

        session
            .stats()
            .blocks_sent
            .fetch_add(blocks.len(), Ordering::Relaxed);
        session.touch();
        debug!(
            session = %session.id(),
            sent = blocks.len(),
            skipped,
            unknown = held.missing.len(),
            "pull round"
        );

        Ok(PullResponse {
            version: PROTOCOL_VERSION,
            session: session.id().clone(),
            blocks,
        })
    }

    /// Finalize a session. Unknown sessions are ignored.
    pub fn close(&self, id: &SessionId) -> bool {
        self.sessions.finalize(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carmirror_core::{Block, Cid};
    use carmirror_store::MemoryBlockStore;

    use crate::session::MemorySessionStore;

    fn provider() -> (Provider, Arc<MemoryBlockStore>) {
        let store = Arc::new(MemoryBlockStore::new());
        let config = MirrorConfig::default();
        let provider = Provider::new(
            store.clone(),
            Arc::new(MemorySessionStore::new(config.session_ttl)),
            Arc::new(HashRegistry::default()),
            config,
        );
        (provider, store)
    }

    /// root -> [a, b]
    fn small_dag() -> (Block, Block, Block) {
        let a = Block::leaf(&b"a"[..]);
        let b = Block::leaf(&b"b"[..]);
        let root = Block::new(&b"root"[..], vec![*a.cid(), *b.cid()]);
        (root, a, b)
    }

    #[tokio::test]
    async fn test_push_reports_missing_then_converges() {
        let (provider, store) = provider();
        let (root, a, b) = small_dag();

        let opened = provider.receive_push(PushRequest::open(*root.cid())).await.unwrap();
        assert_eq!(opened.missing, vec![*root.cid()]);

        let response = provider
            .receive_push(PushRequest::new(
                Some(opened.session.clone()),
                *root.cid(),
                vec![root.clone(), a.clone()],
            ))
            .await
            .unwrap();
        assert_eq!(response.missing, vec![*b.cid()]);

        let filter =
            BloomFilter::from_payload(&HashRegistry::default(), &response.filter.unwrap()).unwrap();
        assert!(filter.test(root.cid().as_bytes()));
        assert!(filter.test(a.cid().as_bytes()));

        let response = provider
            .receive_push(PushRequest::new(Some(opened.session), *root.cid(), vec![b]))
            .await
            .unwrap();
        assert!(response.missing.is_empty());
        assert_eq!(store.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_push_session_switching_roots() {
        let (provider, _) = provider();
        let (root, a, _) = small_dag();
        let other = Block::leaf(&b"other"[..]);

        let opened = provider.receive_push(PushRequest::open(*root.cid())).await.unwrap();
        let session = Some(opened.session);
        provider
            .receive_push(PushRequest::new(session.clone(), *root.cid(), vec![root.clone(), a]))
            .await
            .unwrap();

        let response = provider
            .receive_push(PushRequest::new(session.clone(), *other.cid(), vec![]))
            .await
            .unwrap();
        assert_eq!(response.missing, vec![*other.cid()]);

        let response = provider
            .receive_push(PushRequest::new(session, *root.cid(), vec![]))
            .await
            .unwrap();
        assert_eq!(response.missing.len(), 1, "only b is still missing");
    }

    #[tokio::test]
    async fn test_push_rejects_tampered_block() {
        let (provider, _) = provider();
        let good = Block::leaf(&b"good"[..]);
        let mut bytes = crate::messages::to_cbor(&good).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered: Block = crate::messages::from_cbor(&bytes).unwrap();

        let err = provider
            .receive_push(PushRequest::new(None, *good.cid(), vec![tampered]))
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::InvalidBlock(_)));
    }

    #[tokio::test]
    async fn test_unknown_session_rejected() {
        let (provider, _) = provider();
        let err = provider
            .receive_push(PushRequest::new(
                Some(SessionId::from("feed")),
                Cid::from_bytes([1; 32]),
                vec![],
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_pull_skips_claimed_blocks() {
        let (provider, store) = provider();
        let (root, a, b) = small_dag();
        for block in [&root, &a, &b] {
            store.put(block.clone()).await.unwrap();
        }

        let mut have = BloomFilter::with_estimates(1, 1e-4);
        have.add(a.cid().as_bytes());
        let response = provider
            .serve_pull(PullRequest::new(None, vec![*root.cid()], Some(have.to_payload())))
            .await
            .unwrap();

        let sent: Vec<Cid> = response.blocks.iter().map(|b| *b.cid()).collect();
        assert_eq!(sent, vec![*root.cid(), *b.cid()]);
    }

    #[tokio::test]
    async fn test_pull_sends_requested_root_despite_filter() {
        let (provider, store) = provider();
        let leaf = Block::leaf(&b"leaf"[..]);
        store.put(leaf.clone()).await.unwrap();

        // A filter that claims everything.
        let saturated = BloomFilter::from_bytes(8, 1, &[0xff]);
        let response = provider
            .serve_pull(PullRequest::new(
                None,
                vec![*leaf.cid()],
                Some(saturated.to_payload()),
            ))
            .await
            .unwrap();
        assert_eq!(response.blocks, vec![leaf]);
    }

    #[tokio::test]
    async fn test_pull_respects_max_blocks() {
        let (provider, store) = provider();
        let (root, a, b) = small_dag();
        for block in [&root, &a, &b] {
            store.put(block.clone()).await.unwrap();
        }

        let response = provider
            .serve_pull(PullRequest::new(None, vec![*root.cid()], None).with_max_blocks(Some(2)))
            .await
            .unwrap();
        assert_eq!(response.blocks.len(), 2);
    }

    #[tokio::test]
    async fn test_pull_rejects_unbounded_hash_count() {
        let (provider, store) = provider();
        let leaf = Block::leaf(&b"leaf"[..]);
        store.put(leaf.clone()).await.unwrap();

        let mut payload = BloomFilter::from_bytes(8, 1, &[0xff]).to_payload();
        payload.hash_count = u64::MAX;
        let err = provider
            .serve_pull(PullRequest::new(None, vec![*leaf.cid()], Some(payload)))
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::InvalidMessage(_)));
        assert!(provider.sessions().is_empty(), "no session opened");
    }

    #[tokio::test]
    async fn test_pull_unknown_hash_function() {
        let (provider, _) = provider();
        let mut payload = BloomFilter::new(64, 2).to_payload();
        payload.hash_function = 42;

        let err = provider
            .serve_pull(PullRequest::new(None, vec![], Some(payload)))
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::UnknownHashFunction(42)));
    }
}
