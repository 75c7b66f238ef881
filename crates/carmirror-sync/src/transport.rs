//! Transport abstraction for the reconciliation protocol.
//!
//! A transport delivers one request to the provider at `address` and returns
//! its response. Implementations may use HTTP or anything else that carries
//! CBOR bodies.

use async_trait::async_trait;

use crate::error::Result;
use crate::messages::{PullRequest, PullResponse, PushRequest, PushResponse, SessionId};

/// Request/response transport to a remote provider.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a push round.
    async fn push(&self, address: &str, request: PushRequest) -> Result<PushResponse>;

    /// Deliver a pull round.
    async fn pull(&self, address: &str, request: PullRequest) -> Result<PullResponse>;

    /// Tell the provider the session is finished.
    async fn close_source(&self, address: &str, session: &SessionId) -> Result<()>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn push(&self, address: &str, request: PushRequest) -> Result<PushResponse> {
        (**self).push(address, request).await
    }

    async fn pull(&self, address: &str, request: PullRequest) -> Result<PullResponse> {
        (**self).pull(address, request).await
    }

    async fn close_source(&self, address: &str, session: &SessionId) -> Result<()> {
        (**self).close_source(address, session).await
    }
}

/// In-process transport for testing.
///
/// Providers register under a name and are addressed as `mem://<name>`.
/// Every message is CBOR-encoded and decoded on the way through, and
/// provider errors come back as [`MirrorError::Peer`], as they would over a
/// network.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    use crate::error::MirrorError;
    use crate::messages::{from_cbor, to_cbor};
    use crate::provider::Provider;

    /// Address scheme handled by [`MemoryTransport`].
    pub const SCHEME: &str = "mem://";

    /// Shared registry of in-process providers.
    pub struct MemoryNetwork {
        providers: RwLock<HashMap<String, Arc<Provider>>>,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Register a provider; returns its address.
        pub async fn register(&self, name: &str, provider: Arc<Provider>) -> String {
            self.providers.write().await.insert(name.to_string(), provider);
            format!("{SCHEME}{name}")
        }

        /// Remove a provider; later requests to it fail at the transport level.
        pub async fn disconnect(&self, name: &str) {
            self.providers.write().await.remove(name);
        }

        /// Create a transport connected to this network.
        pub fn transport(self: &Arc<Self>) -> MemoryTransport {
            MemoryTransport {
                network: Arc::clone(self),
            }
        }
    }

    impl Default for MemoryNetwork {
        fn default() -> Self {
            Self {
                providers: RwLock::new(HashMap::new()),
            }
        }
    }

    /// In-memory transport implementation.
    #[derive(Clone)]
    pub struct MemoryTransport {
        network: Arc<MemoryNetwork>,
    }

    impl MemoryTransport {
        async fn provider(&self, address: &str) -> Result<Arc<Provider>> {
            let name = address.strip_prefix(SCHEME).ok_or_else(|| {
                MirrorError::Transport(format!("unsupported address {address:?}"))
            })?;
            self.network
                .providers
                .read()
                .await
                .get(name)
                .cloned()
                .ok_or_else(|| MirrorError::Transport(format!("no provider at {address}")))
        }
    }

    /// CBOR out and back, as a network hop would.
    fn wire<T>(message: &T) -> Result<T>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        from_cbor(&to_cbor(message)?)
    }

    fn as_peer_error(err: MirrorError) -> MirrorError {
        MirrorError::Peer {
            code: err.code(),
            message: err.to_string(),
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn push(&self, address: &str, request: PushRequest) -> Result<PushResponse> {
            let provider = self.provider(address).await?;
            let response = provider
                .receive_push(wire(&request)?)
                .await
                .map_err(as_peer_error)?;
            wire(&response)
        }

        async fn pull(&self, address: &str, request: PullRequest) -> Result<PullResponse> {
            let provider = self.provider(address).await?;
            let response = provider
                .serve_pull(wire(&request)?)
                .await
                .map_err(as_peer_error)?;
            wire(&response)
        }

        async fn close_source(&self, address: &str, session: &SessionId) -> Result<()> {
            let provider = self.provider(address).await?;
            provider.close(session);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryNetwork;
    use super::*;
    use std::sync::Arc;

    use carmirror_core::{Block, HashRegistry};
    use carmirror_store::{BlockStore, MemoryBlockStore};

    use crate::error::MirrorError;
    use crate::messages::ErrorCode;
    use crate::protocol::MirrorConfig;
    use crate::provider::Provider;
    use crate::session::{MemorySessionStore, SessionStore};

    fn provider(store: Arc<MemoryBlockStore>) -> (Arc<Provider>, Arc<MemorySessionStore>) {
        let config = MirrorConfig::default();
        let sessions = Arc::new(MemorySessionStore::new(config.session_ttl));
        let provider = Provider::new(
            store,
            sessions.clone(),
            Arc::new(HashRegistry::default()),
            config,
        );
        (Arc::new(provider), sessions)
    }

    #[tokio::test]
    async fn test_memory_transport_push_roundtrip() {
        let network = MemoryNetwork::new();
        let store = Arc::new(MemoryBlockStore::new());
        let (provider, sessions) = provider(store.clone());
        let address = network.register("dest", provider).await;
        assert_eq!(address, "mem://dest");

        let transport = network.transport();
        let block = Block::leaf(&b"over the wire"[..]);
        let root = *block.cid();

        let opened = transport.push(&address, PushRequest::open(root)).await.unwrap();
        assert_eq!(opened.missing, vec![root]);
        assert_eq!(sessions.len(), 1);

        let response = transport
            .push(
                &address,
                PushRequest::new(Some(opened.session.clone()), root, vec![block]),
            )
            .await
            .unwrap();
        assert_eq!(response.session, opened.session);
        assert!(response.missing.is_empty());
        assert!(store.has(&root).await.unwrap());

        transport.close_source(&address, &response.session).await.unwrap();
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_address_is_transport_error() {
        let network = MemoryNetwork::new();
        let transport = network.transport();
        let root = Block::leaf(&b"x"[..]);

        let err = transport
            .push("mem://nobody", PushRequest::open(*root.cid()))
            .await
            .unwrap_err();
        assert!(err.is_transport_error());

        let err = transport
            .push("tcp://elsewhere", PushRequest::open(*root.cid()))
            .await
            .unwrap_err();
        assert!(err.is_transport_error());
    }

    #[tokio::test]
    async fn test_provider_errors_arrive_as_peer_errors() {
        let network = MemoryNetwork::new();
        let (provider, _) = provider(Arc::new(MemoryBlockStore::new()));
        let address = network.register("dest", provider).await;
        let transport = network.transport();

        let stale = SessionId::from("0000");
        let request = PushRequest::new(Some(stale), *Block::leaf(&b"x"[..]).cid(), vec![]);
        let err = transport.push(&address, request).await.unwrap_err();

        assert!(matches!(
            err,
            MirrorError::Peer {
                code: ErrorCode::SessionNotFound,
                ..
            }
        ));
        assert!(err.is_protocol_error());
    }

    #[tokio::test]
    async fn test_disconnect() {
        let network = MemoryNetwork::new();
        let (provider, _) = provider(Arc::new(MemoryBlockStore::new()));
        let address = network.register("dest", provider).await;
        network.disconnect("dest").await;

        let err = network
            .transport()
            .pull(&address, PullRequest::new(None, vec![], None))
            .await
            .unwrap_err();
        assert!(err.is_transport_error());
    }
}

/// Transports that misbehave partway through a transfer.
#[cfg(test)]
pub(crate) mod testing {
    use super::memory::MemoryTransport;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::session::{MemorySessionStore, SessionScope, SessionStore};

    /// What happens once `after` calls have gone through.
    pub(crate) enum Interruption {
        /// Cancel the requester's scope as the call returns.
        Cancel(Arc<SessionScope>),
        /// Hold the next call for this long before delivering it.
        Stall(Duration),
        /// Drop the provider's session before delivering the next call.
        Forget(Arc<MemorySessionStore>),
    }

    /// Counts push and pull calls and interrupts once.
    pub(crate) struct Interrupting {
        inner: MemoryTransport,
        after: usize,
        calls: AtomicUsize,
        interruption: Interruption,
    }

    impl Interrupting {
        pub(crate) fn new(inner: MemoryTransport, after: usize, interruption: Interruption) -> Self {
            Self {
                inner,
                after,
                calls: AtomicUsize::new(0),
                interruption,
            }
        }

        /// Run before delivering a call carrying `session`.
        async fn before(&self, session: Option<&SessionId>) -> usize {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.after + 1 {
                match &self.interruption {
                    Interruption::Stall(delay) => tokio::time::sleep(*delay).await,
                    Interruption::Forget(sessions) => {
                        if let Some(id) = session {
                            sessions.finalize(id);
                        }
                    }
                    Interruption::Cancel(_) => {}
                }
            }
            call
        }

        fn after_call(&self, call: usize) {
            if call == self.after {
                if let Interruption::Cancel(scope) = &self.interruption {
                    scope.cancel();
                }
            }
        }
    }

    #[async_trait]
    impl Transport for Interrupting {
        async fn push(&self, address: &str, request: PushRequest) -> Result<PushResponse> {
            let call = self.before(request.session.as_ref()).await;
            let response = self.inner.push(address, request).await;
            self.after_call(call);
            response
        }

        async fn pull(&self, address: &str, request: PullRequest) -> Result<PullResponse> {
            let call = self.before(request.session.as_ref()).await;
            let response = self.inner.pull(address, request).await;
            self.after_call(call);
            response
        }

        async fn close_source(&self, address: &str, session: &SessionId) -> Result<()> {
            self.inner.close_source(address, session).await
        }
    }
}
