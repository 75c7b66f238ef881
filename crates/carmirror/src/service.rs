//! The CarMirror service: requester and provider over one block store.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use carmirror_core::{Cid, HashRegistry};
use carmirror_http::HttpTransport;
use carmirror_store::{traverse, BlockStore, DiffMarker};
use carmirror_sync::transport::memory::SCHEME as MEMORY_SCHEME;
use carmirror_sync::{
    dag_digest, spawn_reaper, verify_convergence, ConvergenceResult, MemoryNetwork,
    MemorySessionStore, MirrorError, Provider, Pull, Push, Reaper, Result, Session, SessionId,
    SessionStore, TransferReport, Transport,
};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::api;
use crate::config::CarMirrorConfig;

/// A CAR Mirror node.
///
/// Pushes and pulls DAGs held in its block store and, through
/// [`CarMirror::provider`], answers the same requests from peers.
pub struct CarMirror {
    store: Arc<dyn BlockStore>,
    sessions: Arc<MemorySessionStore>,
    registry: Arc<HashRegistry>,
    config: CarMirrorConfig,
    provider: Arc<Provider>,
    http: Arc<HttpTransport>,
    network: Option<Arc<MemoryNetwork>>,
}

impl CarMirror {
    /// Create a node with the default hash registry.
    pub fn new(store: Arc<dyn BlockStore>, config: CarMirrorConfig) -> Result<Self> {
        Self::with_registry(store, config, HashRegistry::default())
    }

    /// Create a node whose filters resolve hash IDs against `registry`.
    pub fn with_registry(
        store: Arc<dyn BlockStore>,
        config: CarMirrorConfig,
        registry: HashRegistry,
    ) -> Result<Self> {
        config.validate(&registry)?;

        let registry = Arc::new(registry);
        let sessions = Arc::new(MemorySessionStore::new(config.mirror.session_ttl));
        let provider = Arc::new(Provider::new(
            Arc::clone(&store),
            sessions.clone(),
            Arc::clone(&registry),
            config.mirror.clone(),
        ));
        let http = Arc::new(HttpTransport::new(config.request_timeout)?);

        Ok(Self {
            store,
            sessions,
            registry,
            config,
            provider,
            http,
            network: None,
        })
    }

    /// Route `mem://` addresses through `network`.
    pub fn attach_network(mut self, network: Arc<MemoryNetwork>) -> Self {
        self.network = Some(network);
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    pub fn config(&self) -> &CarMirrorConfig {
        &self.config
    }

    pub fn registry(&self) -> &HashRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<MemorySessionStore> {
        &self.sessions
    }

    /// The serving side, sharing this node's store and sessions.
    pub fn provider(&self) -> Arc<Provider> {
        Arc::clone(&self.provider)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────────

    pub fn create_session(&self) -> SessionId {
        self.sessions.create().id().clone()
    }

    /// Cancel and drop a session. Returns whether it was live.
    pub fn finalize(&self, id: &SessionId) -> bool {
        self.sessions.finalize(id)
    }

    /// Purge expired sessions every `every` until the handle is dropped.
    pub fn spawn_reaper(&self, every: Duration) -> Reaper {
        spawn_reaper(self.sessions.clone(), every)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transfers
    // ─────────────────────────────────────────────────────────────────────────

    /// Transport for `address`, chosen by scheme.
    pub fn remote(&self, address: &str) -> Result<Arc<dyn Transport>> {
        if address.starts_with("http://") || address.starts_with("https://") {
            let http: Arc<dyn Transport> = self.http.clone();
            return Ok(http);
        }
        if address.starts_with(MEMORY_SCHEME) {
            return match &self.network {
                Some(network) => {
                    let memory: Arc<dyn Transport> = Arc::new(network.transport());
                    Ok(memory)
                }
                None => Err(MirrorError::Config(format!(
                    "no memory network attached for {address}"
                ))),
            };
        }
        Err(MirrorError::Config(format!(
            "unsupported remote address {address:?}"
        )))
    }

    /// Push the DAG under `root` to `destination`.
    ///
    /// With a `diff` marker only blocks stored after it (plus the root) are
    /// offered. With `stream` set, each round carries at most
    /// `max_batch_size` blocks.
    pub async fn push(
        &self,
        root: &str,
        destination: &str,
        diff: Option<&str>,
        stream: bool,
    ) -> Result<TransferReport> {
        let root = Cid::parse(root)?;
        let diff = diff.map(str::parse::<DiffMarker>).transpose()?;
        let transport = self.remote(destination)?;

        let session = self.sessions.create();
        debug!(session = %session.id(), %root, %destination, "push started");
        let result = Push::new(
            self.store.as_ref(),
            transport.as_ref(),
            &self.registry,
            &self.config.mirror,
            root,
            destination,
        )
        .diff(diff)
        .streaming(stream)
        .run(session.scope())
        .await;

        self.settle(&session, &result);
        result
    }

    /// Pull the DAG under `root` from `source` into the local store.
    pub async fn pull(&self, root: &str, source: &str, stream: bool) -> Result<TransferReport> {
        let root = Cid::parse(root)?;
        let transport = self.remote(source)?;

        let session = self.sessions.create();
        debug!(session = %session.id(), %root, %source, "pull started");
        let result = Pull::new(
            self.store.as_ref(),
            transport.as_ref(),
            &self.registry,
            &self.config.mirror,
            root,
            source,
        )
        .streaming(stream)
        .run(session.scope())
        .await;

        self.settle(&session, &result);
        result
    }

    /// Record the outcome on the session, then finalize it.
    fn settle(&self, session: &Session, result: &Result<TransferReport>) {
        if let Ok(report) = result {
            let stats = session.stats();
            stats.rounds.store(report.rounds, Ordering::Relaxed);
            stats.blocks_sent.store(report.blocks_sent, Ordering::Relaxed);
            stats
                .blocks_received
                .store(report.blocks_received, Ordering::Relaxed);
        }
        self.sessions.finalize(session.id());
    }

    /// Every identifier under `root`, root first.
    ///
    /// If a block is missing the error carries what was found before it.
    pub async fn local_cids(&self, root: &Cid) -> Result<Vec<Cid>> {
        Ok(traverse(self.store.as_ref(), root).await?)
    }

    /// Digest of the complete DAG under `root`, or `None` while incomplete.
    pub async fn digest(&self, root: &Cid) -> Result<Option<[u8; 32]>> {
        dag_digest(self.store.as_ref(), root).await
    }

    /// Compare the local DAG under `root` with a peer's [`CarMirror::digest`].
    pub async fn verify(&self, root: &Cid, remote_digest: &[u8; 32]) -> Result<ConvergenceResult> {
        verify_convergence(self.store.as_ref(), root, remote_digest).await
    }

    /// The current end of the store's insertion log, for a later `diff` push.
    pub async fn marker(&self) -> Result<DiffMarker> {
        Ok(self.store.marker().await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // HTTP
    // ─────────────────────────────────────────────────────────────────────────

    /// Provider routes plus the `/mirror/*` control routes.
    pub fn router(self: &Arc<Self>) -> Router {
        carmirror_http::router(self.provider()).merge(api::routes(Arc::clone(self)))
    }

    /// Serve [`CarMirror::router`] on the configured `http_remote_addr`.
    pub async fn listen(self: Arc<Self>) -> Result<()> {
        let addr = self
            .config
            .http_remote_addr
            .clone()
            .ok_or_else(|| MirrorError::Config("http_remote_addr is not set".into()))?;
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| MirrorError::Transport(format!("bind {addr}: {e}")))?;
        info!(%addr, "car mirror listening");

        let app = self.router();
        carmirror_http::serve(listener, app)
            .await
            .map_err(|e| MirrorError::Transport(e.to_string()))
    }
}
