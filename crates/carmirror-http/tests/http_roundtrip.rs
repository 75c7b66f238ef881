//! Push and pull through a real HTTP server on localhost.

use std::sync::Arc;
use std::time::Duration;

use carmirror_core::{Block, Cid, HashRegistry};
use carmirror_http::{router, serve, HttpTransport};
use carmirror_store::{BlockStore, MemoryBlockStore};
use carmirror_sync::{
    ErrorCode, MemorySessionStore, MirrorConfig, MirrorError, Provider, Pull, Push, PushRequest,
    SessionId, SessionScope, SessionStore, Transport,
};

struct Server {
    address: String,
    store: Arc<MemoryBlockStore>,
    sessions: Arc<MemorySessionStore>,
    _task: tokio::task::JoinHandle<()>,
}

async fn start() -> Server {
    let config = MirrorConfig::default();
    let store = Arc::new(MemoryBlockStore::new());
    let sessions = Arc::new(MemorySessionStore::new(config.session_ttl));
    let provider = Arc::new(Provider::new(
        store.clone(),
        sessions.clone(),
        Arc::new(HashRegistry::default()),
        config,
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    let task = tokio::spawn(async move {
        let _ = serve(listener, router(provider)).await;
    });

    Server {
        address,
        store,
        sessions,
        _task: task,
    }
}

async fn chain(store: &MemoryBlockStore, len: usize) -> Cid {
    let mut prev: Option<Cid> = None;
    for i in 0..len {
        let links = prev.into_iter().collect();
        let block = Block::new(format!("link-{i}").into_bytes(), links);
        prev = Some(*block.cid());
        store.put(block).await.unwrap();
    }
    prev.unwrap()
}

fn transport() -> HttpTransport {
    HttpTransport::new(Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_push_over_http() {
    let server = start().await;
    let local = MemoryBlockStore::new();
    let root = chain(&local, 20).await;
    let (registry, config) = (HashRegistry::default(), MirrorConfig::default());
    let transport = transport();

    let report = Push::new(&local, &transport, &registry, &config, root, &server.address)
        .streaming(true)
        .run(&SessionScope::unbounded())
        .await
        .unwrap();

    assert!(report.is_converged());
    assert_eq!(server.store.len().await.unwrap(), 20);
    assert!(server.sessions.is_empty(), "session closed over HTTP");
}

#[tokio::test]
async fn test_pull_over_http() {
    let server = start().await;
    let root = chain(&server.store, 12).await;
    let local = MemoryBlockStore::new();
    let (registry, config) = (HashRegistry::default(), MirrorConfig::default());
    let transport = transport();

    let report = Pull::new(&local, &transport, &registry, &config, root, &server.address)
        .run(&SessionScope::unbounded())
        .await
        .unwrap();

    assert!(report.is_converged());
    assert_eq!(local.len().await.unwrap(), 12);
}

#[tokio::test]
async fn test_unknown_session_maps_to_peer_error() {
    let server = start().await;
    let request = PushRequest::new(
        Some(SessionId::from("deadbeef")),
        Cid::from_bytes([1; 32]),
        vec![],
    );

    let err = transport().push(&server.address, request).await.unwrap_err();
    assert!(matches!(
        err,
        MirrorError::Peer {
            code: ErrorCode::SessionNotFound,
            ..
        }
    ));
}

#[tokio::test]
async fn test_unreachable_provider_is_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let err = transport()
        .push(&address, PushRequest::open(Cid::from_bytes([2; 32])))
        .await
        .unwrap_err();
    assert!(err.is_transport_error());
}
