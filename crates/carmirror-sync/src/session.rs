//! Session registry.
//!
//! A session groups the rounds of one reconciliation. It carries a
//! cancellation scope with a sliding deadline: each successful round calls
//! [`SessionScope::touch`], and a session idle past its TTL reads as
//! cancelled and is dropped on the next lookup or purge.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use carmirror_core::Cid;
use carmirror_store::Walk;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::messages::SessionId;

/// Cancellation signal plus an optional sliding deadline.
#[derive(Debug)]
pub struct SessionScope {
    cancel: watch::Sender<bool>,
    started: Instant,
    ttl: Option<Duration>,
    /// Milliseconds after `started`.
    deadline_ms: AtomicU64,
}

impl SessionScope {
    /// A scope that expires `ttl` after its last touch.
    pub fn new(ttl: Duration) -> Self {
        let (cancel, _) = watch::channel(false);
        let scope = Self {
            cancel,
            started: Instant::now(),
            ttl: Some(ttl),
            deadline_ms: AtomicU64::new(0),
        };
        scope.touch();
        scope
    }

    /// A scope that ends only when cancelled.
    pub fn unbounded() -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            cancel,
            started: Instant::now(),
            ttl: None,
            deadline_ms: AtomicU64::new(u64::MAX),
        }
    }

    /// Push the deadline out to now + TTL.
    pub fn touch(&self) {
        if let Some(ttl) = self.ttl {
            let deadline = self.started.elapsed() + ttl;
            let ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
            self.deadline_ms.store(ms, Ordering::Relaxed);
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.ttl?;
        let ms = self.deadline_ms.load(Ordering::Relaxed);
        Some(self.started + Duration::from_millis(ms))
    }

    pub fn is_expired(&self) -> bool {
        self.deadline().is_some_and(|d| Instant::now() >= d)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow() || self.is_expired()
    }

    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Resolves once the scope is cancelled or its deadline passes.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.subscribe();
        loop {
            if self.is_cancelled() {
                return;
            }
            match self.deadline() {
                Some(deadline) => {
                    tokio::select! {
                        changed = rx.changed() => {
                            if changed.is_err() {
                                return;
                            }
                        }
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => {
                    if rx.changed().await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// Handle that cancels a session's scope. Held by the registry.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<SessionScope>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.cancel();
    }
}

/// Per-session counters.
#[derive(Debug, Default)]
pub struct SessionStats {
    pub rounds: AtomicUsize,
    pub blocks_received: AtomicUsize,
    pub blocks_sent: AtomicUsize,
}

/// A live session.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    created_at: Instant,
    scope: Arc<SessionScope>,
    stats: SessionStats,
    /// Provider side: what is held under the push root as of the last round.
    held: Mutex<Option<(Cid, Walk)>>,
}

impl Session {
    fn new(id: SessionId, ttl: Duration) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            scope: Arc::new(SessionScope::new(ttl)),
            stats: SessionStats::default(),
            held: Mutex::new(None),
        }
    }

    /// Take the walk kept for `root`, if the last round was for it.
    pub fn take_walk(&self, root: &Cid) -> Option<Walk> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        match held.take() {
            Some((kept, walk)) if kept == *root => Some(walk),
            _ => None,
        }
    }

    /// Keep `walk` for the next round on `root`.
    pub fn keep_walk(&self, root: Cid, walk: Walk) {
        *self.held.lock().unwrap_or_else(PoisonError::into_inner) = Some((root, walk));
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn scope(&self) -> &SessionScope {
        &self.scope
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Record a completed round and slide the deadline.
    pub fn touch(&self) {
        self.stats.rounds.fetch_add(1, Ordering::Relaxed);
        self.scope.touch();
    }

    fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.scope))
    }
}

/// Registry of live sessions.
pub trait SessionStore: Send + Sync {
    /// Create a session with a fresh, unique identifier.
    fn create(&self) -> Arc<Session>;

    /// Look up a live session. Expired sessions are finalized and not
    /// returned.
    fn get(&self, id: &SessionId) -> Option<Arc<Session>>;

    /// Cancel and remove a session. Returns whether it existed; calling it
    /// again is a no-op.
    fn finalize(&self, id: &SessionId) -> bool;

    /// Finalize every expired session. Returns how many were removed.
    fn purge_expired(&self) -> usize;

    /// Number of registered sessions.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory session registry.
///
/// Both maps live under one lock, so a session and its cancel handle are
/// always added and removed together.
pub struct MemorySessionStore {
    ttl: Duration,
    registry: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionId, Arc<Session>>,
    cancels: HashMap<SessionId, CancelHandle>,
}

impl Registry {
    fn remove(&mut self, id: &SessionId) -> Option<CancelHandle> {
        self.sessions.remove(id);
        self.cancels.remove(id)
    }
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        // The registry holds no invariants a panicking holder could break
        // halfway, so recover the guard.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self) -> Arc<Session> {
        let mut registry = self.lock();
        let id = loop {
            let candidate = SessionId::generate();
            if !registry.sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let session = Arc::new(Session::new(id.clone(), self.ttl));
        registry.cancels.insert(id.clone(), session.cancel_handle());
        registry.sessions.insert(id.clone(), Arc::clone(&session));
        debug!(session = %id, "session created");
        session
    }

    fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        let mut registry = self.lock();
        let session = registry.sessions.get(id)?;
        if !session.scope().is_cancelled() {
            return Some(Arc::clone(session));
        }

        if let Some(handle) = registry.remove(id) {
            handle.cancel();
        }
        debug!(session = %id, "session expired");
        None
    }

    fn finalize(&self, id: &SessionId) -> bool {
        let handle = self.lock().remove(id);
        match handle {
            Some(handle) => {
                handle.cancel();
                debug!(session = %id, "session finalized");
                true
            }
            None => false,
        }
    }

    fn purge_expired(&self) -> usize {
        let mut registry = self.lock();
        let expired: Vec<SessionId> = registry
            .sessions
            .iter()
            .filter(|(_, session)| session.scope().is_cancelled())
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(handle) = registry.remove(id) {
                handle.cancel();
            }
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "purged expired sessions");
        }
        expired.len()
    }

    fn len(&self) -> usize {
        self.lock().sessions.len()
    }
}

/// Background task that purges expired sessions. Aborted on drop.
pub struct Reaper {
    handle: JoinHandle<()>,
}

impl Reaper {
    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawn a task that calls [`SessionStore::purge_expired`] every `every`.
pub fn spawn_reaper(sessions: Arc<dyn SessionStore>, every: Duration) -> Reaper {
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let purged = sessions.purge_expired();
            trace!(purged, "reaper tick");
        }
    });
    Reaper { handle }
}
