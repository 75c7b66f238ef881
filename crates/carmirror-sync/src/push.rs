//! Push reconciliation: send a DAG to a remote provider.
//!
//! ## Rounds
//!
//! 1. Resolve the candidate set (traversal, diff, or an explicit list).
//! 2. Open a session with an empty push; the response carries the
//!    provider's filter.
//! 3. Each round sends the candidates the filter does not claim, plus any
//!    blocks the provider reports missing. A candidate the filter claims is
//!    dropped from the working set; if the claim was a false positive, the
//!    provider lists the block as missing in a later response.
//! 4. Stop when nothing is left to send.

use std::collections::HashSet;
use std::future::Future;

use carmirror_core::{Block, BloomFilter, Cid, HashRegistry};
use carmirror_store::{traverse, walk, BlockStore, DiffMarker, TraversalFailure};
use tracing::{debug, info, warn};

use crate::error::{MirrorError, Result};
use crate::messages::{limits, PushRequest, PushResponse, SessionId};
use crate::protocol::{Direction, MirrorConfig, TransferReport, TransferState};
use crate::session::SessionScope;
use crate::transport::Transport;

/// Re-opening a session the provider forgot is retried this many times.
const MAX_SESSION_REOPENS: usize = 3;

/// Where the candidate set comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidates {
    /// Everything reachable from the root.
    Traverse,
    /// The root plus blocks inserted into the local store after the marker.
    Since(DiffMarker),
    /// A caller-supplied set.
    Explicit(Vec<Cid>),
}

/// One push of `root` to the provider at `address`.
pub struct Push<'a, S: ?Sized, T: ?Sized> {
    store: &'a S,
    transport: &'a T,
    registry: &'a HashRegistry,
    config: &'a MirrorConfig,
    root: Cid,
    address: String,
    candidates: Candidates,
    stream: bool,
    session: Option<SessionId>,
    report: TransferReport,
}

impl<'a, S, T> Push<'a, S, T>
where
    S: BlockStore + ?Sized,
    T: Transport + ?Sized,
{
    pub fn new(
        store: &'a S,
        transport: &'a T,
        registry: &'a HashRegistry,
        config: &'a MirrorConfig,
        root: Cid,
        address: &str,
    ) -> Self {
        Self {
            store,
            transport,
            registry,
            config,
            root,
            address: address.to_string(),
            candidates: Candidates::Traverse,
            stream: false,
            session: None,
            report: TransferReport::new(Direction::Push, root, address),
        }
    }

    pub fn candidates(mut self, candidates: Candidates) -> Self {
        self.candidates = candidates;
        self
    }

    /// Narrow the candidate set to blocks added after `diff`, if given.
    pub fn diff(self, diff: Option<DiffMarker>) -> Self {
        match diff {
            Some(marker) => self.candidates(Candidates::Since(marker)),
            None => self,
        }
    }

    /// Send at most `max_batch_size` blocks per round.
    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Run to convergence, cancellation, or failure.
    pub async fn run(mut self, scope: &SessionScope) -> Result<TransferReport> {
        let (root, address) = (self.root, self.address.clone());
        match self.reconcile(scope).await {
            Ok(()) => {
                self.report.state = TransferState::Converged;
                self.close().await;
                info!(
                    %root,
                    %address,
                    rounds = self.report.rounds,
                    sent = self.report.blocks_sent,
                    skipped = self.report.blocks_skipped,
                    "push converged"
                );
                Ok(self.report)
            }
            Err(err) => {
                self.report.state = err.transfer_state();
                self.close().await;
                warn!(%root, %address, state = ?self.report.state, error = %err, "push stopped");
                Err(err.during_transfer(root, &address))
            }
        }
    }

    async fn reconcile(&mut self, scope: &SessionScope) -> Result<()> {
        self.report.state = TransferState::Resolving;
        let mut remaining = self.resolve().await?;
        self.report.candidates = remaining.len();
        if remaining.is_empty() {
            debug!(root = %self.root, "nothing to push");
            return Ok(());
        }

        let mut response = self.exchange(scope, Vec::new()).await?;
        // Candidates dropped on a filter hit; seeing one reported missing
        // later means the hit was a false positive.
        let mut claimed: HashSet<Cid> = HashSet::new();

        loop {
            if scope.is_cancelled() {
                return Err(MirrorError::Cancelled);
            }

            self.report.state = TransferState::Filtering;
            let filter = response
                .filter
                .as_ref()
                .map(|payload| BloomFilter::from_payload(self.registry, payload))
                .transpose()?;

            if let Some(filter) = &filter {
                let before = remaining.len();
                remaining.retain(|cid| {
                    let hit = filter.test(cid.as_bytes());
                    if hit {
                        claimed.insert(*cid);
                    }
                    !hit
                });
                self.report.blocks_skipped += before - remaining.len();
            }

            let mut queued: HashSet<Cid> = HashSet::new();
            let mut pending: Vec<Cid> = response
                .missing
                .iter()
                .chain(remaining.iter())
                .filter(|cid| queued.insert(**cid))
                .copied()
                .collect();

            if pending.is_empty() {
                return Ok(());
            }

            // A streamed pass is one batch. A full pass goes out in as many
            // message-sized requests as it takes, without consulting the
            // filter in between.
            let chunk = if self.stream {
                self.config.max_batch_size.clamp(1, limits::MAX_BLOCKS_PER_MESSAGE)
            } else {
                limits::MAX_BLOCKS_PER_MESSAGE
            };
            if self.stream {
                pending.truncate(chunk);
            }

            self.report.state = TransferState::Transferring;
            for batch in pending.chunks(chunk) {
                if self.report.rounds >= self.config.max_rounds {
                    return Err(MirrorError::RoundLimit(self.report.rounds));
                }
                let blocks = self.load(batch).await?;
                self.report.rounds += 1;
                debug!(
                    root = %self.root,
                    round = self.report.rounds,
                    batch = blocks.len(),
                    "push round"
                );
                response = self.exchange(scope, blocks).await?;
                self.report.blocks_sent += batch.len();
            }

            self.report.recovered += pending.iter().filter(|c| claimed.remove(*c)).count();
            let batch: HashSet<Cid> = pending.into_iter().collect();
            remaining.retain(|cid| !batch.contains(cid));
            scope.touch();
        }
    }

    async fn resolve(&self) -> Result<Vec<Cid>> {
        match &self.candidates {
            Candidates::Explicit(cids) => Ok(cids.clone()),
            Candidates::Since(marker) => {
                let added = self.store.added_since(*marker).await?;
                let mut cids = Vec::with_capacity(added.len() + 1);
                cids.push(self.root);
                cids.extend(added.into_iter().filter(|cid| *cid != self.root));
                Ok(cids)
            }
            Candidates::Traverse => match traverse(self.store, &self.root).await {
                Ok(cids) => Ok(cids),
                Err(err)
                    if matches!(
                        err.source,
                        TraversalFailure::MissingBlock(cid) if cid != self.root
                    ) =>
                {
                    // Best effort: every present block, including those in
                    // subtrees after the first gap.
                    let held = walk(self.store, &[self.root]).await?;
                    warn!(
                        root = %self.root,
                        error = %err.source,
                        found = held.present.len(),
                        absent = held.missing.len(),
                        "traversal incomplete, pushing what is present"
                    );
                    Ok(held.present)
                }
                Err(err) => Err(err.into()),
            },
        }
    }

    /// Fetch blocks to send. Every one must be held locally.
    async fn load(&self, cids: &[Cid]) -> Result<Vec<Block>> {
        let mut blocks = Vec::with_capacity(cids.len());
        let mut absent = Vec::new();
        for cid in cids {
            match self.store.get(cid).await? {
                Some(block) => blocks.push(block),
                None => absent.push(*cid),
            }
        }
        if !absent.is_empty() {
            return Err(MirrorError::MissingBlocks {
                root: self.root,
                missing: absent,
            });
        }
        Ok(blocks)
    }

    /// Send one push round, re-opening the session if the provider lost it.
    async fn exchange(&mut self, scope: &SessionScope, blocks: Vec<Block>) -> Result<PushResponse> {
        let mut reopens = 0;
        loop {
            let request = PushRequest::new(self.session.clone(), self.root, blocks.clone());
            let result = cancellable(scope, self.transport.push(&self.address, request)).await;
            match result {
                Ok(response) => {
                    response.validate()?;
                    self.session = Some(response.session.clone());
                    self.report.session = self.session.clone();
                    return Ok(response);
                }
                Err(err)
                    if err.is_session_not_found()
                        && self.session.is_some()
                        && reopens < MAX_SESSION_REOPENS =>
                {
                    reopens += 1;
                    debug!(root = %self.root, "provider lost the session, reopening");
                    self.session = None;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn close(&self) {
        if let Some(session) = &self.session {
            if let Err(err) = self.transport.close_source(&self.address, session).await {
                debug!(%session, error = %err, "close_source failed");
            }
        }
    }
}

/// Race `fut` against the scope's cancellation.
pub(crate) async fn cancellable<F, R>(scope: &SessionScope, fut: F) -> Result<R>
where
    F: Future<Output = Result<R>>,
{
    tokio::select! {
        biased;
        _ = scope.cancelled() => Err(MirrorError::Cancelled),
        result = fut => result,
    }
}

/// Convenience sends over any transport.
pub trait TransportExt: Transport {
    /// Push everything under `root` to `address` in one non-streamed
    /// reconciliation with default settings.
    fn send<S: BlockStore + ?Sized>(
        &self,
        store: &S,
        address: &str,
        root: Cid,
    ) -> impl Future<Output = Result<TransferReport>> + Send;
}

impl<T: Transport + ?Sized> TransportExt for T {
    async fn send<S: BlockStore + ?Sized>(
        &self,
        store: &S,
        address: &str,
        root: Cid,
    ) -> Result<TransferReport> {
        let registry = HashRegistry::default();
        let config = MirrorConfig::default();
        let scope = SessionScope::unbounded();
        Push::new(store, self, &registry, &config, root, address)
            .run(&scope)
            .await
    }
}
