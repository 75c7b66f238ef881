//! Pull reconciliation: fetch a DAG from a remote provider.
//!
//! Each round advertises what is already held under the roots as a filter
//! and asks for the subgraphs still missing. Blocks hidden by a filter false
//! positive surface as missing links on the next walk and are asked for by
//! identifier, which the provider always honors.

use carmirror_core::{Cid, HashRegistry};
use carmirror_store::{walk, BlockStore};
use tracing::{debug, info, warn};

use crate::error::{MirrorError, Result};
use crate::messages::{PullRequest, PullResponse, SessionId};
use crate::protocol::{have_filter, Direction, MirrorConfig, TransferReport, TransferState};
use crate::push::cancellable;
use crate::session::SessionScope;
use crate::transport::Transport;

/// One pull of `root` from the provider at `address`.
pub struct Pull<'a, S: ?Sized, T: ?Sized> {
    store: &'a S,
    transport: &'a T,
    registry: &'a HashRegistry,
    config: &'a MirrorConfig,
    root: Cid,
    address: String,
    stream: bool,
    session: Option<SessionId>,
    report: TransferReport,
}

impl<'a, S, T> Pull<'a, S, T>
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
            stream: false,
            session: None,
            report: TransferReport::new(Direction::Pull, root, address),
        }
    }

    /// Ask for at most `max_batch_size` blocks per round.
    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Run to convergence, cancellation, or failure.
    pub async fn run(mut self, scope: &SessionScope) -> Result<TransferReport> {
        let (root, address) = (self.root, self.address.clone());
        let result = self.reconcile(scope).await;

        if let Some(session) = &self.session {
            if let Err(err) = self.transport.close_source(&self.address, session).await {
                debug!(%session, error = %err, "close_source failed");
            }
        }

        match result {
            Ok(()) => {
                self.report.state = TransferState::Converged;
                info!(
                    %root,
                    %address,
                    rounds = self.report.rounds,
                    received = self.report.blocks_received,
                    "pull converged"
                );
                Ok(self.report)
            }
            Err(err) => {
                self.report.state = err.transfer_state();
                warn!(%root, %address, state = ?self.report.state, error = %err, "pull stopped");
                Err(err.during_transfer(root, &address))
            }
        }
    }

    async fn reconcile(&mut self, scope: &SessionScope) -> Result<()> {
        self.report.state = TransferState::Resolving;
        let roots = [self.root];
        let mut held = walk(self.store, &roots).await?;
        self.report.candidates = held.missing.len();

        while !held.is_complete() {
            if scope.is_cancelled() {
                return Err(MirrorError::Cancelled);
            }
            if self.report.rounds >= self.config.max_rounds {
                return Err(MirrorError::RoundLimit(self.report.rounds));
            }

            self.report.state = TransferState::Filtering;
            let filter = have_filter(self.registry, self.config, &held.present)?;
            let wanted: Vec<Cid> = held
                .missing
                .iter()
                .take(crate::messages::limits::MAX_ROOTS_PER_REQUEST)
                .copied()
                .collect();
            let request = PullRequest::new(self.session.clone(), wanted, Some(filter.to_payload()))
                .with_max_blocks(self.stream.then_some(self.config.max_batch_size));

            self.report.state = TransferState::Transferring;
            self.report.rounds += 1;
            let response = self.exchange(scope, request).await?;

            let mut stored = 0;
            for block in response.blocks {
                if self.store.put(block).await? {
                    stored += 1;
                }
            }
            self.report.blocks_received += stored;
            scope.touch();

            held.resume(self.store).await?;
            debug!(
                root = %self.root,
                round = self.report.rounds,
                stored,
                missing = held.missing.len(),
                "pull round"
            );

            if stored == 0 && !held.is_complete() {
                return Err(MirrorError::MissingBlocks {
                    root: self.root,
                    missing: held.missing,
                });
            }
        }

        Ok(())
    }

    async fn exchange(&mut self, scope: &SessionScope, request: PullRequest) -> Result<PullResponse> {
        let result = cancellable(scope, self.transport.pull(&self.address, request.clone())).await;
        let response = match result {
            Err(err) if err.is_session_not_found() && request.session.is_some() => {
                debug!(root = %self.root, "provider lost the session, reopening");
                let fresh = PullRequest {
                    session: None,
                    ..request
                };
                cancellable(scope, self.transport.pull(&self.address, fresh)).await?
            }
            other => other?,
        };
        response.validate()?;
        self.session = Some(response.session.clone());
        self.report.session = self.session.clone();
        Ok(response)
    }
}
