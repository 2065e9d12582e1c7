use std::{future::Future, time::Duration};

use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

mod cycle;
pub use cycle::{ChainState, Cursor, CycleFailure, CycleOutcome};

use crate::{
    adapter::ChainAdapter,
    common::{AdapterError, StoreError, WatcherError},
    config::{DEFAULT_POLL_INTERVAL, DEFAULT_STORE_TIMEOUT},
    primitives::Chain,
    store::Store,
};

/// Polls one chain for finalized bridge messages and merges them into a store.
///
/// Each cycle fetches the finalized watermark, explores the next range up to it (capped by the
/// adapter's batch size) and merges the messages found. The cursor only advances once a merge
/// succeeded, so a failed range is explored again on the next cycle.
#[derive(Debug)]
pub struct Watcher<A: ChainAdapter, S: Store> {
    /// Source of finalized watermarks and messages.
    adapter: A,
    /// Destination of merged messages, shared with the other watchers.
    store: S,
    /// The chain of `adapter`.
    chain: Chain,
    /// Local progress.
    state: ChainState,
    /// Pause between cycles once caught up.
    poll_interval: Duration,
    /// Deadline for each store call.
    store_timeout: Duration,
}

impl<A: ChainAdapter, S: Store> Watcher<A, S> {
    /// Creates a watcher for the chain of `adapter`. The cursor is seeded from the store on the
    /// first cycle.
    pub fn new(adapter: A, store: S) -> Self {
        let chain = adapter.chain();
        Self {
            adapter,
            store,
            chain,
            state: ChainState::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Sets the pause between cycles.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Sets the deadline after which a store read or merge counts as failed.
    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// The watched chain.
    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// Current local progress.
    pub fn state(&self) -> ChainState {
        self.state
    }

    /// The adapter this watcher reads from.
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// The store this watcher merges into.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Seeds the cursor from the last observed message, or from the deployment watermark of the
    /// chain if nothing was stored yet.
    async fn seed(&mut self) -> Result<(), StoreError> {
        let last = bounded(self.store_timeout, self.store.last_observed(self.chain)).await?;
        let cursor = match last {
            Some(last) => Cursor::Next(last.watermark.saturating_add(1)),
            None => self.adapter.initial_watermark().map_or(Cursor::FirstFinalized, Cursor::Next),
        };

        info!(chain = %self.chain, ?cursor, "Seeded watcher");
        self.state.cursor = cursor;
        Ok(())
    }

    fn fatal(&self, err: AdapterError) -> WatcherError {
        error!(chain = %self.chain, error = %err, "Stopping watcher");
        WatcherError::Configuration { chain: self.chain, reason: err.to_string() }
    }

    fn failed(&mut self, failure: CycleFailure) -> CycleOutcome {
        self.state.consecutive_failures += 1;
        warn!(
            chain = %self.chain,
            failures = self.state.consecutive_failures,
            ?failure,
            "Cycle failed, retrying next cycle"
        );
        CycleOutcome::Failed(failure)
    }

    /// Runs exactly one cycle.
    ///
    /// Retryable failures are reported as [`CycleOutcome::Failed`]. An error is only returned
    /// for failures that retrying cannot fix.
    #[instrument(skip(self), fields(chain = %self.chain))]
    pub async fn tick(&mut self) -> Result<CycleOutcome, WatcherError> {
        if self.state.cursor == Cursor::Unresolved {
            if let Err(error) = self.seed().await {
                return Ok(self.failed(CycleFailure::Seed(error)))
            }
        }

        let finalized = match self.adapter.finalized_watermark().await {
            Ok(finalized) => finalized,
            Err(err) if err.is_fatal() => return Err(self.fatal(err)),
            Err(err) => return Ok(self.failed(CycleFailure::Watermark(err))),
        };

        let from = match self.state.cursor {
            Cursor::Next(next) => next,
            _ => finalized,
        };
        if finalized < from {
            debug!(finalized, next = from, "Nothing new");
            self.state.consecutive_failures = 0;
            return Ok(CycleOutcome::NothingNew { finalized })
        }

        let batch = self.adapter.max_batch_size().max(1);
        let to = finalized.min(from.saturating_add(batch - 1));

        let messages = match self.adapter.messages_in_range(from, to).await {
            Ok(messages) => messages,
            Err(err) if err.is_fatal() => return Err(self.fatal(err)),
            Err(error) => return Ok(self.failed(CycleFailure::Messages { from, to, error })),
        };

        let stored = messages.len();
        let merged = bounded(self.store_timeout, self.store.merge(self.chain, messages)).await;
        if let Err(error) = merged {
            return Ok(self.failed(CycleFailure::Store { from, to, error }))
        }

        self.state.cursor = Cursor::Next(to.saturating_add(1));
        self.state.consecutive_failures = 0;
        info!(from, to, finalized, stored, "Explored range");

        Ok(CycleOutcome::Explored { from, to, finalized, stored })
    }

    /// Runs cycles until `cancel` fires or a fatal error occurs.
    ///
    /// The pause between cycles is skipped while finalized watermarks remain unexplored.
    /// Cancellation is observed between cycles only, so a merge in flight completes or times out.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), WatcherError> {
        info!(chain = %self.chain, "Starting watcher");

        while !cancel.is_cancelled() {
            let outcome = self.tick().await?;
            if outcome.is_behind() {
                continue
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.poll_interval) => {}
            }
        }

        info!(chain = %self.chain, state = ?self.state, "Watcher stopped");
        Ok(())
    }
}

/// Bounds a store call by `deadline`, mapping expiry to [`StoreError::Timeout`].
async fn bounded<T, F>(deadline: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    timeout(deadline, fut).await.map_err(|_| StoreError::Timeout(deadline))?
}
