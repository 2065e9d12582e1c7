use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    adapter::{self, ChainAdapter},
    common::WatcherError,
    config::WatcherConfig,
    primitives::Chain,
    store::Store,
    watcher::Watcher,
};

/// Runs one [`Watcher`] task per configured chain against a shared store.
///
/// Watchers never wait on each other. A watcher stopping on a fatal error leaves the others
/// running.
pub struct Orchestrator {
    config: WatcherConfig,
    store: Arc<dyn Store>,
    cancel: CancellationToken,
    tasks: JoinSet<(Chain, Result<(), WatcherError>)>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("chains", &self.config.chains)
            .field("store", &self.store)
            .field("running", &self.tasks.len())
            .finish()
    }
}

impl Orchestrator {
    /// Creates an orchestrator for the chains of `config`, writing to `store`.
    pub fn new(config: WatcherConfig, store: Arc<dyn Store>) -> Self {
        Self { config, store, cancel: CancellationToken::new(), tasks: JoinSet::new() }
    }

    /// Builds an adapter for every configured chain and spawns its watcher. Chains whose adapter
    /// cannot be built are skipped. Returns the chains that were started.
    pub fn spawn(&mut self) -> Vec<Chain> {
        let mut started = Vec::new();
        for chain in self.config.chains.clone() {
            match adapter::build(chain, &self.config) {
                Ok(adapter) => {
                    self.spawn_watcher(adapter);
                    started.push(chain);
                }
                Err(err) => warn!(%chain, error = %err, "Skipping chain"),
            }
        }

        info!(chains = ?started, "Spawned watchers");
        started
    }

    /// Spawns a watcher for `adapter` with a child of the orchestrator's cancellation token.
    pub fn spawn_watcher<A: ChainAdapter + 'static>(&mut self, adapter: A) {
        let watcher = Watcher::new(adapter, self.store.clone())
            .with_poll_interval(self.config.poll_interval)
            .with_store_timeout(self.config.store_timeout);
        let chain = watcher.chain();
        let cancel = self.cancel.child_token();

        self.tasks.spawn(async move { (chain, watcher.run(cancel).await) });
    }

    /// Waits for the next watcher to exit. Returns `None` once no watcher is running.
    pub async fn join_next(&mut self) -> Option<(Chain, Result<(), WatcherError>)> {
        loop {
            match self.tasks.join_next().await? {
                Ok(exit) => return Some(exit),
                Err(err) => error!(error = %err, "Watcher task panicked or was aborted"),
            }
        }
    }

    /// Cancels every watcher and waits for all of them to exit.
    ///
    /// Watchers finish the cycle they are in, so no merge is interrupted.
    pub async fn shutdown(mut self) -> Vec<(Chain, Result<(), WatcherError>)> {
        self.cancel.cancel();

        let mut exits = Vec::new();
        while let Some((chain, result)) = self.join_next().await {
            match &result {
                Ok(()) => info!(%chain, "Watcher exited"),
                Err(err) => error!(%chain, error = %err, "Watcher exited with error"),
            }
            exits.push((chain, result));
        }

        exits
    }
}
