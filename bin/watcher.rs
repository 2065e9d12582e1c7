use std::{path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};
use eyre::bail;
use hashbrown::HashMap;
use tracing::{error, info, warn};
use url::Url;

use bridgewatch::{
    config::{parse_endpoint, DEFAULT_BIGTABLE_ENDPOINT, DEFAULT_FIRESTORE_ENDPOINT},
    store, BackendConfig, Chain, Orchestrator, RemoteConfig, WatcherConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Memory,
    Local,
    Remote,
}

#[derive(Debug, Parser)]
struct CliOpts {
    /// Storage backend for messages and last observed pointers.
    #[clap(long, env = "WATCHER_BACKEND", value_enum, default_value = "memory")]
    pub backend: Backend,
    /// Chains to watch. Defaults to every chain with an RPC endpoint.
    #[clap(long, env = "WATCHER_CHAINS", value_delimiter = ',')]
    pub chains: Vec<Chain>,
    /// Primary endpoints as `<chain>=<url>` pairs.
    #[clap(long = "rpc", env = "WATCHER_RPC", value_parser = parse_endpoint, value_delimiter = ',')]
    pub rpc: Vec<(Chain, Url)>,
    /// Secondary finality endpoints as `<chain>=<url>` pairs.
    #[clap(
        long = "finality-rpc",
        env = "WATCHER_FINALITY_RPC",
        value_parser = parse_endpoint,
        value_delimiter = ','
    )]
    pub finality_rpc: Vec<(Chain, Url)>,
    /// Pause between cycles once caught up, in milliseconds.
    #[clap(long, env = "WATCHER_POLL_INTERVAL_MS", default_value = "500")]
    pub poll_interval_ms: u64,
    /// Deadline for each outbound call, in seconds.
    #[clap(long, env = "WATCHER_RPC_TIMEOUT_SECS", default_value = "30")]
    pub rpc_timeout_secs: u64,
    /// Deadline for each store read or merge, in seconds.
    #[clap(long, env = "WATCHER_STORE_TIMEOUT_SECS", default_value = "60")]
    pub store_timeout_secs: u64,

    #[clap(long, env = "JSON_DB_FILE", default_value = "db.json")]
    pub json_db_file: PathBuf,
    #[clap(long, env = "DB_LAST_BLOCK_FILE", default_value = "lastBlockByChain.json")]
    pub last_block_file: PathBuf,

    #[clap(long, env = "GCP_PROJECT", default_value = "")]
    pub project: String,
    #[clap(long, env = "BIGTABLE_INSTANCE_ID", default_value = "")]
    pub bigtable_instance_id: String,
    #[clap(long, env = "BIGTABLE_TABLE_ID", default_value = "")]
    pub bigtable_table_id: String,
    #[clap(long, env = "FIRESTORE_LATEST_COLLECTION", default_value = "")]
    pub firestore_latest_collection: String,
    #[clap(long, env = "GCP_ACCESS_TOKEN", default_value = "", hide_env_values = true)]
    pub access_token: String,
    #[clap(long, env = "BIGTABLE_ENDPOINT", default_value = DEFAULT_BIGTABLE_ENDPOINT)]
    pub bigtable_endpoint: Url,
    #[clap(long, env = "FIRESTORE_ENDPOINT", default_value = DEFAULT_FIRESTORE_ENDPOINT)]
    pub firestore_endpoint: Url,
}

impl CliOpts {
    fn into_config(self) -> eyre::Result<WatcherConfig> {
        let store_timeout = Duration::from_secs(self.store_timeout_secs);
        let backend = match self.backend {
            Backend::Memory => BackendConfig::Memory,
            Backend::Local => BackendConfig::Local {
                messages_path: self.json_db_file,
                last_observed_path: self.last_block_file,
            },
            Backend::Remote => BackendConfig::Remote(RemoteConfig {
                bigtable_endpoint: self.bigtable_endpoint,
                firestore_endpoint: self.firestore_endpoint,
                project: self.project,
                bigtable_instance: self.bigtable_instance_id,
                bigtable_table: self.bigtable_table_id,
                latest_collection: self.firestore_latest_collection,
                access_token: self.access_token,
                request_timeout: store_timeout,
            }),
        };

        let endpoints: HashMap<Chain, Url> = self.rpc.into_iter().collect();
        let finality_endpoints: HashMap<Chain, Url> = self.finality_rpc.into_iter().collect();

        let chains = if self.chains.is_empty() {
            Chain::ALL.into_iter().filter(|chain| endpoints.contains_key(chain)).collect()
        } else {
            self.chains
        };
        if chains.is_empty() {
            bail!("No chains to watch: pass --chains or at least one --rpc endpoint");
        }

        Ok(WatcherConfig {
            backend,
            endpoints,
            finality_endpoints,
            chains,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            rpc_timeout: Duration::from_secs(self.rpc_timeout_secs),
            store_timeout,
        })
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let config = CliOpts::parse().into_config()?;

    let store = store::open(&config.backend).await?;
    let mut orchestrator = Orchestrator::new(config, store);
    if orchestrator.spawn().is_empty() {
        bail!("No watcher could be started");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received interrupt, shutting down");
                break
            }
            exit = orchestrator.join_next() => match exit {
                Some((chain, Ok(()))) => info!(%chain, "Watcher exited"),
                Some((chain, Err(err))) => error!(%chain, error = %err, "Watcher stopped"),
                None => {
                    warn!("Every watcher stopped");
                    break
                }
            }
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}
