use std::{path::PathBuf, time::Duration};

use hashbrown::HashMap;
use url::Url;

use crate::primitives::Chain;

/// Pause between two polling cycles of a caught-up watcher.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Deadline for a single outbound RPC or explorer call.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for a single storage call, including remote requests.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default REST endpoint of the column store.
pub const DEFAULT_BIGTABLE_ENDPOINT: &str = "https://bigtable.googleapis.com/";

/// Default REST endpoint of the document store.
pub const DEFAULT_FIRESTORE_ENDPOINT: &str = "https://firestore.googleapis.com/";

/// Process configuration for the watcher pipeline.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Active storage backend.
    pub backend: BackendConfig,
    /// Primary RPC or explorer endpoint per chain.
    pub endpoints: HashMap<Chain, Url>,
    /// Secondary finality-check endpoint for chains whose finality tag is unreliable.
    pub finality_endpoints: HashMap<Chain, Url>,
    /// Chains to watch.
    pub chains: Vec<Chain>,
    /// Pause between cycles once a watcher has caught up.
    pub poll_interval: Duration,
    /// Deadline for each outbound call.
    pub rpc_timeout: Duration,
    /// Deadline for each store read or merge.
    pub store_timeout: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::Memory,
            endpoints: HashMap::new(),
            finality_endpoints: HashMap::new(),
            chains: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

impl WatcherConfig {
    /// Returns the primary endpoint for `chain`.
    pub fn endpoint(&self, chain: Chain) -> Option<&Url> {
        self.endpoints.get(&chain)
    }

    /// Returns the secondary finality endpoint for `chain`.
    pub fn finality_endpoint(&self, chain: Chain) -> Option<&Url> {
        self.finality_endpoints.get(&chain)
    }
}

/// Storage backend selection.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    /// Process-local tables, lost on exit.
    Memory,
    /// Two JSON documents on the local filesystem.
    Local {
        /// Per-chain message table.
        messages_path: PathBuf,
        /// Per-chain last observed message.
        last_observed_path: PathBuf,
    },
    /// Column store for messages plus a document store for the last observed pointers.
    Remote(RemoteConfig),
}

/// Connection settings for the remote backend pair.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Column store REST endpoint.
    pub bigtable_endpoint: Url,
    /// Document store REST endpoint.
    pub firestore_endpoint: Url,
    /// Cloud project hosting both services.
    pub project: String,
    /// Column store instance.
    pub bigtable_instance: String,
    /// Column store table holding one row per message.
    pub bigtable_table: String,
    /// Document collection holding one pointer document per chain.
    pub latest_collection: String,
    /// OAuth2 bearer token used for both services.
    pub access_token: String,
    /// Deadline for each REST request to either service.
    pub request_timeout: Duration,
}

impl RemoteConfig {
    /// Returns the fully qualified column store table name.
    pub fn table_name(&self) -> String {
        format!(
            "projects/{}/instances/{}/tables/{}",
            self.project, self.bigtable_instance, self.bigtable_table
        )
    }
}

/// Parses a `<chain>=<url>` pair, as accepted by the `--rpc` and `--finality-rpc` flags.
pub fn parse_endpoint(s: &str) -> Result<(Chain, Url), String> {
    let (chain, url) =
        s.split_once('=').ok_or_else(|| format!("expected <chain>=<url>, got {s:?}"))?;
    let chain = chain.parse::<Chain>().map_err(|e| e.to_string())?;
    let url = Url::parse(url.trim()).map_err(|e| format!("invalid URL for {chain}: {e}"))?;

    Ok((chain, url))
}
