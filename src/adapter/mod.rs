use std::{future::Future, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use url::Url;

use crate::{
    common::{AdapterError, Message},
    config::WatcherConfig,
    primitives::Chain,
};

pub mod aptos;
/// EVM chains.
pub mod evm;
pub mod finality;
/// Injective, through its explorer API.
pub mod injective;
/// Moonbeam finality confirmation.
pub mod moonbeam;

#[cfg(test)]
pub(crate) mod rpc_mock;

pub use aptos::AptosAdapter;
pub use evm::EvmAdapter;
pub use finality::{BlockTag, FinalityCheck, FinalityPolicy};
pub use injective::InjectiveAdapter;
pub use moonbeam::MoonbeamFinality;

/// Range size explored per cycle when an adapter does not override it.
pub const DEFAULT_BATCH_SIZE: u64 = 100;

/// Chain-specific access to finalized watermarks and the bridge messages they contain.
///
/// Adapters report failures instead of retrying them: the watcher decides what to retry.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// The chain this adapter reads from.
    fn chain(&self) -> Chain;

    /// Largest number of watermarks explored in one cycle.
    fn max_batch_size(&self) -> u64 {
        DEFAULT_BATCH_SIZE
    }

    /// Watermark to start from when nothing has been stored for the chain yet.
    fn initial_watermark(&self) -> Option<u64> {
        self.chain().initial_watermark()
    }

    /// Returns the highest watermark currently considered final.
    async fn finalized_watermark(&self) -> Result<u64, AdapterError>;

    /// Returns the messages in the inclusive range `[from, to]`. `to < from` is an empty range.
    async fn messages_in_range(&self, from: u64, to: u64) -> Result<Vec<Message>, AdapterError>;
}

#[async_trait]
impl<A: ChainAdapter + ?Sized> ChainAdapter for Box<A> {
    fn chain(&self) -> Chain {
        (**self).chain()
    }

    fn max_batch_size(&self) -> u64 {
        (**self).max_batch_size()
    }

    fn initial_watermark(&self) -> Option<u64> {
        (**self).initial_watermark()
    }

    async fn finalized_watermark(&self) -> Result<u64, AdapterError> {
        (**self).finalized_watermark().await
    }

    async fn messages_in_range(&self, from: u64, to: u64) -> Result<Vec<Message>, AdapterError> {
        (**self).messages_in_range(from, to).await
    }
}

/// Builds the adapter for `chain` from the configured endpoints.
pub fn build(chain: Chain, config: &WatcherConfig) -> Result<Box<dyn ChainAdapter>, AdapterError> {
    let endpoint = config
        .endpoint(chain)
        .cloned()
        .ok_or_else(|| AdapterError::Configuration(format!("no endpoint configured for {chain}")))?;
    let timeout = config.rpc_timeout;

    let adapter: Box<dyn ChainAdapter> = match chain {
        Chain::Aptos => Box::new(AptosAdapter::new(endpoint, timeout)),
        Chain::Injective => Box::new(InjectiveAdapter::new(endpoint, timeout)),
        Chain::Solana => {
            return Err(AdapterError::Configuration(format!("no adapter available for {chain}")))
        }
        Chain::Moonbeam => {
            let mut adapter = EvmAdapter::new(chain, endpoint, FinalityPolicy::for_chain(chain))?
                .with_timeout(timeout);
            // A missing secondary endpoint surfaces on the first watermark fetch.
            if let Some(finality_endpoint) = config.finality_endpoint(chain) {
                adapter = adapter
                    .with_finality_check(MoonbeamFinality::new(finality_endpoint.clone(), timeout));
            }
            Box::new(adapter)
        }
        _ => Box::new(
            EvmAdapter::new(chain, endpoint, FinalityPolicy::for_chain(chain))?
                .with_timeout(timeout),
        ),
    };

    Ok(adapter)
}

/// Bounds `fut` by `timeout`, mapping expiry to [`AdapterError::Timeout`].
pub(crate) async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, AdapterError>
where
    F: Future<Output = Result<T, AdapterError>>,
{
    tokio::time::timeout(timeout, fut).await.map_err(|_| AdapterError::Timeout(timeout))?
}

/// Resolves `path` against an API base URL, treating the base as a directory.
pub(crate) fn api_url(base: &Url, path: &str) -> Result<Url, AdapterError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        base.set_path(&format!("{}/", base.path()));
    }

    base.join(path)
        .map_err(|e| AdapterError::Configuration(format!("invalid API path {path}: {e}")))
}

/// Issues a GET request and decodes the JSON body, bounded by `timeout`.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &Client,
    url: Url,
    timeout: Duration,
) -> Result<T, AdapterError> {
    with_timeout(timeout, async {
        let response = client.get(url).send().await?.error_for_status()?;
        Ok(response.json::<T>().await?)
    })
    .await
}
