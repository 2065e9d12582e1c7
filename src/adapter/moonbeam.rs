use std::time::Duration;

use alloy::providers::{Provider, ProviderBuilder};
use async_trait::async_trait;
use tracing::trace;
use url::Url;

use super::{
    finality::{fetch_block, FinalityCheck, HttpProvider},
    with_timeout,
};
use crate::common::AdapterError;

/// Confirms Moonbeam blocks through the `moon_isBlockFinalized` RPC extension.
#[derive(Clone)]
pub struct MoonbeamFinality {
    provider: HttpProvider,
    timeout: Duration,
}

impl std::fmt::Debug for MoonbeamFinality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MoonbeamFinality").field("timeout", &self.timeout).finish()
    }
}

impl MoonbeamFinality {
    /// Creates a checker against the Moonbeam node at `url`.
    pub fn new(url: Url, timeout: Duration) -> Self {
        Self { provider: ProviderBuilder::new().on_http(url), timeout }
    }
}

#[async_trait]
impl FinalityCheck for MoonbeamFinality {
    async fn is_finalized(&self, number: u64) -> Result<bool, AdapterError> {
        // The hash at a height can change until finality, so it is refetched on every check.
        let block = with_timeout(self.timeout, fetch_block(&self.provider, number.into())).await?;

        let finalized = with_timeout(self.timeout, async {
            self.provider
                .raw_request::<_, bool>("moon_isBlockFinalized".into(), (block.hash,))
                .await
                .map_err(|e| {
                    AdapterError::Fetch(format!("finality check for {number} failed: {e}"))
                })
        })
        .await?;

        trace!(number, hash = %block.hash, finalized, "Checked block finality");
        Ok(finalized)
    }
}
