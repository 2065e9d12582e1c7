use std::{collections::BTreeSet, sync::Arc, time::Duration};

use alloy::{
    primitives::{Address, LogData},
    providers::{Provider, ProviderBuilder},
    rpc::types::{Filter, Log},
    sol_types::SolEvent,
};
use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use hashbrown::HashMap;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    finality::{
        await_confirmation, fetch_block, FinalityCheck, FinalityPolicy, HttpProvider,
        PEER_CHECK_ATTEMPTS, PEER_CHECK_INTERVAL,
    },
    with_timeout, ChainAdapter,
};
use crate::{
    bindings::{evm_core_bridge, LogMessagePublished},
    common::{AdapterError, Message, Timestamp},
    config::DEFAULT_RPC_TIMEOUT,
    primitives::Chain,
};

/// Concurrent block header requests while resolving log timestamps.
const BLOCK_FETCH_CONCURRENCY: usize = 8;

/// Adapter for EVM chains, reading `LogMessagePublished` logs of the core bridge contract.
#[derive(Clone)]
pub struct EvmAdapter {
    chain: Chain,
    provider: HttpProvider,
    contract: Address,
    policy: FinalityPolicy,
    peer: Option<Arc<dyn FinalityCheck>>,
    timeout: Duration,
}

impl std::fmt::Debug for EvmAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmAdapter")
            .field("chain", &self.chain)
            .field("contract", &self.contract)
            .field("policy", &self.policy)
            .field("peer", &self.peer.is_some())
            .finish()
    }
}

impl EvmAdapter {
    /// Creates an adapter for `chain` using the JSON-RPC endpoint at `rpc_url`.
    pub fn new(chain: Chain, rpc_url: Url, policy: FinalityPolicy) -> Result<Self, AdapterError> {
        let contract = evm_core_bridge(chain).ok_or_else(|| {
            AdapterError::Configuration(format!("{chain} has no EVM core bridge contract"))
        })?;
        let provider = ProviderBuilder::new().on_http(rpc_url);

        Ok(Self { chain, provider, contract, policy, peer: None, timeout: DEFAULT_RPC_TIMEOUT })
    }

    /// Sets the deadline for each JSON-RPC call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the secondary endpoint used by [`FinalityPolicy::PeerConfirmed`].
    pub fn with_finality_check<C: FinalityCheck + 'static>(mut self, check: C) -> Self {
        self.peer = Some(Arc::new(check));
        self
    }

    async fn block_timestamp(&self, number: u64) -> Result<(u64, Timestamp), AdapterError> {
        let block = with_timeout(self.timeout, fetch_block(&self.provider, number.into())).await?;
        Ok((number, block.timestamp))
    }

    fn to_message(
        &self,
        log: &Log,
        timestamps: &HashMap<u64, Timestamp>,
    ) -> Result<Message, AdapterError> {
        let missing = |field: &str| AdapterError::Malformed(format!("log without {field}"));

        let (emitter, sequence) = decode_published(log.data())?;
        let watermark = log.block_number.ok_or_else(|| missing("block number"))?;
        let sub_index = log.log_index.ok_or_else(|| missing("log index"))?;
        let transaction = log.transaction_hash.ok_or_else(|| missing("transaction hash"))?;
        let timestamp = *timestamps.get(&watermark).ok_or_else(|| missing("block timestamp"))?;

        Ok(Message {
            chain: self.chain,
            watermark,
            sub_index,
            timestamp,
            source_transaction_id: transaction.to_string(),
            emitter,
            sequence,
        })
    }
}

/// Decodes a `LogMessagePublished` log into its emitter (32-byte, unprefixed hex) and sequence.
pub fn decode_published(data: &LogData) -> Result<(String, String), AdapterError> {
    let event = LogMessagePublished::decode_log_data(data, true)
        .map_err(|e| AdapterError::Malformed(format!("undecodable bridge log: {e}")))?;

    Ok((hex::encode(event.sender.into_word()), event.sequence.to_string()))
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn finalized_watermark(&self) -> Result<u64, AdapterError> {
        let tag = self.policy.tag();
        let block = with_timeout(self.timeout, fetch_block(&self.provider, tag.into()))
            .await
            .map_err(|e| match e {
                AdapterError::Fetch(reason) => AdapterError::Unavailable(reason),
                other => other,
            })?;

        if let FinalityPolicy::PeerConfirmed(_) = self.policy {
            let peer = self.peer.as_deref().ok_or_else(|| {
                AdapterError::Configuration(format!(
                    "{} requires a secondary finality endpoint",
                    self.chain
                ))
            })?;

            await_confirmation(peer, block.number, PEER_CHECK_INTERVAL, PEER_CHECK_ATTEMPTS)
                .await?;
        }

        let watermark = self.policy.watermark(block.number);
        debug!(chain = %self.chain, ?tag, watermark, "Fetched finalized watermark");

        Ok(watermark)
    }

    async fn messages_in_range(&self, from: u64, to: u64) -> Result<Vec<Message>, AdapterError> {
        if to < from {
            return Ok(Vec::new())
        }

        let filter = Filter::new()
            .address(self.contract)
            .event_signature(LogMessagePublished::SIGNATURE_HASH)
            .from_block(from)
            .to_block(to);

        let logs = with_timeout(self.timeout, async {
            self.provider.get_logs(&filter).await.map_err(|e| {
                AdapterError::Fetch(format!("failed to fetch logs {from}..={to}: {e}"))
            })
        })
        .await?;

        info!(chain = %self.chain, from, to, logs = logs.len(), "Processing logs");

        let blocks: BTreeSet<u64> = logs.iter().filter_map(|log| log.block_number).collect();
        let timestamps: HashMap<u64, Timestamp> = stream::iter(blocks)
            .map(|number| self.block_timestamp(number))
            .buffered(BLOCK_FETCH_CONCURRENCY)
            .try_collect()
            .await?;

        let mut messages = Vec::with_capacity(logs.len());
        for log in &logs {
            match self.to_message(log, &timestamps) {
                Ok(message) => messages.push(message),
                Err(err) => {
                    warn!(
                        chain = %self.chain,
                        tx = ?log.transaction_hash,
                        error = %err,
                        "Skipping log"
                    )
                }
            }
        }

        Ok(messages)
    }
}
