//! Aptos adapter.
//!
//! Aptos bridge messages are read from the core bridge's event handle, so the watermark of this
//! chain is the event sequence number rather than a block height.

use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::{api_url, get_json, ChainAdapter};
use crate::{
    bindings::APTOS_CORE_BRIDGE,
    common::{AdapterError, Message, Timestamp},
    primitives::Chain,
};

/// Watermarks explored per cycle.
const APTOS_BATCH_SIZE: u64 = 25;

/// Largest page the events endpoint serves.
const EVENTS_PAGE_LIMIT: u64 = 100;

/// Concurrent version lookups while resolving events.
const VERSION_FETCH_CONCURRENCY: usize = 8;

#[derive(Debug, Deserialize)]
struct Event {
    sequence_number: String,
    version: String,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct MessageData {
    sender: String,
    sequence: String,
}

#[derive(Debug, Deserialize)]
struct BlockInfo {
    block_timestamp: String,
}

#[derive(Debug, Deserialize)]
struct TransactionInfo {
    hash: String,
}

/// Reads bridge messages from the Aptos REST API.
#[derive(Debug, Clone)]
pub struct AptosAdapter {
    client: Client,
    base: Url,
    timeout: Duration,
}

impl AptosAdapter {
    /// Creates an adapter for the Aptos fullnode REST API at `base`.
    pub fn new(base: Url, timeout: Duration) -> Self {
        Self { client: Client::new(), base, timeout }
    }

    fn events_url(&self, start: Option<u64>, limit: u64) -> Result<Url, AdapterError> {
        let handle = format!("{APTOS_CORE_BRIDGE}::state::WormholeMessageHandle");
        let path = format!("v1/accounts/{APTOS_CORE_BRIDGE}/events/{handle}/event");
        let mut url = api_url(&self.base, &path)?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(start) = start {
                query.append_pair("start", &start.to_string());
            }
            query.append_pair("limit", &limit.to_string());
        }

        Ok(url)
    }

    async fn events(&self, start: Option<u64>, limit: u64) -> Result<Vec<Event>, AdapterError> {
        get_json(&self.client, self.events_url(start, limit)?, self.timeout).await
    }

    async fn resolve(&self, event: Event) -> Result<Option<Message>, AdapterError> {
        let (watermark, emitter, sequence) = match parse_event(&event) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(version = %event.version, error = %err, "Skipping event");
                return Ok(None)
            }
        };

        let block_url = api_url(&self.base, &format!("v1/blocks/by_version/{}", event.version))?;
        let tx_url = api_url(&self.base, &format!("v1/transactions/by_version/{}", event.version))?;

        let (block, transaction): (BlockInfo, TransactionInfo) = futures::try_join!(
            get_json(&self.client, block_url, self.timeout),
            get_json(&self.client, tx_url, self.timeout),
        )?;

        let Ok(micros) = block.block_timestamp.parse::<u64>() else {
            let err =
                AdapterError::Malformed(format!("bad block timestamp {}", block.block_timestamp));
            warn!(version = %event.version, error = %err, "Skipping event");
            return Ok(None)
        };

        Ok(Some(Message {
            chain: Chain::Aptos,
            watermark,
            sub_index: 0,
            timestamp: Timestamp::from_micros(micros),
            source_transaction_id: transaction.hash,
            emitter,
            sequence,
        }))
    }
}

/// Extracts the event sequence number, the emitter and the message sequence from an event.
fn parse_event(event: &Event) -> Result<(u64, String, String), AdapterError> {
    let watermark = event.sequence_number.parse::<u64>().map_err(|_| {
        AdapterError::Malformed(format!("bad sequence number {}", event.sequence_number))
    })?;

    let data: MessageData = serde_json::from_value(event.data.clone())
        .map_err(|e| AdapterError::Malformed(format!("unexpected event data: {e}")))?;
    let sender = data
        .sender
        .parse::<u128>()
        .map_err(|_| AdapterError::Malformed(format!("bad sender {}", data.sender)))?;
    let sequence = data
        .sequence
        .parse::<u64>()
        .map_err(|_| AdapterError::Malformed(format!("bad sequence {}", data.sequence)))?;

    Ok((watermark, format!("{sender:064x}"), sequence.to_string()))
}

#[async_trait]
impl ChainAdapter for AptosAdapter {
    fn chain(&self) -> Chain {
        Chain::Aptos
    }

    fn max_batch_size(&self) -> u64 {
        APTOS_BATCH_SIZE
    }

    async fn finalized_watermark(&self) -> Result<u64, AdapterError> {
        let events = self.events(None, 1).await.map_err(|e| match e {
            AdapterError::Fetch(reason) => AdapterError::Unavailable(reason),
            other => other,
        })?;

        let latest = events
            .first()
            .ok_or_else(|| AdapterError::Unavailable("no bridge events yet".to_string()))?;

        latest.sequence_number.parse::<u64>().map_err(|_| {
            AdapterError::Unavailable(format!("bad sequence number {}", latest.sequence_number))
        })
    }

    async fn messages_in_range(&self, from: u64, to: u64) -> Result<Vec<Message>, AdapterError> {
        let mut events = Vec::new();
        let mut start = from;
        while start <= to {
            let limit = (to - start + 1).min(EVENTS_PAGE_LIMIT);
            let page = self.events(Some(start), limit).await?;
            let served = page.len() as u64;

            events.extend(page);
            if served < limit {
                break
            }
            start += limit;
        }

        debug!(from, to, events = events.len(), "Fetched bridge events");

        let messages: Vec<Option<Message>> = stream::iter(events)
            .map(|event| self.resolve(event))
            .buffered(VERSION_FETCH_CONCURRENCY)
            .try_collect()
            .await?;

        Ok(messages
            .into_iter()
            .flatten()
            .filter(|message| (from..=to).contains(&message.watermark))
            .collect())
    }
}
