use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::{api_url, get_json, ChainAdapter};
use crate::{
    bindings::INJECTIVE_CORE_BRIDGE,
    common::{AdapterError, Message, Timestamp},
    primitives::Chain,
};

/// Blocks explored per cycle. Every transaction costs one explorer request.
const INJECTIVE_BATCH_SIZE: u64 = 10;

#[derive(Debug, Deserialize)]
struct Paging {
    total: u64,
}

#[derive(Debug, Deserialize)]
struct BlocksPage {
    paging: Paging,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct BlockDetails {
    #[serde(default)]
    txs: Option<Vec<TxSummary>>,
}

#[derive(Debug, Deserialize)]
struct TxSummary {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct TxDetails {
    #[serde(default)]
    block_unix_timestamp: Option<u64>,
    #[serde(default)]
    logs: Option<Vec<TxLog>>,
}

#[derive(Debug, Deserialize)]
struct TxLog {
    #[serde(default)]
    events: Option<Vec<TxEvent>>,
}

#[derive(Debug, Deserialize)]
struct TxEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    attributes: Option<Vec<Attribute>>,
}

#[derive(Debug, Deserialize)]
struct Attribute {
    key: String,
    #[serde(default)]
    value: String,
}

/// A transaction with a usable block timestamp.
struct DecodedTx {
    timestamp: u64,
    logs: Option<Vec<TxLog>>,
}

fn decode_tx(data: serde_json::Value) -> Result<DecodedTx, AdapterError> {
    let details: TxDetails = serde_json::from_value(data)
        .map_err(|e| AdapterError::Malformed(format!("unexpected transaction body: {e}")))?;
    let timestamp = details
        .block_unix_timestamp
        .ok_or_else(|| AdapterError::Malformed("missing block timestamp".to_string()))?;

    Ok(DecodedTx { timestamp, logs: details.logs })
}

/// Returns the `(emitter, sequence)` of a core bridge `wasm` event.
///
/// Events from other contracts can carry the same attribute keys and are ignored.
fn bridge_message(event: &TxEvent) -> Option<(String, String)> {
    if event.kind != "wasm" {
        return None
    }

    let mut emitter = None;
    let mut sequence = None;
    let mut from_core_bridge = false;
    for attribute in event.attributes.iter().flatten() {
        match attribute.key.as_str() {
            "message.sender" => emitter = Some(attribute.value.clone()),
            "message.sequence" => sequence = Some(attribute.value.clone()),
            "_contract_address" | "contract_address" => {
                from_core_bridge |= attribute.value == INJECTIVE_CORE_BRIDGE
            }
            _ => {}
        }
    }

    match (from_core_bridge, emitter, sequence) {
        (true, Some(emitter), Some(sequence)) if !emitter.is_empty() && !sequence.is_empty() => {
            Some((emitter, sequence))
        }
        _ => None,
    }
}

/// Reads bridge messages from the Injective explorer API, one transaction at a time.
#[derive(Debug, Clone)]
pub struct InjectiveAdapter {
    client: Client,
    base: Url,
    timeout: Duration,
}

impl InjectiveAdapter {
    /// Creates an adapter for the explorer API at `base`.
    pub fn new(base: Url, timeout: Duration) -> Self {
        Self { client: Client::new(), base, timeout }
    }

    async fn block_messages(&self, number: u64) -> Result<Vec<Message>, AdapterError> {
        let url = api_url(&self.base, &format!("api/explorer/v1/blocks/{number}"))?;
        let block: Envelope<BlockDetails> = get_json(&self.client, url, self.timeout).await?;

        let mut messages = Vec::new();
        for tx in block.data.txs.unwrap_or_default() {
            let url = api_url(&self.base, &format!("api/explorer/v1/txs/{}", tx.hash))?;
            // Decoded in two steps so that one malformed transaction is skipped, not retried.
            let body: Envelope<serde_json::Value> =
                get_json(&self.client, url, self.timeout).await?;
            let details = match decode_tx(body.data) {
                Ok(details) => details,
                Err(err) => {
                    warn!(number, tx = %tx.hash, error = %err, "Skipping transaction");
                    continue
                }
            };

            let Some(logs) = details.logs else {
                trace!(number, tx = %tx.hash, "Transaction without logs");
                continue
            };

            let events = logs.iter().flat_map(|log| log.events.iter().flatten());
            for (emitter, sequence) in events.filter_map(bridge_message) {
                messages.push(Message {
                    chain: Chain::Injective,
                    watermark: number,
                    sub_index: messages.len() as u64,
                    timestamp: Timestamp::from_millis(details.timestamp),
                    source_transaction_id: tx.hash.clone(),
                    emitter,
                    sequence,
                });
            }
        }

        Ok(messages)
    }
}

#[async_trait]
impl ChainAdapter for InjectiveAdapter {
    fn chain(&self) -> Chain {
        Chain::Injective
    }

    fn max_batch_size(&self) -> u64 {
        INJECTIVE_BATCH_SIZE
    }

    async fn finalized_watermark(&self) -> Result<u64, AdapterError> {
        let url = api_url(&self.base, "api/explorer/v1/blocks")?;
        let page: BlocksPage = get_json(&self.client, url, self.timeout).await.map_err(|e| {
            warn!(error = %e, "Failed to fetch latest blocks");
            AdapterError::Unavailable(e.to_string())
        })?;

        if page.paging.total == 0 {
            return Err(AdapterError::Unavailable("explorer reported no blocks".to_string()))
        }

        Ok(page.paging.total)
    }

    async fn messages_in_range(&self, from: u64, to: u64) -> Result<Vec<Message>, AdapterError> {
        info!(from, to, "Fetching explorer blocks");

        let mut messages = Vec::new();
        for number in from..=to {
            let found = self.block_messages(number).await?;
            if !found.is_empty() {
                debug!(number, messages = found.len(), "Found bridge messages");
            }
            messages.extend(found);
        }

        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use wiremock::{matchers::method, Mock, MockServer, Request, ResponseTemplate};

    use super::*;

    fn wasm_event(contract: &str, sender: &str, sequence: &str) -> Value {
        json!({
            "type": "wasm",
            "attributes": [
                { "key": "_contract_address", "value": contract },
                { "key": "action", "value": "publish_message" },
                { "key": "message.sender", "value": sender },
                { "key": "message.sequence", "value": sequence },
            ],
        })
    }

    fn explorer(request: &Request) -> ResponseTemplate {
        let path = request.url.path();
        let body = if path.ends_with("/api/explorer/v1/blocks") {
            json!({
                "paging": { "total": 20_908_590, "from": 20_908_581, "to": 20_908_590 },
                "data": [],
            })
        } else if let Some(number) = path.strip_prefix("/api/explorer/v1/blocks/") {
            let txs = match number {
                "100" => json!([{ "hash": "0xaa" }, { "hash": "0xbb" }]),
                "101" => Value::Null,
                "103" => json!([{ "hash": "0xaa" }, { "hash": "0xdd" }, { "hash": "0xee" }]),
                _ => json!([{ "hash": "0xcc" }]),
            };
            json!({ "s": "ok", "data": { "height": number, "txs": txs } })
        } else if let Some(hash) = path.strip_prefix("/api/explorer/v1/txs/") {
            let logs = match hash {
                "0xaa" => json!([{ "events": [
                    {
                        "type": "message",
                        "attributes": [{ "key": "message.sender", "value": "x" }],
                    },
                    wasm_event(INJECTIVE_CORE_BRIDGE, "00aa", "1"),
                    // Same attributes from another contract.
                    wasm_event("inj1qqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqq", "00ff", "9"),
                ]}]),
                "0xbb" => json!([
                    { "events": [wasm_event(INJECTIVE_CORE_BRIDGE, "00aa", "2")] },
                    { "events": [wasm_event(INJECTIVE_CORE_BRIDGE, "00bb", "")] },
                ]),
                _ => Value::Null,
            };
            let timestamp = match hash {
                "0xdd" => Value::Null,
                _ => json!(1_670_278_191_851u64),
            };
            if hash == "0xee" {
                return ResponseTemplate::new(200).set_body_json(json!({ "s": "ok", "data": [] }))
            }
            json!({
                "s": "ok",
                "data": { "hash": hash, "block_unix_timestamp": timestamp, "logs": logs },
            })
        } else {
            return ResponseTemplate::new(404)
        };

        ResponseTemplate::new(200).set_body_json(body)
    }

    async fn adapter() -> (MockServer, InjectiveAdapter) {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(explorer).mount(&server).await;
        let adapter =
            InjectiveAdapter::new(Url::parse(&server.uri()).unwrap(), Duration::from_secs(5));
        (server, adapter)
    }

    #[tokio::test]
    async fn test_finalized_watermark_is_block_count() {
        let (_server, adapter) = adapter().await;
        assert_eq!(adapter.finalized_watermark().await.unwrap(), 20_908_590);
    }

    #[tokio::test]
    async fn test_messages_in_range() {
        let (_server, adapter) = adapter().await;

        let messages = adapter.messages_in_range(100, 102).await.unwrap();

        let found: Vec<_> = messages
            .iter()
            .map(|m| (m.watermark, m.sub_index, m.emitter.as_str(), m.sequence.as_str()))
            .collect();
        assert_eq!(found, vec![(100, 0, "00aa", "1"), (100, 1, "00aa", "2")]);
        assert_eq!(messages[1].source_transaction_id, "0xbb");
        assert_eq!(messages[0].timestamp, Timestamp::from_millis(1_670_278_191_851));
    }

    #[tokio::test]
    async fn test_malformed_transaction_is_skipped() {
        let (_server, adapter) = adapter().await;

        // 0xdd has no block timestamp and 0xee is not a transaction object.
        for _ in 0..3 {
            let messages = adapter.messages_in_range(103, 103).await.unwrap();
            let found: Vec<_> = messages
                .iter()
                .map(|m| (m.watermark, m.sub_index, m.emitter.as_str(), m.sequence.as_str()))
                .collect();
            assert_eq!(found, vec![(103, 0, "00aa", "1")]);
        }
    }

    #[test]
    fn test_bridge_message_requires_core_contract() {
        let event: TxEvent =
            serde_json::from_value(wasm_event("inj1other", "00aa", "1")).unwrap();
        assert_eq!(bridge_message(&event), None);

        let event: TxEvent =
            serde_json::from_value(wasm_event(INJECTIVE_CORE_BRIDGE, "00aa", "1")).unwrap();
        assert_eq!(bridge_message(&event), Some(("00aa".to_string(), "1".to_string())));
    }

    #[tokio::test]
    async fn test_missing_block_fails_the_range() {
        let server = MockServer::start().await;
        let adapter =
            InjectiveAdapter::new(Url::parse(&server.uri()).unwrap(), Duration::from_secs(5));

        // Nothing is mounted, so every request is a 404.
        assert!(adapter.messages_in_range(1, 1).await.is_err());
        assert!(adapter.finalized_watermark().await.is_err());
    }
}
