//! JSON-RPC responders for adapter tests.

use serde_json::{json, Value};
use wiremock::{Request, Respond, ResponseTemplate};

/// Answers every JSON-RPC call with `handler(method, params)`, echoing the request ID.
pub struct JsonRpc<F>(pub F);

impl<F> Respond for JsonRpc<F>
where
    F: Fn(&str, &Value) -> Value + Send + Sync,
{
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).expect("JSON-RPC request");
        let method = body["method"].as_str().unwrap_or_default();
        let result = (self.0)(method, &body["params"]);

        ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": body["id"],
            "result": result,
        }))
    }
}

/// A minimal but complete block header as returned by `eth_getBlockByNumber`.
pub fn block_json(number: u64, timestamp: u64) -> Value {
    let zero = format!("0x{}", "00".repeat(32));

    json!({
        "hash": block_hash(number),
        "parentHash": zero,
        "sha3Uncles": zero,
        "miner": format!("0x{}", "00".repeat(20)),
        "stateRoot": zero,
        "transactionsRoot": zero,
        "receiptsRoot": zero,
        "logsBloom": format!("0x{}", "00".repeat(256)),
        "difficulty": "0x0",
        "number": format!("{number:#x}"),
        "gasLimit": "0x1c9c380",
        "gasUsed": "0x0",
        "timestamp": format!("{timestamp:#x}"),
        "extraData": "0x",
        "mixHash": zero,
        "nonce": "0x0000000000000000",
        "baseFeePerGas": "0x7",
        "totalDifficulty": "0x0",
        "size": "0x220",
        "uncles": [],
        "transactions": [],
    })
}

/// The hash `block_json` reports for `number`.
pub fn block_hash(number: u64) -> String {
    format!("0x{number:064x}")
}

/// Parses a hex quantity or returns `None` for named tags.
pub fn quantity(value: &Value) -> Option<u64> {
    value.as_str()?.strip_prefix("0x").and_then(|hex| u64::from_str_radix(hex, 16).ok())
}
