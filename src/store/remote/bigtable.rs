use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;
use url::Url;

use super::MessageTable;
use crate::common::{Message, StoreError};

/// Column family holding every message column.
const COLUMN_FAMILY: &str = "info";

/// Rows sent per `mutateRows` request.
const MUTATION_CHUNK: usize = 1000;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MutateRowsRequest {
    entries: Vec<Entry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Entry {
    row_key: String,
    mutations: Vec<Mutation>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Mutation {
    set_cell: SetCell,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetCell {
    family_name: &'static str,
    column_qualifier: String,
    /// Always 0 so that a garbage collection policy of one version keeps a single cell.
    timestamp_micros: &'static str,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct MutateRowsResponse {
    #[serde(default)]
    entries: Vec<EntryStatus>,
}

#[derive(Debug, Deserialize)]
struct EntryStatus {
    #[serde(default)]
    index: Value,
    #[serde(default)]
    status: Status,
}

#[derive(Debug, Default, Deserialize)]
struct Status {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

fn set_cell(column: &str, value: &str) -> Mutation {
    Mutation {
        set_cell: SetCell {
            family_name: COLUMN_FAMILY,
            column_qualifier: STANDARD.encode(column),
            timestamp_micros: "0",
            value: STANDARD.encode(value),
        },
    }
}

fn entry(message: &Message) -> Entry {
    Entry {
        row_key: STANDARD.encode(message.key().encode()),
        mutations: vec![
            set_cell("timestamp", &message.timestamp.to_string()),
            set_cell("txHash", &message.source_transaction_id),
            set_cell("emitter", &message.emitter),
            set_cell("sequence", &message.sequence),
        ],
    }
}

/// Message table on the column store's REST API, one row per message keyed by padded identity.
pub struct BigtableTable {
    client: Client,
    url: Url,
    table_name: String,
    access_token: String,
}

impl std::fmt::Debug for BigtableTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BigtableTable").field("table_name", &self.table_name).finish()
    }
}

impl BigtableTable {
    /// Creates a client for `table_name` (`projects/../instances/../tables/..`) at `endpoint`.
    ///
    /// Every request fails once `timeout` has elapsed.
    pub fn new(
        endpoint: Url,
        table_name: String,
        access_token: String,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let url = endpoint.join(&format!("v2/{table_name}:mutateRows")).map_err(|e| {
            StoreError::Configuration(format!("invalid column store table {table_name}: {e}"))
        })?;
        let client = super::http_client(timeout)?;

        Ok(Self { client, url, table_name, access_token })
    }

    async fn mutate(&self, messages: &[Message]) -> Result<(), StoreError> {
        let request = MutateRowsRequest { entries: messages.iter().map(entry).collect() };

        let response = self
            .client
            .post(self.url.clone())
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Write(format!("mutateRows returned {status}: {body}")))
        }

        // Streaming RPCs come back as a JSON array of responses over REST.
        let body: Value = response.json().await?;
        let responses: Vec<MutateRowsResponse> = match body {
            Value::Array(_) => serde_json::from_value(body)?,
            Value::Null => Vec::new(),
            _ => vec![serde_json::from_value(body)?],
        };

        let failed = responses.iter().flat_map(|r| &r.entries).find(|e| e.status.code != 0);
        if let Some(failed) = failed {
            return Err(StoreError::Write(format!(
                "row {} rejected with code {}: {}",
                failed.index, failed.status.code, failed.status.message
            )))
        }

        Ok(())
    }
}

#[async_trait]
impl MessageTable for BigtableTable {
    async fn upsert(&self, messages: &[Message]) -> Result<(), StoreError> {
        for chunk in messages.chunks(MUTATION_CHUNK) {
            self.mutate(chunk).await?;
            trace!(rows = chunk.len(), "Mutated rows");
        }

        Ok(())
    }
}
