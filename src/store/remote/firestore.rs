use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use url::Url;

use super::{PointerDocument, PointerStore, Revision};
use crate::{
    common::{Message, StoreError},
    primitives::Chain,
};

/// Document field holding the JSON-encoded last observed message.
const POINTER_FIELD: &str = "lastBlockKey";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StringValue {
    string_value: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Fields {
    #[serde(rename = "lastBlockKey")]
    last_block_key: Option<StringValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    fields: Option<Fields>,
    update_time: String,
}

#[derive(Debug, Serialize)]
struct DocumentWrite {
    fields: Fields,
}

/// Last observed pointers stored as one document per chain id in a document store collection.
pub struct FirestorePointers {
    client: Client,
    collection: Url,
    access_token: String,
}

impl std::fmt::Debug for FirestorePointers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirestorePointers").field("collection", &self.collection.path()).finish()
    }
}

impl FirestorePointers {
    /// Creates a client for `collection` in the default database of `project`.
    pub fn new(
        endpoint: Url,
        project: &str,
        collection: &str,
        access_token: String,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let path = format!("v1/projects/{project}/databases/(default)/documents/{collection}/");
        let collection = endpoint.join(&path).map_err(|e| {
            StoreError::Configuration(format!("invalid document collection {collection}: {e}"))
        })?;
        let client = super::http_client(timeout)?;

        Ok(Self { client, collection, access_token })
    }

    fn document_url(&self, chain: Chain) -> Result<Url, StoreError> {
        self.collection
            .join(&chain.id().to_string())
            .map_err(|e| StoreError::Configuration(format!("invalid document URL: {e}")))
    }
}

#[async_trait]
impl PointerStore for FirestorePointers {
    async fn read(&self, chain: Chain) -> Result<Option<PointerDocument>, StoreError> {
        let response = self
            .client
            .get(self.document_url(chain)?)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => {
                let reason = format!("reading pointer of {chain} returned {status}");
                return Err(StoreError::Read(reason))
            }
            _ => {}
        }

        let document: Document = response.json().await?;
        let value = document.fields.and_then(|fields| fields.last_block_key).ok_or_else(|| {
            StoreError::Read(format!("pointer document of {chain} has no {POINTER_FIELD}"))
        })?;
        let message: Message = serde_json::from_str(&value.string_value)?;

        trace!(%chain, key = %message.key(), "Read last observed");
        Ok(Some(PointerDocument { message, revision: Revision(document.update_time) }))
    }

    async fn compare_and_set(
        &self,
        chain: Chain,
        expected: Option<&Revision>,
        message: &Message,
    ) -> Result<bool, StoreError> {
        let mut url = self.document_url(chain)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("updateMask.fieldPaths", POINTER_FIELD);
            match expected {
                Some(revision) => query.append_pair("currentDocument.updateTime", &revision.0),
                None => query.append_pair("currentDocument.exists", "false"),
            };
        }

        let body = DocumentWrite {
            fields: Fields {
                last_block_key: Some(StringValue { string_value: serde_json::to_string(message)? }),
            },
        };

        let response =
            self.client.patch(url).bearer_auth(&self.access_token).json(&body).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(true)
        }

        let reason = response.text().await.unwrap_or_default();
        let precondition_failed = matches!(
            status,
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED | StatusCode::NOT_FOUND
        ) || (status == StatusCode::BAD_REQUEST && reason.contains("FAILED_PRECONDITION"));

        if precondition_failed {
            debug!(%chain, %status, "Pointer precondition failed");
            return Ok(false)
        }

        Err(StoreError::Write(format!("writing pointer of {chain} returned {status}: {reason}")))
    }
}
