//! The remote backend: a column store for messages and a document store for the last observed
//! pointers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};
use url::Url;

use super::{sort_batch, Store};
use crate::{
    common::{Message, StoreError},
    config::RemoteConfig,
    primitives::Chain,
};

mod bigtable;
pub use bigtable::BigtableTable;

mod firestore;
pub use firestore::FirestorePointers;

/// Compare-and-set attempts on the pointer before a merge gives up with a conflict.
pub const POINTER_CAS_ATTEMPTS: u32 = 5;

/// Bulk message table keyed by the padded message identity.
#[async_trait]
pub trait MessageTable: Send + Sync {
    /// Upserts a batch sorted by identity.
    async fn upsert(&self, messages: &[Message]) -> Result<(), StoreError>;
}

/// Opaque version of a pointer document, used as the compare-and-set precondition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision(pub String);

/// A stored pointer with its current revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerDocument {
    /// The last observed message.
    pub message: Message,
    /// Revision the document was read at.
    pub revision: Revision,
}

/// Small per-chain document store holding the last observed message.
#[async_trait]
pub trait PointerStore: Send + Sync {
    /// Reads the pointer of `chain`.
    async fn read(&self, chain: Chain) -> Result<Option<PointerDocument>, StoreError>;

    /// Writes `message` as the pointer of `chain` if the document is still at `expected`
    /// (`None` meaning the document must not exist). Returns false if the precondition failed.
    async fn compare_and_set(
        &self,
        chain: Chain,
        expected: Option<&Revision>,
        message: &Message,
    ) -> Result<bool, StoreError>;
}

/// Composes a [`MessageTable`] and a [`PointerStore`] into a [`Store`].
#[derive(Debug)]
pub struct RemoteStore<T, P> {
    table: T,
    pointers: P,
}

impl<T, P> RemoteStore<T, P> {
    /// Creates a store writing messages to `table` and pointers to `pointers`.
    pub fn new(table: T, pointers: P) -> Self {
        Self { table, pointers }
    }
}

impl RemoteStore<BigtableTable, FirestorePointers> {
    /// Builds the REST clients for both services.
    pub fn from_config(config: &RemoteConfig) -> Result<Self, StoreError> {
        let required = [
            ("project", &config.project),
            ("column store instance", &config.bigtable_instance),
            ("column store table", &config.bigtable_table),
            ("pointer collection", &config.latest_collection),
            ("access token", &config.access_token),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(StoreError::Configuration(format!("missing remote store {name}")))
        }

        let table = BigtableTable::new(
            service_url(&config.bigtable_endpoint)?,
            config.table_name(),
            config.access_token.clone(),
            config.request_timeout,
        )?;
        let pointers = FirestorePointers::new(
            service_url(&config.firestore_endpoint)?,
            &config.project,
            &config.latest_collection,
            config.access_token.clone(),
            config.request_timeout,
        )?;

        Ok(Self::new(table, pointers))
    }
}

/// Builds a REST client whose requests fail after `timeout`.
fn http_client(timeout: Duration) -> Result<Client, StoreError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| StoreError::Configuration(format!("cannot build HTTP client: {e}")))
}

fn service_url(endpoint: &Url) -> Result<Url, StoreError> {
    if endpoint.cannot_be_a_base() {
        return Err(StoreError::Configuration(format!("invalid service endpoint {endpoint}")))
    }

    let mut endpoint = endpoint.clone();
    if !endpoint.path().ends_with('/') {
        endpoint.set_path(&format!("{}/", endpoint.path()));
    }
    Ok(endpoint)
}

#[async_trait]
impl<T, P> Store for RemoteStore<T, P>
where
    T: MessageTable + std::fmt::Debug,
    P: PointerStore + std::fmt::Debug,
{
    async fn last_observed(&self, chain: Chain) -> Result<Option<Message>, StoreError> {
        Ok(self.pointers.read(chain).await?.map(|document| document.message))
    }

    async fn merge(&self, chain: Chain, messages: Vec<Message>) -> Result<(), StoreError> {
        let batch = sort_batch(chain, messages)?;
        let Some(top) = batch.last() else { return Ok(()) };

        self.table.upsert(&batch).await?;
        debug!(%chain, rows = batch.len(), "Upserted messages");

        for attempt in 1..=POINTER_CAS_ATTEMPTS {
            let current = self.pointers.read(chain).await?;
            if let Some(current) = &current {
                if current.message.key() >= top.key() {
                    return Ok(())
                }
            }

            let expected = current.as_ref().map(|document| &document.revision);
            if self.pointers.compare_and_set(chain, expected, top).await? {
                info!(%chain, key = %top.key(), "Advanced last observed");
                return Ok(())
            }

            warn!(%chain, attempt, "Last observed changed concurrently, retrying");
        }

        Err(StoreError::Conflict(chain))
    }
}
