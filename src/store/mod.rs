use std::{collections::BTreeMap, fmt::Debug, sync::Arc};

use async_trait::async_trait;
use tracing::info;

use crate::{
    common::{Message, StoreError},
    config::BackendConfig,
    primitives::{key::MessageKey, Chain},
};

mod json;
pub use json::JsonStore;

mod memory;
pub use memory::InMemoryStore;

pub mod remote;
pub use remote::{BigtableTable, FirestorePointers, MessageTable, PointerStore, RemoteStore};

/// Durable record of observed messages and of the last observed message per chain.
///
/// Implementations are shared by every watcher and must tolerate concurrent calls. The last
/// observed pointer of a chain only ever moves forward.
#[async_trait]
pub trait Store: Send + Sync + Debug {
    /// Returns the highest message merged for `chain`, if any.
    async fn last_observed(&self, chain: Chain) -> Result<Option<Message>, StoreError>;

    /// Upserts `messages` by identity, then advances the last observed pointer of `chain` to the
    /// highest of them if it is greater than the current one. An empty batch is a no-op.
    async fn merge(&self, chain: Chain, messages: Vec<Message>) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    async fn last_observed(&self, chain: Chain) -> Result<Option<Message>, StoreError> {
        (**self).last_observed(chain).await
    }

    async fn merge(&self, chain: Chain, messages: Vec<Message>) -> Result<(), StoreError> {
        (**self).merge(chain, messages).await
    }
}

/// Opens the backend selected by `config`.
pub async fn open(config: &BackendConfig) -> Result<Arc<dyn Store>, StoreError> {
    let store: Arc<dyn Store> = match config {
        BackendConfig::Memory => Arc::new(InMemoryStore::default()),
        BackendConfig::Local { messages_path, last_observed_path } => {
            Arc::new(JsonStore::open(messages_path.clone(), last_observed_path.clone()).await?)
        }
        BackendConfig::Remote(remote) => Arc::new(RemoteStore::from_config(remote)?),
    };

    info!(?store, "Opened store");
    Ok(store)
}

/// Sorts a batch by identity, dropping repeated identities (the last one wins).
///
/// Fails if any message belongs to a chain other than `chain`.
pub(crate) fn sort_batch(chain: Chain, messages: Vec<Message>) -> Result<Vec<Message>, StoreError> {
    if let Some(foreign) = messages.iter().find(|message| message.chain != chain) {
        return Err(StoreError::Write(format!(
            "message {} does not belong to {chain}",
            foreign.key()
        )))
    }

    let sorted: BTreeMap<MessageKey, Message> =
        messages.into_iter().map(|message| (message.key(), message)).collect();
    Ok(sorted.into_values().collect())
}

/// Message and pointer tables held in memory by the local backends.
#[derive(Debug, Default, Clone)]
pub(crate) struct Tables {
    pub(crate) messages: BTreeMap<Chain, BTreeMap<MessageKey, Message>>,
    pub(crate) last: BTreeMap<Chain, Message>,
}

impl Tables {
    /// Inserts a sorted batch, replacing messages with the same identity.
    pub(crate) fn upsert(&mut self, chain: Chain, batch: &[Message]) {
        let table = self.messages.entry(chain).or_default();
        for message in batch {
            table.insert(message.key(), message.clone());
        }
    }

    /// Returns the top of `batch` if it would advance the pointer of `chain`.
    pub(crate) fn improvement<'a>(
        &self,
        chain: Chain,
        batch: &'a [Message],
    ) -> Option<&'a Message> {
        let top = batch.last()?;
        match self.last.get(&chain) {
            Some(current) if current.key() >= top.key() => None,
            _ => Some(top),
        }
    }

    pub(crate) fn chain_messages(&self, chain: Chain) -> Vec<Message> {
        self.messages.get(&chain).map(|table| table.values().cloned().collect()).unwrap_or_default()
    }
}
