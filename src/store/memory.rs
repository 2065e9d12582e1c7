use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{sort_batch, Store, Tables};
use crate::{
    common::{Message, StoreError},
    primitives::Chain,
};

/// A process-local backend. Contents are lost on exit.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every message stored for `chain`, in identity order.
    pub async fn messages(&self, chain: Chain) -> Vec<Message> {
        self.tables.read().await.chain_messages(chain)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn last_observed(&self, chain: Chain) -> Result<Option<Message>, StoreError> {
        Ok(self.tables.read().await.last.get(&chain).cloned())
    }

    async fn merge(&self, chain: Chain, messages: Vec<Message>) -> Result<(), StoreError> {
        let batch = sort_batch(chain, messages)?;
        if batch.is_empty() {
            return Ok(())
        }

        let mut tables = self.tables.write().await;
        tables.upsert(chain, &batch);
        if let Some(top) = tables.improvement(chain, &batch).cloned() {
            debug!(%chain, key = %top.key(), "Advancing last observed");
            tables.last.insert(chain, top);
        }

        Ok(())
    }
}
