use std::{
    collections::BTreeMap,
    ffi::OsString,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::{debug, info, warn};

use super::{sort_batch, Store, Tables};
use crate::{
    common::{Message, StoreError},
    primitives::{key::MessageKey, Chain},
};

/// On-disk layout of the message file: chain id to encoded key to message.
type MessagesFile = BTreeMap<u16, BTreeMap<MessageKey, Message>>;

/// On-disk layout of the last observed file: chain id to message.
type LastObservedFile = BTreeMap<u16, Message>;

/// A backend keeping both tables in memory and rewriting the matching JSON file after every
/// merge.
///
/// Files are replaced atomically: the new contents are written and synced to a sibling `.tmp`
/// file, which is then renamed over the target.
#[derive(Debug)]
pub struct JsonStore {
    messages_path: PathBuf,
    last_observed_path: PathBuf,
    tables: Mutex<Tables>,
}

impl JsonStore {
    /// Loads the store from the two files, starting empty for each file that does not exist.
    pub async fn open(
        messages_path: PathBuf,
        last_observed_path: PathBuf,
    ) -> Result<Self, StoreError> {
        let messages: MessagesFile = read_or_default(&messages_path).await?;
        let last: LastObservedFile = read_or_default(&last_observed_path).await?;

        let mut tables = Tables::default();
        for (id, table) in messages {
            tables.messages.insert(chain_from_id(id)?, table);
        }
        for (id, message) in last {
            tables.last.insert(chain_from_id(id)?, message);
        }

        info!(
            path = %messages_path.display(),
            chains = tables.messages.len(),
            "Loaded JSON store"
        );

        Ok(Self { messages_path, last_observed_path, tables: Mutex::new(tables) })
    }

    /// Returns every message stored for `chain`, in identity order.
    pub async fn messages(&self, chain: Chain) -> Vec<Message> {
        self.tables.lock().await.chain_messages(chain)
    }
}

#[async_trait]
impl Store for JsonStore {
    async fn last_observed(&self, chain: Chain) -> Result<Option<Message>, StoreError> {
        Ok(self.tables.lock().await.last.get(&chain).cloned())
    }

    async fn merge(&self, chain: Chain, messages: Vec<Message>) -> Result<(), StoreError> {
        let batch = sort_batch(chain, messages)?;
        if batch.is_empty() {
            return Ok(())
        }

        // Held across both writes so concurrent merges never interleave file contents.
        let mut tables = self.tables.lock().await;

        // Swapped in only once the file holds it.
        let mut table = tables.messages.get(&chain).cloned().unwrap_or_default();
        for message in &batch {
            table.insert(message.key(), message.clone());
        }
        let mut on_disk: BTreeMap<u16, _> = tables
            .messages
            .iter()
            .filter(|(other, _)| **other != chain)
            .map(|(other, table)| (other.id(), table))
            .collect();
        on_disk.insert(chain.id(), &table);
        write_atomic(&self.messages_path, &on_disk).await?;
        tables.messages.insert(chain, table);

        let Some(top) = tables.improvement(chain, &batch).cloned() else {
            return Ok(())
        };

        let mut last: BTreeMap<u16, &Message> =
            tables.last.iter().map(|(chain, message)| (chain.id(), message)).collect();
        last.insert(chain.id(), &top);
        write_atomic(&self.last_observed_path, &last).await?;

        debug!(%chain, key = %top.key(), "Advanced last observed");
        tables.last.insert(chain, top);

        Ok(())
    }
}

fn chain_from_id(id: u16) -> Result<Chain, StoreError> {
    Chain::try_from(id).map_err(|e| StoreError::Read(e.to_string()))
}

async fn read_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StoreError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!(path = %path.display(), "Store file not found, starting fresh");
            Ok(T::default())
        }
        Err(err) => Err(err.into()),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

async fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(value)?;
    let tmp = tmp_path(path);

    let mut file = fs::File::create(&tmp).await?;
    file.write_all(&bytes).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp, path).await?;
    Ok(())
}
