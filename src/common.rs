use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::primitives::{key::MessageKey, Chain};

/// A bridge message observed on a chain once its watermark was final.
///
/// Messages are immutable once extracted and identified by [`Message::key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// The chain the message was emitted on.
    pub chain: Chain,
    /// Chain-native position: block height, ledger version or event sequence number.
    pub watermark: u64,
    /// Position within the watermark unit, 0 when not applicable.
    pub sub_index: u64,
    /// When the watermark unit was produced, as reported by the chain.
    pub timestamp: Timestamp,
    /// Chain-native transaction identifier.
    pub source_transaction_id: String,
    /// Protocol-level sender identifier.
    pub emitter: String,
    /// Protocol-assigned per-emitter sequence, as a decimal string.
    pub sequence: String,
}

impl Message {
    /// Returns the sortable identity of the message.
    pub fn key(&self) -> MessageKey {
        MessageKey::new(self.chain, self.watermark, self.sub_index)
    }
}

/// A type representing a UNIX millisecond timestamp
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp from UNIX seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Timestamp(secs.saturating_mul(1000))
    }

    /// Creates a timestamp from UNIX milliseconds.
    pub const fn from_millis(millis: u64) -> Self {
        Timestamp(millis)
    }

    /// Creates a timestamp from UNIX microseconds, truncating to milliseconds.
    pub const fn from_micros(micros: u64) -> Self {
        Timestamp(micros / 1000)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An error returned by a chain adapter.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum AdapterError {
    /// The finalized watermark could not be determined.
    #[error("Finalized watermark unavailable: {0}")]
    Unavailable(String),
    /// Fetching messages for a range failed.
    #[error("Fetch error: {0}")]
    Fetch(String),
    /// An outbound call did not answer within its deadline.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    /// A required endpoint or credential is missing. Not retryable.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// A fetched event could not be turned into a message.
    #[error("Malformed data: {0}")]
    Malformed(String),
}

impl AdapterError {
    /// Returns true if retrying cannot succeed without operator intervention.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AdapterError::Configuration(_))
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        AdapterError::Fetch(err.to_string())
    }
}

/// An error returned by a storage backend.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum StoreError {
    #[error("Read error: {0}")]
    Read(String),
    #[error("Write error: {0}")]
    Write(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The backend did not answer within the store deadline.
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),
    /// The last observed pointer kept changing under a compare-and-set.
    #[error("Last observed pointer for {0} kept conflicting")]
    Conflict(Chain),
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// An error that stops a chain's watcher.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum WatcherError {
    #[error("Configuration error for {chain}: {reason}")]
    Configuration { chain: Chain, reason: String },
}
