//! Finality policies shared by several adapters.

use std::time::Duration;

use alloy::{
    eips::BlockNumberOrTag,
    primitives::B256,
    providers::{Provider, RootProvider},
    transports::http::Http,
};
use async_trait::async_trait;
use reqwest::Client;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    common::{AdapterError, Timestamp},
    primitives::Chain,
};

/// JSON-RPC provider type used by the EVM adapters.
pub type HttpProvider = RootProvider<Http<Client>>;

/// Interval between secondary finality checks.
pub const PEER_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Secondary finality checks attempted before the watermark is reported unavailable.
pub const PEER_CHECK_ATTEMPTS: u32 = 50;

/// Confirmation depth used on chains without a usable finality tag.
pub const BSC_CONFIRMATIONS: u64 = 15;

/// A named block tag understood by EVM JSON-RPC endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BlockTag {
    Finalized,
    Latest,
}

impl From<BlockTag> for BlockNumberOrTag {
    fn from(tag: BlockTag) -> Self {
        match tag {
            BlockTag::Finalized => BlockNumberOrTag::Finalized,
            BlockTag::Latest => BlockNumberOrTag::Latest,
        }
    }
}

/// How an adapter decides that a watermark is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalityPolicy {
    /// The block behind the tag is final.
    Tag(BlockTag),
    /// The block `confirmations` below the tagged block is final.
    Lagging {
        /// Tag to query.
        tag: BlockTag,
        /// Depth below the tagged block.
        confirmations: u64,
    },
    /// The tagged block is final once a secondary endpoint confirms it.
    PeerConfirmed(BlockTag),
}

impl FinalityPolicy {
    /// Returns the policy used for an EVM chain.
    pub fn for_chain(chain: Chain) -> Self {
        match chain {
            Chain::Ethereum |
            Chain::Karura |
            Chain::Acala |
            Chain::Polygon |
            Chain::Arbitrum |
            Chain::Optimism => FinalityPolicy::Tag(BlockTag::Finalized),
            Chain::Bsc => {
                FinalityPolicy::Lagging { tag: BlockTag::Latest, confirmations: BSC_CONFIRMATIONS }
            }
            Chain::Moonbeam => FinalityPolicy::PeerConfirmed(BlockTag::Latest),
            // instant finality
            _ => FinalityPolicy::Tag(BlockTag::Latest),
        }
    }

    /// Applies the policy's offset to the block number returned for its tag.
    pub fn watermark(&self, tagged: u64) -> u64 {
        match self {
            FinalityPolicy::Lagging { confirmations, .. } => tagged.saturating_sub(*confirmations),
            FinalityPolicy::Tag(_) | FinalityPolicy::PeerConfirmed(_) => tagged,
        }
    }

    /// The tag queried for this policy.
    pub fn tag(&self) -> BlockTag {
        match self {
            FinalityPolicy::Tag(tag) |
            FinalityPolicy::Lagging { tag, .. } |
            FinalityPolicy::PeerConfirmed(tag) => *tag,
        }
    }
}

/// The parts of a block header the adapters care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    /// Block height.
    pub number: u64,
    /// Block hash.
    pub hash: B256,
    /// Block production time.
    pub timestamp: Timestamp,
}

/// Fetches the block at `block` (a number or a named tag).
pub async fn fetch_block(
    provider: &HttpProvider,
    block: BlockNumberOrTag,
) -> Result<BlockRef, AdapterError> {
    let block = provider
        .get_block_by_number(block, false)
        .await
        .map_err(|e| AdapterError::Fetch(format!("failed to fetch block {block}: {e}")))?
        .ok_or_else(|| AdapterError::Fetch(format!("block {block} not found")))?;

    let number = block
        .header
        .number
        .ok_or_else(|| AdapterError::Malformed("block without number".to_string()))?;
    let hash = block
        .header
        .hash
        .ok_or_else(|| AdapterError::Malformed(format!("block {number} without hash")))?;

    Ok(BlockRef { number, hash, timestamp: Timestamp::from_secs(block.header.timestamp) })
}

/// A secondary endpoint that can confirm the finality of a specific block.
#[async_trait]
pub trait FinalityCheck: Send + Sync {
    /// Returns true if the block at `number` is final.
    async fn is_finalized(&self, number: u64) -> Result<bool, AdapterError>;
}

/// Polls `check` every `interval` until it confirms `number`, giving up after `max_attempts`.
///
/// Check errors are logged and count as an unconfirmed attempt.
pub async fn await_confirmation<C: FinalityCheck + ?Sized>(
    check: &C,
    number: u64,
    interval: Duration,
    max_attempts: u32,
) -> Result<(), AdapterError> {
    for attempt in 1..=max_attempts {
        sleep(interval).await;

        match check.is_finalized(number).await {
            Ok(true) => {
                debug!(number, attempt, "Block confirmed final");
                return Ok(())
            }
            Ok(false) => {}
            Err(err) => warn!(number, attempt, error = %err, "Finality check failed"),
        }
    }

    Err(AdapterError::Unavailable(format!(
        "block {number} not confirmed final after {max_attempts} checks"
    )))
}
