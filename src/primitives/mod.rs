use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod key;

/// A chain observed by the watcher, identified by its bridge protocol chain ID.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum Chain {
    Solana,
    Ethereum,
    Bsc,
    Polygon,
    Avalanche,
    Oasis,
    Fantom,
    Karura,
    Acala,
    Klaytn,
    Celo,
    Moonbeam,
    Injective,
    Aptos,
    Arbitrum,
    Optimism,
}

/// An error returned when a chain name or ID is not recognized.
#[derive(Debug, Error)]
#[error("Unknown chain: {0}")]
pub struct UnknownChain(pub String);

impl Chain {
    /// Every chain the crate knows how to identify.
    pub const ALL: [Chain; 16] = [
        Chain::Solana,
        Chain::Ethereum,
        Chain::Bsc,
        Chain::Polygon,
        Chain::Avalanche,
        Chain::Oasis,
        Chain::Fantom,
        Chain::Karura,
        Chain::Acala,
        Chain::Klaytn,
        Chain::Celo,
        Chain::Moonbeam,
        Chain::Injective,
        Chain::Aptos,
        Chain::Arbitrum,
        Chain::Optimism,
    ];

    /// Returns the bridge protocol chain ID.
    pub const fn id(&self) -> u16 {
        match self {
            Chain::Solana => 1,
            Chain::Ethereum => 2,
            Chain::Bsc => 4,
            Chain::Polygon => 5,
            Chain::Avalanche => 6,
            Chain::Oasis => 7,
            Chain::Fantom => 10,
            Chain::Karura => 11,
            Chain::Acala => 12,
            Chain::Klaytn => 13,
            Chain::Celo => 14,
            Chain::Moonbeam => 16,
            Chain::Injective => 19,
            Chain::Aptos => 22,
            Chain::Arbitrum => 23,
            Chain::Optimism => 24,
        }
    }

    /// Returns the lowercase chain name.
    pub const fn name(&self) -> &'static str {
        match self {
            Chain::Solana => "solana",
            Chain::Ethereum => "ethereum",
            Chain::Bsc => "bsc",
            Chain::Polygon => "polygon",
            Chain::Avalanche => "avalanche",
            Chain::Oasis => "oasis",
            Chain::Fantom => "fantom",
            Chain::Karura => "karura",
            Chain::Acala => "acala",
            Chain::Klaytn => "klaytn",
            Chain::Celo => "celo",
            Chain::Moonbeam => "moonbeam",
            Chain::Injective => "injective",
            Chain::Aptos => "aptos",
            Chain::Arbitrum => "arbitrum",
            Chain::Optimism => "optimism",
        }
    }

    /// The watermark at which the bridge contract was deployed on this chain, if known.
    /// Watchers without any stored state start exploring from here.
    ///
    /// For Aptos this is an event sequence number, not a block height.
    pub const fn initial_watermark(&self) -> Option<u64> {
        match self {
            Chain::Solana => Some(94_401_321),
            Chain::Ethereum => Some(12_959_638),
            Chain::Bsc => Some(9_745_450),
            Chain::Polygon => Some(20_629_146),
            Chain::Avalanche => Some(8_237_181),
            Chain::Oasis => Some(1_757),
            Chain::Fantom => Some(31_817_467),
            Chain::Karura => Some(1_824_665),
            Chain::Acala => Some(1_144_161),
            Chain::Klaytn => Some(90_563_824),
            Chain::Celo => Some(12_947_144),
            Chain::Moonbeam => Some(1_486_591),
            Chain::Injective => Some(20_908_376),
            Chain::Aptos => Some(0),
            Chain::Arbitrum => Some(18_128_584),
            Chain::Optimism => None,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Chain {
    type Err = UnknownChain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Chain::ALL
            .into_iter()
            .find(|chain| chain.name() == lower)
            .ok_or_else(|| UnknownChain(s.to_string()))
    }
}

impl TryFrom<u16> for Chain {
    type Error = UnknownChain;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        Chain::ALL.into_iter().find(|chain| chain.id() == id).ok_or(UnknownChain(id.to_string()))
    }
}

impl From<Chain> for u16 {
    fn from(chain: Chain) -> Self {
        chain.id()
    }
}
