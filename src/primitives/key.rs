//! Sortable message identities.
//!
//! A message is identified by `(chain, watermark, sub_index)`. The encoded form pads every
//! component to a fixed width so that byte-wise ordering of encoded keys equals numeric ordering
//! of the triple, which lets lexicographic stores range-scan messages natively.

use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use super::Chain;

/// Separator between key components. Never produced by a decimal digit.
pub const KEY_SEPARATOR: char = '/';

const CHAIN_WIDTH: usize = 5;
const WATERMARK_WIDTH: usize = 20;
const SUB_INDEX_WIDTH: usize = 20;

/// The identity of a message. The derived ordering is the numeric ordering of
/// `(chain, watermark, sub_index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageKey {
    /// Bridge protocol chain ID.
    pub chain: u16,
    /// Chain-native position (block height, ledger version or event sequence).
    pub watermark: u64,
    /// Position within the watermark unit.
    pub sub_index: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum KeyError {
    #[error("Expected 3 key components, got {0}")]
    Components(usize),
    #[error("Invalid key component {0:?}")]
    Component(String),
}

impl MessageKey {
    /// Creates the key for a message at `watermark`/`sub_index` on `chain`.
    pub fn new(chain: Chain, watermark: u64, sub_index: u64) -> Self {
        Self { chain: chain.id(), watermark, sub_index }
    }

    /// Returns the fixed-width, zero-padded encoding.
    pub fn encode(&self) -> String {
        format!(
            "{:0cw$}{sep}{:0ww$}{sep}{:0sw$}",
            self.chain,
            self.watermark,
            self.sub_index,
            sep = KEY_SEPARATOR,
            cw = CHAIN_WIDTH,
            ww = WATERMARK_WIDTH,
            sw = SUB_INDEX_WIDTH,
        )
    }

    /// Returns the encoding without padding, as written by older deployments.
    pub fn unpadded(&self) -> String {
        format!("{}{KEY_SEPARATOR}{}{KEY_SEPARATOR}{}", self.chain, self.watermark, self.sub_index)
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Parses both padded and unpadded keys.
impl FromStr for MessageKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(KEY_SEPARATOR).collect();
        let [chain, watermark, sub_index] = parts[..] else {
            return Err(KeyError::Components(parts.len()))
        };

        let component = |part: &str| KeyError::Component(part.to_string());

        Ok(Self {
            chain: chain.parse().map_err(|_| component(chain))?,
            watermark: watermark.parse().map_err(|_| component(watermark))?,
            sub_index: sub_index.parse().map_err(|_| component(sub_index))?,
        })
    }
}

impl Serialize for MessageKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for MessageKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?.parse().map_err(serde::de::Error::custom)
    }
}

/// Compares two keys token by token, tolerating unpadded and partial keys.
///
/// Numeric tokens compare numerically, a numeric token sorts before a non-numeric one, and
/// non-numeric tokens compare lexically. A key that runs out of tokens first is smaller.
pub fn compare_keys(a: &str, b: &str) -> Ordering {
    let mut left = a.split(KEY_SEPARATOR);
    let mut right = b.split(KEY_SEPARATOR);

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => match compare_tokens(l, r) {
                Ordering::Equal => continue,
                ordering => return ordering,
            },
        }
    }
}

fn compare_tokens(l: &str, r: &str) -> Ordering {
    match (l.parse::<u128>(), r.parse::<u128>()) {
        (Ok(l), Ok(r)) => l.cmp(&r),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => l.cmp(r),
    }
}
