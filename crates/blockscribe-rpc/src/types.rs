//! Raw chain objects as returned by `eth_*` methods.
//!
//! Quantities stay as the node's hex strings; decoding into row values is the
//! indexer's job. Fields that some clients omit or send as `null` (Parity's
//! `author`, pre-merge `totalDifficulty`, pre-Byzantium `status`) read as empty.

use serde::{Deserialize, Serialize};

/// A block from `eth_getBlockByNumber(n, true)` or
/// `eth_getUncleByBlockHashAndIndex`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawBlock {
    #[serde(deserialize_with = "null_as_default")]
    pub number: String,
    #[serde(deserialize_with = "null_as_default")]
    pub hash: String,
    #[serde(deserialize_with = "null_as_default")]
    pub parent_hash: String,
    #[serde(deserialize_with = "null_as_default")]
    pub nonce: String,
    #[serde(deserialize_with = "null_as_default")]
    pub sha3_uncles: String,
    #[serde(deserialize_with = "null_as_default")]
    pub logs_bloom: String,
    #[serde(deserialize_with = "null_as_default")]
    pub transactions_root: String,
    #[serde(deserialize_with = "null_as_default")]
    pub state_root: String,
    #[serde(deserialize_with = "null_as_default")]
    pub receipts_root: String,
    #[serde(deserialize_with = "null_as_default")]
    pub miner: String,
    #[serde(deserialize_with = "null_as_default")]
    pub author: String,
    #[serde(deserialize_with = "null_as_default")]
    pub difficulty: String,
    #[serde(deserialize_with = "null_as_default")]
    pub total_difficulty: String,
    #[serde(deserialize_with = "null_as_default")]
    pub extra_data: String,
    #[serde(deserialize_with = "null_as_default")]
    pub size: String,
    #[serde(deserialize_with = "null_as_default")]
    pub gas_limit: String,
    #[serde(deserialize_with = "null_as_default")]
    pub gas_used: String,
    #[serde(deserialize_with = "null_as_default")]
    pub timestamp: String,
    #[serde(deserialize_with = "null_as_default")]
    pub mix_hash: String,
    #[serde(deserialize_with = "null_as_default")]
    pub transactions: Vec<RawTransaction>,
    #[serde(deserialize_with = "null_as_default")]
    pub uncles: Vec<String>,
}

impl RawBlock {
    /// The block's beneficiary; falls back to `author` for clients that
    /// leave `miner` empty.
    pub fn beneficiary(&self) -> &str {
        if self.miner.is_empty() {
            &self.author
        } else {
            &self.miner
        }
    }
}

/// A transaction embedded in a full block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawTransaction {
    #[serde(deserialize_with = "null_as_default")]
    pub hash: String,
    #[serde(deserialize_with = "null_as_default")]
    pub nonce: String,
    #[serde(deserialize_with = "null_as_default")]
    pub block_hash: String,
    #[serde(deserialize_with = "null_as_default")]
    pub block_number: String,
    #[serde(deserialize_with = "null_as_default")]
    pub transaction_index: String,
    #[serde(deserialize_with = "null_as_default")]
    pub from: String,
    /// Empty (or `null`) for contract creations.
    #[serde(deserialize_with = "null_as_default")]
    pub to: String,
    #[serde(deserialize_with = "null_as_default")]
    pub value: String,
    #[serde(deserialize_with = "null_as_default")]
    pub gas: String,
    #[serde(deserialize_with = "null_as_default")]
    pub gas_price: String,
    #[serde(deserialize_with = "null_as_default")]
    pub input: String,
    /// Parity-only: the created contract address.
    #[serde(deserialize_with = "null_as_default")]
    pub creates: String,
}

/// A transaction receipt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawReceipt {
    #[serde(deserialize_with = "null_as_default")]
    pub transaction_hash: String,
    #[serde(deserialize_with = "null_as_default")]
    pub transaction_index: String,
    #[serde(deserialize_with = "null_as_default")]
    pub block_hash: String,
    #[serde(deserialize_with = "null_as_default")]
    pub block_number: String,
    #[serde(deserialize_with = "null_as_default")]
    pub cumulative_gas_used: String,
    #[serde(deserialize_with = "null_as_default")]
    pub gas_used: String,
    #[serde(deserialize_with = "null_as_default")]
    pub contract_address: String,
    #[serde(deserialize_with = "null_as_default")]
    pub logs: Vec<RawLog>,
    #[serde(deserialize_with = "null_as_default")]
    pub logs_bloom: String,
    #[serde(deserialize_with = "null_as_default")]
    pub status: String,
}

/// A log emitted during transaction execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawLog {
    #[serde(deserialize_with = "null_as_default")]
    pub address: String,
    #[serde(deserialize_with = "null_as_default")]
    pub topics: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub data: String,
    #[serde(deserialize_with = "null_as_default")]
    pub log_index: String,
    #[serde(deserialize_with = "null_as_default")]
    pub transaction_hash: String,
    #[serde(deserialize_with = "null_as_default")]
    pub transaction_index: String,
}

/// Treat an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
