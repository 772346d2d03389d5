//! Conversion of fetched blocks into storage rows.
//!
//! Hashes and addresses are lower-cased with the `0x` prefix stripped. Gas,
//! value and difficulty become base-10 strings so they can be stored as
//! arbitrary-precision numerics. Byte blobs are hex-decoded.

use alloy_primitives::U256;
use blockscribe_rpc::{RawBlock, RawLog, RawReceipt, RawTransaction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::types::FullBlock;

// ─── Hex helpers ──────────────────────────────────────────────────────────────

/// Strip a leading `0x`.
pub fn trim_0x(s: &str) -> &str {
    s.strip_prefix("0x").unwrap_or(s)
}

/// Lower-case, prefix-stripped form used for every stored hash and address.
pub fn canonical_hash(s: &str) -> String {
    trim_0x(s).to_ascii_lowercase()
}

pub fn hex_to_u64(s: &str) -> Result<u64, IndexerError> {
    let digits = trim_0x(s);
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| IndexerError::Transform(format!("invalid quantity {s:?}: {e}")))
}

/// Hex quantity of any width to a base-10 string. Empty means zero.
pub fn hex_to_decimal(s: &str) -> Result<String, IndexerError> {
    let digits = trim_0x(s);
    if digits.is_empty() {
        return Ok("0".into());
    }
    U256::from_str_radix(digits, 16)
        .map(|v| v.to_string())
        .map_err(|e| IndexerError::Transform(format!("invalid quantity {s:?}: {e}")))
}

pub fn hex_to_bytes(s: &str) -> Result<Vec<u8>, IndexerError> {
    let digits = trim_0x(s);
    // Some clients return odd-length quantities such as "0x0".
    let decoded = if digits.len() % 2 == 1 {
        hex::decode(format!("0{digits}"))
    } else {
        hex::decode(digits)
    };
    decoded.map_err(|e| IndexerError::Transform(format!("invalid hex data {s:?}: {e}")))
}

fn timestamp(s: &str) -> Result<DateTime<Utc>, IndexerError> {
    let secs = hex_to_u64(s)?;
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| IndexerError::Transform(format!("timestamp out of range: {s}")))
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

// ─── Rows ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRow {
    pub number: u64,
    pub block_hash: String,
    pub parent_block_hash: String,
    pub block_creation_time: DateTime<Utc>,
    pub block_gas_limit: String,
    pub block_gas_used: String,
    pub block_difficulty: String,
    pub total_block_difficulty: String,
    pub block_extra_data: Vec<u8>,
    pub block_mix_hash: Vec<u8>,
    pub block_nonce: Vec<u8>,
    pub block_size: u64,
    pub block_logs_bloom: Vec<u8>,
    /// Uncle hashes exactly as listed in the header.
    pub includes_uncle: Vec<String>,
    pub has_beneficiary: Vec<u8>,
    pub has_receipts_trie: Vec<u8>,
    pub has_tx_trie: Vec<u8>,
    pub sha3_uncles: Vec<u8>,
    pub number_of_uncles: u32,
    pub number_of_txs: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRow {
    pub tx_hash: String,
    pub included_in_block: u64,
    pub tx_index: u32,
    pub from: Vec<u8>,
    pub to: Vec<u8>,
    pub value: String,
    pub tx_nonce: u64,
    pub msg_gas_limit: String,
    pub tx_gas_used: String,
    pub tx_gas_price: String,
    pub cumulative_gas_used: String,
    pub msg_payload: Vec<u8>,
    pub msg_status: Option<String>,
    pub creates: Option<Vec<u8>>,
    pub tx_logs_bloom: Vec<u8>,
    pub block_creation_time: DateTime<Utc>,
    pub log_entries_triggered: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncleRow {
    pub block_hash: String,
    pub included_in_block: u64,
    pub number: u64,
    pub block_creation_time: DateTime<Utc>,
    pub uncle_index: u32,
    pub block_gas_limit: String,
    pub block_gas_used: String,
    pub has_beneficiary: Vec<u8>,
    pub block_difficulty: String,
    pub block_extra_data: Vec<u8>,
    pub block_mix_hash: Vec<u8>,
    pub block_nonce: Vec<u8>,
    pub sha3_uncles: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntryRow {
    pub tx_hash: String,
    /// Position of the log within its transaction.
    pub log_index: u32,
    pub log_data: Vec<u8>,
    pub logged_by: String,
    pub topic_0: Option<String>,
    pub topic_1: Option<String>,
    pub topic_2: Option<String>,
    pub topic_3: Option<String>,
    pub included_in_block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTxRow {
    pub address: String,
    pub counterparty: String,
    pub tx_hash: String,
    pub out: bool,
    pub included_in_block: u64,
    pub tx_index: u32,
}

/// Every row derived from one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRows {
    pub block: BlockRow,
    pub txs: Vec<TxRow>,
    pub uncles: Vec<UncleRow>,
    pub log_entries: Vec<LogEntryRow>,
    pub account_txs: Vec<AccountTxRow>,
}

impl BlockRows {
    pub fn number(&self) -> u64 {
        self.block.number
    }

    pub fn hash(&self) -> &str {
        &self.block.block_hash
    }

    pub fn from_full_block(full: &FullBlock) -> Result<Self, IndexerError> {
        let raw = &full.block;
        if full.receipts.len() != raw.transactions.len() {
            return Err(IndexerError::Transform(format!(
                "{} receipts for {} transactions",
                full.receipts.len(),
                raw.transactions.len()
            )));
        }

        let block = block_row(raw)?;
        let number = block.number;
        let created = block.block_creation_time;

        let mut txs = Vec::with_capacity(raw.transactions.len());
        let mut log_entries = Vec::new();
        let mut account_txs = Vec::with_capacity(raw.transactions.len() * 2);
        for (tx, receipt) in raw.transactions.iter().zip(&full.receipts) {
            let row = tx_row(tx, receipt, number, created)?;
            for (i, log) in receipt.logs.iter().enumerate() {
                log_entries.push(log_entry_row(log, &row.tx_hash, i as u32, number)?);
            }
            account_txs.extend(account_tx_rows(tx, &row));
            txs.push(row);
        }

        let uncles = full
            .uncles
            .iter()
            .enumerate()
            .map(|(i, uncle)| uncle_row(uncle, i as u32, number))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            block,
            txs,
            uncles,
            log_entries,
            account_txs,
        })
    }
}

fn block_row(b: &RawBlock) -> Result<BlockRow, IndexerError> {
    Ok(BlockRow {
        number: hex_to_u64(&b.number)?,
        block_hash: canonical_hash(&b.hash),
        parent_block_hash: canonical_hash(&b.parent_hash),
        block_creation_time: timestamp(&b.timestamp)?,
        block_gas_limit: hex_to_decimal(&b.gas_limit)?,
        block_gas_used: hex_to_decimal(&b.gas_used)?,
        block_difficulty: hex_to_decimal(&b.difficulty)?,
        total_block_difficulty: hex_to_decimal(&b.total_difficulty)?,
        block_extra_data: hex_to_bytes(&b.extra_data)?,
        block_mix_hash: hex_to_bytes(&b.mix_hash)?,
        block_nonce: hex_to_bytes(&b.nonce)?,
        block_size: hex_to_u64(&b.size)?,
        block_logs_bloom: hex_to_bytes(&b.logs_bloom)?,
        includes_uncle: b.uncles.iter().map(|h| canonical_hash(h)).collect(),
        has_beneficiary: hex_to_bytes(b.beneficiary())?,
        has_receipts_trie: hex_to_bytes(&b.receipts_root)?,
        has_tx_trie: hex_to_bytes(&b.transactions_root)?,
        sha3_uncles: hex_to_bytes(&b.sha3_uncles)?,
        number_of_uncles: b.uncles.len() as u32,
        number_of_txs: b.transactions.len() as u32,
    })
}

fn tx_row(
    tx: &RawTransaction,
    receipt: &RawReceipt,
    number: u64,
    created: DateTime<Utc>,
) -> Result<TxRow, IndexerError> {
    // Contract creations have no destination; the receipt names the new contract.
    let mut to = tx.to.as_str();
    let mut creates = None;
    if to.is_empty() {
        if let Some(address) = non_empty(&receipt.contract_address) {
            to = address;
            creates = Some(address);
        }
    }
    if let Some(explicit) = non_empty(&tx.creates) {
        creates = Some(explicit);
    }

    Ok(TxRow {
        tx_hash: canonical_hash(&tx.hash),
        included_in_block: number,
        tx_index: hex_to_u64(&tx.transaction_index)? as u32,
        from: hex_to_bytes(&tx.from)?,
        to: hex_to_bytes(to)?,
        value: hex_to_decimal(&tx.value)?,
        tx_nonce: hex_to_u64(&tx.nonce)?,
        msg_gas_limit: hex_to_decimal(&tx.gas)?,
        tx_gas_used: hex_to_decimal(&receipt.gas_used)?,
        tx_gas_price: hex_to_decimal(&tx.gas_price)?,
        cumulative_gas_used: hex_to_decimal(&receipt.cumulative_gas_used)?,
        msg_payload: hex_to_bytes(&tx.input)?,
        msg_status: non_empty(&receipt.status).map(str::to_string),
        creates: creates.map(hex_to_bytes).transpose()?,
        tx_logs_bloom: hex_to_bytes(&receipt.logs_bloom)?,
        block_creation_time: created,
        log_entries_triggered: receipt.logs.len() as u32,
    })
}

fn log_entry_row(
    log: &RawLog,
    tx_hash: &str,
    index: u32,
    number: u64,
) -> Result<LogEntryRow, IndexerError> {
    let topic = |i: usize| log.topics.get(i).map(|t| canonical_hash(t));
    Ok(LogEntryRow {
        tx_hash: tx_hash.to_string(),
        log_index: index,
        log_data: hex_to_bytes(&log.data)?,
        logged_by: canonical_hash(&log.address),
        topic_0: topic(0),
        topic_1: topic(1),
        topic_2: topic(2),
        topic_3: topic(3),
        included_in_block: number,
    })
}

/// One outbound row keyed by the sender and one inbound row keyed by the receiver.
fn account_tx_rows(tx: &RawTransaction, row: &TxRow) -> [AccountTxRow; 2] {
    let from = canonical_hash(&tx.from);
    let to = hex::encode(&row.to);
    [
        AccountTxRow {
            address: from.clone(),
            counterparty: to.clone(),
            tx_hash: row.tx_hash.clone(),
            out: true,
            included_in_block: row.included_in_block,
            tx_index: row.tx_index,
        },
        AccountTxRow {
            address: to,
            counterparty: from,
            tx_hash: row.tx_hash.clone(),
            out: false,
            included_in_block: row.included_in_block,
            tx_index: row.tx_index,
        },
    ]
}

fn uncle_row(u: &RawBlock, index: u32, included_in: u64) -> Result<UncleRow, IndexerError> {
    Ok(UncleRow {
        block_hash: canonical_hash(&u.hash),
        included_in_block: included_in,
        number: hex_to_u64(&u.number)?,
        block_creation_time: timestamp(&u.timestamp)?,
        uncle_index: index,
        block_gas_limit: hex_to_decimal(&u.gas_limit)?,
        block_gas_used: hex_to_decimal(&u.gas_used)?,
        has_beneficiary: hex_to_bytes(u.beneficiary())?,
        block_difficulty: hex_to_decimal(&u.difficulty)?,
        block_extra_data: hex_to_bytes(&u.extra_data)?,
        block_mix_hash: hex_to_bytes(&u.mix_hash)?,
        block_nonce: hex_to_bytes(&u.nonce)?,
        sha3_uncles: hex_to_bytes(&u.sha3_uncles)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{full_block, hash};

    #[test]
    fn hex_helpers() {
        assert_eq!(canonical_hash("0xABcd"), "abcd");
        assert_eq!(hex_to_u64("0x10").unwrap(), 16);
        assert_eq!(hex_to_decimal("0x").unwrap(), "0");
        assert_eq!(hex_to_bytes("0x0").unwrap(), vec![0]);
        assert!(hex_to_decimal("0xnothex").is_err());
    }

    #[test]
    fn quantities_wider_than_64_bits() {
        // 2^100
        assert_eq!(
            hex_to_decimal("0x10000000000000000000000000").unwrap(),
            "1267650600228229401496703205376"
        );
        assert_eq!(
            hex_to_decimal(&format!("0x{}", "f".repeat(64))).unwrap(),
            U256::MAX.to_string()
        );
    }

    #[test]
    fn block_rows_from_full_block() {
        let full = full_block(1_000, 5, 2, 1);
        let rows = BlockRows::from_full_block(&full).unwrap();

        assert_eq!(rows.number(), 1_000);
        assert_eq!(rows.hash(), canonical_hash(&hash(5)));
        assert_eq!(rows.block.number_of_txs, 2);
        assert_eq!(rows.block.number_of_uncles, 1);
        assert_eq!(rows.block.total_block_difficulty, "58750003716598352816469");
        assert_eq!(rows.block.block_creation_time.timestamp(), 0x5f5e1000);
        let uncles: Vec<String> = full.block.uncles.iter().map(|h| canonical_hash(h)).collect();
        assert_eq!(rows.block.includes_uncle, uncles);

        assert_eq!(rows.txs.len(), 2);
        assert_eq!(rows.txs[1].tx_index, 1);
        assert_eq!(rows.txs[0].value, "1000000000000000000");
        assert_eq!(rows.txs[1].cumulative_gas_used, "42000");
        assert_eq!(rows.txs[0].msg_status.as_deref(), Some("0x1"));
        assert!(rows.txs[0].creates.is_none());

        assert_eq!(rows.uncles.len(), 1);
        assert_eq!(rows.uncles[0].included_in_block, 1_000);
        assert_eq!(rows.uncles[0].number, 999);
    }

    #[test]
    fn uncle_references_are_canonical() {
        let mut full = full_block(10, 1, 0, 1);
        full.block.uncles = vec![format!("0x{}", "AB".repeat(32))];
        full.uncles[0].hash = full.block.uncles[0].clone();
        let rows = BlockRows::from_full_block(&full).unwrap();
        assert_eq!(rows.block.includes_uncle, vec!["ab".repeat(32)]);
        assert_eq!(rows.uncles[0].block_hash, rows.block.includes_uncle[0]);
    }

    #[test]
    fn contract_creation_takes_receipt_address() {
        let mut full = full_block(10, 1, 1, 0);
        full.block.transactions[0].to = String::new();
        full.receipts[0].contract_address = "0xDEADbeef00000000000000000000000000000001".into();

        let rows = BlockRows::from_full_block(&full).unwrap();
        let created = hex_to_bytes("0xdeadbeef00000000000000000000000000000001").unwrap();
        assert_eq!(rows.txs[0].to, created);
        assert_eq!(rows.txs[0].creates.as_ref(), Some(&created));
        assert_eq!(
            rows.account_txs[1].address,
            "deadbeef00000000000000000000000000000001"
        );
    }

    #[test]
    fn explicit_creates_wins() {
        let mut full = full_block(10, 1, 1, 0);
        full.block.transactions[0].to = String::new();
        full.block.transactions[0].creates = "0x02".into();
        full.receipts[0].contract_address = "0x01".into();

        let rows = BlockRows::from_full_block(&full).unwrap();
        assert_eq!(rows.txs[0].to, vec![1]);
        assert_eq!(rows.txs[0].creates, Some(vec![2]));
    }

    #[test]
    fn log_topics_flattened_in_order() {
        let mut full = full_block(10, 1, 1, 0);
        full.receipts[0].logs[0].topics = vec![hash(1), hash(2), hash(3)];
        let rows = BlockRows::from_full_block(&full).unwrap();
        let log = &rows.log_entries[0];
        assert_eq!(log.topic_0.as_deref(), Some(canonical_hash(&hash(1)).as_str()));
        assert_eq!(log.topic_2.as_deref(), Some(canonical_hash(&hash(3)).as_str()));
        assert!(log.topic_3.is_none());
        assert_eq!(rows.txs[0].log_entries_triggered, 1);
    }

    #[test]
    fn two_account_rows_per_transaction() {
        let full = full_block(10, 1, 3, 0);
        let rows = BlockRows::from_full_block(&full).unwrap();
        assert_eq!(rows.account_txs.len(), 6);

        let (out, inbound) = (&rows.account_txs[0], &rows.account_txs[1]);
        assert!(out.out && !inbound.out);
        assert_eq!(out.address, inbound.counterparty);
        assert_eq!(out.counterparty, inbound.address);
        assert_eq!(out.address, canonical_hash(&full.block.transactions[0].from));
    }

    #[test]
    fn mismatched_receipts_rejected() {
        let mut full = full_block(10, 1, 2, 0);
        full.receipts.pop();
        assert!(matches!(
            BlockRows::from_full_block(&full),
            Err(IndexerError::Transform(_))
        ));
    }
}
