//! Test doubles for the node seams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use blockscribe_rpc::{RawBlock, RawLog, RawReceipt, RawTransaction};
use tokio::sync::mpsc;

use crate::chain::{ChainSource, HeadConnector, HeadStream};
use crate::error::IndexerError;
use crate::types::FullBlock;

const SENDER: &str = "0x5a0b54d5dc17e0aadc383d2db43b0a0d3e029c4c";
const RECEIVER: &str = "0xea674fdde714fd979de3edf0f56aa9716b898ec8";
const MINER: &str = "0x829bd824b016326a401d083b33d092293333a830";

/// A 32-byte hash derived from a seed, `0x`-prefixed.
pub fn hash(seed: u64) -> String {
    format!("0x{seed:064x}")
}

/// A consistent block with `txs` value transfers, one log per transaction,
/// and `uncles` uncle hashes in its header.
pub fn full_block(number: u64, seed: u64, txs: usize, uncles: usize) -> FullBlock {
    let block_hash = hash(seed);
    let mut transactions = Vec::with_capacity(txs);
    let mut receipts = Vec::with_capacity(txs);
    for i in 0..txs {
        let tx_hash = hash(seed * 1_000 + i as u64 + 1);
        transactions.push(RawTransaction {
            hash: tx_hash.clone(),
            nonce: format!("0x{i:x}"),
            block_hash: block_hash.clone(),
            block_number: format!("0x{number:x}"),
            transaction_index: format!("0x{i:x}"),
            from: SENDER.into(),
            to: RECEIVER.into(),
            value: "0xde0b6b3a7640000".into(),
            gas: "0x5208".into(),
            gas_price: "0x3b9aca00".into(),
            input: "0x".into(),
            creates: String::new(),
        });
        receipts.push(RawReceipt {
            transaction_hash: tx_hash.clone(),
            transaction_index: format!("0x{i:x}"),
            block_hash: block_hash.clone(),
            block_number: format!("0x{number:x}"),
            cumulative_gas_used: format!("0x{:x}", 21_000 * (i as u64 + 1)),
            gas_used: "0x5208".into(),
            contract_address: String::new(),
            logs: vec![RawLog {
                address: RECEIVER.into(),
                topics: vec![hash(7), hash(8)],
                data: "0x01".into(),
                log_index: format!("0x{i:x}"),
                transaction_hash: tx_hash,
                transaction_index: format!("0x{i:x}"),
            }],
            logs_bloom: "0x00".into(),
            status: "0x1".into(),
        });
    }

    let uncle_blocks: Vec<RawBlock> = (0..uncles)
        .map(|i| RawBlock {
            number: format!("0x{:x}", number.saturating_sub(1)),
            hash: hash(seed * 100 + i as u64 + 1),
            miner: MINER.into(),
            ..header(number.saturating_sub(1), seed * 100 + i as u64 + 1, 0)
        })
        .collect();

    let mut block = header(number, seed, 21_000 * txs as u64);
    block.transactions = transactions;
    block.uncles = uncle_blocks.iter().map(|u| u.hash.clone()).collect();

    FullBlock {
        block,
        receipts,
        uncles: uncle_blocks,
    }
}

fn header(number: u64, seed: u64, gas_used: u64) -> RawBlock {
    RawBlock {
        number: format!("0x{number:x}"),
        hash: hash(seed),
        parent_hash: hash(seed.wrapping_sub(1)),
        nonce: "0x0000000000000042".into(),
        sha3_uncles: hash(3),
        logs_bloom: "0x00".into(),
        transactions_root: hash(4),
        state_root: hash(5),
        receipts_root: hash(6),
        miner: MINER.into(),
        author: String::new(),
        difficulty: "0x2540be400".into(),
        total_difficulty: "0xc70d815d562d3cfa955".into(),
        extra_data: "0x".into(),
        size: "0x21c".into(),
        gas_limit: "0x1c9c380".into(),
        gas_used: format!("0x{gas_used:x}"),
        timestamp: "0x5f5e1000".into(),
        mix_hash: hash(9),
        transactions: vec![],
        uncles: vec![],
    }
}

// ─── MockChain ────────────────────────────────────────────────────────────────

/// In-memory node.
#[derive(Default)]
pub struct MockChain {
    head: AtomicU64,
    head_fails: AtomicBool,
    blocks: Mutex<HashMap<u64, FullBlock>>,
    block_failures: Mutex<HashMap<u64, usize>>,
    receipt_delays: Mutex<HashMap<String, Duration>>,
    failing_receipts: Mutex<Vec<String>>,
    block_requests: Mutex<Vec<u64>>,
    receipt_requests: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_head(&self, n: u64) {
        self.head.store(n, Ordering::SeqCst);
    }

    pub fn fail_head(&self, fail: bool) {
        self.head_fails.store(fail, Ordering::SeqCst);
    }

    pub fn insert(&self, block: FullBlock) {
        let number = crate::transform::hex_to_u64(&block.block.number).unwrap_or(0);
        self.blocks.lock().unwrap().insert(number, block);
    }

    /// Make the next `times` fetches of `number` fail.
    pub fn fail_block(&self, number: u64, times: usize) {
        self.block_failures.lock().unwrap().insert(number, times);
    }

    pub fn delay_receipt(&self, tx_hash: &str, delay: Duration) {
        self.receipt_delays
            .lock()
            .unwrap()
            .insert(tx_hash.to_string(), delay);
    }

    pub fn fail_receipt(&self, tx_hash: &str) {
        self.failing_receipts.lock().unwrap().push(tx_hash.to_string());
    }

    pub fn block_requests(&self) -> Vec<u64> {
        self.block_requests.lock().unwrap().clone()
    }

    pub fn receipt_requests(&self) -> usize {
        self.receipt_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainSource for MockChain {
    async fn block_number(&self) -> Result<u64, IndexerError> {
        if self.head_fails.load(Ordering::SeqCst) {
            return Err(IndexerError::Rpc("connection refused".into()));
        }
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<RawBlock>, IndexerError> {
        self.block_requests.lock().unwrap().push(number);
        {
            let mut failures = self.block_failures.lock().unwrap();
            if let Some(left) = failures.get_mut(&number) {
                if *left > 0 {
                    *left -= 1;
                    return Err(IndexerError::Rpc(format!("block {number} unavailable")));
                }
            }
        }
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .get(&number)
            .map(|b| b.block.clone()))
    }

    async fn transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<RawReceipt>, IndexerError> {
        self.receipt_requests.fetch_add(1, Ordering::SeqCst);
        let delay = self.receipt_delays.lock().unwrap().get(tx_hash).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_receipts.lock().unwrap().iter().any(|h| h == tx_hash) {
            return Err(IndexerError::Rpc(format!("receipt {tx_hash} unavailable")));
        }
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .values()
            .flat_map(|b| b.receipts.iter())
            .find(|r| r.transaction_hash == tx_hash)
            .cloned())
    }

    async fn uncle_by_block_hash_and_index(
        &self,
        block_hash: &str,
        index: usize,
    ) -> Result<Option<RawBlock>, IndexerError> {
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .values()
            .find(|b| b.block.hash == block_hash)
            .and_then(|b| b.uncles.get(index).cloned()))
    }
}

// ─── MockConnector ────────────────────────────────────────────────────────────

/// Connector whose push feed is driven by the test.
pub struct MockConnector {
    push: bool,
    sender: Mutex<Option<mpsc::UnboundedSender<u64>>>,
    connects: AtomicUsize,
}

impl MockConnector {
    pub fn polling() -> Self {
        Self {
            push: false,
            sender: Mutex::new(None),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn push() -> Self {
        Self {
            push: true,
            ..Self::polling()
        }
    }

    pub fn push_head(&self, n: u64) {
        if let Some(tx) = self.sender.lock().unwrap().as_ref() {
            let _ = tx.send(n);
        }
    }

    /// End the current push feed.
    pub fn disconnect(&self) {
        self.sender.lock().unwrap().take();
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HeadConnector for MockConnector {
    async fn connect(&self) -> Result<HeadStream, IndexerError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.push {
            return Ok(HeadStream::polling());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap() = Some(tx);
        Ok(HeadStream::push(rx))
    }
}
