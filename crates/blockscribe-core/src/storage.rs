//! Block storage contract.
//!
//! A store persists [`BlockRows`] one block at a time. Storing a block whose
//! hash is already present is a no-op; storing a different hash at a stored
//! number replaces every row of that number. Implementations do both inside
//! a single transaction.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::transform::BlockRows;

/// What `store` did with a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreOutcome {
    /// New block number.
    Inserted,
    /// Same hash already stored; nothing written.
    AlreadyStored,
    /// A different block was stored at this number and has been replaced (reorg).
    Replaced,
}

/// Trait for persisting indexed blocks.
///
/// Implementations include `MemoryBlockStore`, `PostgresStore` and
/// `SqliteStore`.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Highest stored block number, `None` when empty.
    async fn highest_block(&self) -> Result<Option<u64>, IndexerError>;

    /// Persist a block atomically, replacing a conflicting block at the same number.
    async fn store(&self, rows: &BlockRows) -> Result<StoreOutcome, IndexerError>;

    /// Remove every stored row.
    async fn reset(&self) -> Result<(), IndexerError>;

    /// Release connections.
    async fn close(&self) -> Result<(), IndexerError>;
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

/// In-memory block store for tests and dry runs.
#[derive(Default)]
pub struct MemoryBlockStore {
    blocks: Mutex<BTreeMap<u64, BlockRows>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, BlockRows>> {
        self.blocks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Rows stored for `number`.
    pub fn get(&self, number: u64) -> Option<BlockRows> {
        self.lock().get(&number).cloned()
    }

    pub fn numbers(&self) -> Vec<u64> {
        self.lock().keys().copied().collect()
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn highest_block(&self) -> Result<Option<u64>, IndexerError> {
        Ok(self.lock().keys().next_back().copied())
    }

    async fn store(&self, rows: &BlockRows) -> Result<StoreOutcome, IndexerError> {
        let mut blocks = self.lock();
        if blocks.values().any(|b| b.hash() == rows.hash()) {
            return Ok(StoreOutcome::AlreadyStored);
        }
        let outcome = match blocks.insert(rows.number(), rows.clone()) {
            Some(_) => StoreOutcome::Replaced,
            None => StoreOutcome::Inserted,
        };
        Ok(outcome)
    }

    async fn reset(&self) -> Result<(), IndexerError> {
        self.lock().clear();
        Ok(())
    }

    async fn close(&self) -> Result<(), IndexerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::full_block;

    fn rows(number: u64, seed: u64, txs: usize) -> BlockRows {
        BlockRows::from_full_block(&full_block(number, seed, txs, 0)).unwrap()
    }

    #[tokio::test]
    async fn same_hash_twice_is_noop() {
        let store = MemoryBlockStore::new();
        assert_eq!(store.store(&rows(5, 1, 2)).await.unwrap(), StoreOutcome::Inserted);
        assert_eq!(store.store(&rows(5, 1, 2)).await.unwrap(), StoreOutcome::AlreadyStored);
        assert_eq!(store.highest_block().await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn different_hash_replaces_all_rows() {
        let store = MemoryBlockStore::new();
        store.store(&rows(5, 1, 3)).await.unwrap();
        assert_eq!(store.store(&rows(5, 2, 1)).await.unwrap(), StoreOutcome::Replaced);

        let stored = store.get(5).unwrap();
        assert_eq!(stored, rows(5, 2, 1));
        assert_eq!(stored.txs.len(), 1);
        assert_eq!(stored.account_txs.len(), 2);
    }

    #[tokio::test]
    async fn reset_empties_store() {
        let store = MemoryBlockStore::new();
        store.store(&rows(1, 1, 0)).await.unwrap();
        store.store(&rows(2, 2, 0)).await.unwrap();
        store.reset().await.unwrap();
        assert_eq!(store.highest_block().await.unwrap(), None);
    }
}
