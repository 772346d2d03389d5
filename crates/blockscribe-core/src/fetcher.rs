//! Block fetcher: header and body, every receipt, and optionally uncles.
//!
//! Receipts are fetched concurrently (one task per transaction) and put back
//! into transaction-index order. Uncles are fetched one by one.

use std::sync::Arc;
use std::time::Instant;

use blockscribe_rpc::RawReceipt;
use tokio::task::JoinSet;

use crate::chain::ChainSource;
use crate::error::IndexerError;
use crate::types::FullBlock;

/// Fetches everything needed to store a block.
pub struct BlockFetcher {
    chain: Arc<dyn ChainSource>,
    uncles: bool,
}

impl BlockFetcher {
    pub fn new(chain: Arc<dyn ChainSource>, uncles: bool) -> Self {
        Self { chain, uncles }
    }

    /// Fetch block `number` with its receipts (and uncles when enabled).
    ///
    /// Any failed or missing piece fails the whole fetch.
    pub async fn fetch(&self, number: u64) -> Result<FullBlock, IndexerError> {
        let start = Instant::now();

        let block = self
            .chain
            .block_by_number(number)
            .await?
            .ok_or_else(|| IndexerError::not_found(format!("block {number}")))?;

        let receipts = self.receipts(&block.transactions).await?;

        let uncles = if self.uncles {
            let mut uncles = Vec::with_capacity(block.uncles.len());
            for index in 0..block.uncles.len() {
                let uncle = self
                    .chain
                    .uncle_by_block_hash_and_index(&block.hash, index)
                    .await?
                    .ok_or_else(|| {
                        IndexerError::not_found(format!("uncle {index} of block {number}"))
                    })?;
                uncles.push(uncle);
            }
            uncles
        } else {
            Vec::new()
        };

        tracing::debug!(
            block = number,
            txs = block.transactions.len(),
            uncles = uncles.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "fetched block"
        );

        Ok(FullBlock {
            block,
            receipts,
            uncles,
        })
    }

    async fn receipts(
        &self,
        txs: &[blockscribe_rpc::RawTransaction],
    ) -> Result<Vec<RawReceipt>, IndexerError> {
        let mut tasks = JoinSet::new();
        for (index, tx) in txs.iter().enumerate() {
            let chain = Arc::clone(&self.chain);
            let hash = tx.hash.clone();
            tasks.spawn(async move {
                let receipt = chain
                    .transaction_receipt(&hash)
                    .await?
                    .ok_or_else(|| IndexerError::not_found(format!("receipt for {hash}")))?;
                Ok::<_, IndexerError>((index, receipt))
            });
        }

        let mut receipts = Vec::with_capacity(txs.len());
        while let Some(joined) = tasks.join_next().await {
            let result = joined
                .map_err(|e| IndexerError::Other(format!("receipt task failed: {e}")))
                .and_then(|r| r);
            match result {
                Ok(pair) => receipts.push(pair),
                Err(e) => {
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }

        receipts.sort_by_key(|(index, _)| *index);
        Ok(receipts.into_iter().map(|(_, r)| r).collect())
    }
}
