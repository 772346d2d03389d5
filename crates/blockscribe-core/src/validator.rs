//! Block validation contract and the default structural validator.

use crate::error::ValidationError;
use crate::transform::hex_to_decimal;
use crate::types::FullBlock;

/// Pass/fail check run on every fetched block before it is stored.
pub trait BlockValidator: Send + Sync {
    fn validate(&self, block: &FullBlock) -> Result<(), ValidationError>;
}

/// Consistency checks between a header, its receipts and its uncles.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralValidator;

impl BlockValidator for StructuralValidator {
    fn validate(&self, full: &FullBlock) -> Result<(), ValidationError> {
        let txs = &full.block.transactions;
        if full.receipts.len() != txs.len() {
            return Err(ValidationError::ReceiptCount {
                txs: txs.len(),
                receipts: full.receipts.len(),
            });
        }

        for (index, (tx, receipt)) in txs.iter().zip(&full.receipts).enumerate() {
            if !tx.hash.eq_ignore_ascii_case(&receipt.transaction_hash) {
                return Err(ValidationError::ReceiptMismatch {
                    index,
                    tx: tx.hash.clone(),
                    receipt_tx: receipt.transaction_hash.clone(),
                });
            }
        }

        // Uncles are only present when uncle scraping is on.
        if !full.uncles.is_empty() && full.uncles.len() != full.block.uncles.len() {
            return Err(ValidationError::UncleCount {
                expected: full.block.uncles.len(),
                fetched: full.uncles.len(),
            });
        }

        if let Some(last) = full.receipts.last() {
            let header = hex_to_decimal(&full.block.gas_used).unwrap_or_default();
            let cumulative = hex_to_decimal(&last.cumulative_gas_used).unwrap_or_default();
            if header != cumulative {
                return Err(ValidationError::GasUsed { header, cumulative });
            }
        }

        Ok(())
    }
}
