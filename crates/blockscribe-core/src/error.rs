//! Error types for the ingestion pipeline.

use blockscribe_rpc::TransportError;
use thiserror::Error;

/// Errors that can occur during indexing.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Invalid block {block_number}: {source}")]
    Validation {
        block_number: u64,
        #[source]
        source: ValidationError,
    },

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("Startup failed: {0}")]
    Startup(String),

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }
}

impl From<TransportError> for IndexerError {
    fn from(e: TransportError) -> Self {
        Self::Rpc(e.to_string())
    }
}

/// Structural problems found in a fetched block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{receipts} receipts for {txs} transactions")]
    ReceiptCount { txs: usize, receipts: usize },

    #[error("receipt {index} belongs to {receipt_tx}, expected {tx}")]
    ReceiptMismatch {
        index: usize,
        tx: String,
        receipt_tx: String,
    },

    #[error("{fetched} uncles fetched, header lists {expected}")]
    UncleCount { expected: usize, fetched: usize },

    #[error("cumulative gas {cumulative} does not match header gas used {header}")]
    GasUsed { header: String, cumulative: String },
}
