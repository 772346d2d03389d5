//! Typed wrappers for the `eth_*` methods the indexer consumes.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::TransportError;
use crate::transport::RpcTransport;
use crate::types::{RawBlock, RawReceipt};

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_hex_u64(s: &str) -> Result<u64, TransportError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|e| TransportError::Other(format!("invalid hex quantity {s:?}: {e}")))
}

/// Typed `eth_*` API over any transport.
pub struct EthApi<T> {
    transport: T,
    next_id: AtomicU64,
}

impl<T: RpcTransport> EthApi<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<R, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.transport.call(id, method, params).await
    }

    /// `eth_blockNumber`
    pub async fn block_number(&self) -> Result<u64, TransportError> {
        let hex: String = self.call("eth_blockNumber", vec![]).await?;
        parse_hex_u64(&hex)
    }

    /// `eth_getBlockByNumber(n, true)`; `None` when the node does not know the block.
    pub async fn block_by_number(&self, number: u64) -> Result<Option<RawBlock>, TransportError> {
        self.call(
            "eth_getBlockByNumber",
            vec![json!(format!("0x{number:x}")), json!(true)],
        )
        .await
    }

    /// `eth_getTransactionReceipt`
    pub async fn transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<RawReceipt>, TransportError> {
        self.call("eth_getTransactionReceipt", vec![json!(tx_hash)])
            .await
    }

    /// `eth_getUncleByBlockHashAndIndex`
    pub async fn uncle_by_block_hash_and_index(
        &self,
        block_hash: &str,
        index: usize,
    ) -> Result<Option<RawBlock>, TransportError> {
        self.call(
            "eth_getUncleByBlockHashAndIndex",
            vec![json!(block_hash), json!(format!("0x{index:x}"))],
        )
        .await
    }
}
