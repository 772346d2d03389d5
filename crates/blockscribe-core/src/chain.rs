//! Node access seams used by the head tracker and the fetcher.

use std::sync::Arc;

use async_trait::async_trait;
use blockscribe_rpc::eth::parse_hex_u64;
use blockscribe_rpc::{EthApi, RawBlock, RawReceipt, RpcTransport, WsClientConfig, WsRpcClient};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::IndexerError;

/// Read access to an EVM node.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Latest block number (`eth_blockNumber`).
    async fn block_number(&self) -> Result<u64, IndexerError>;

    /// Block with full transaction objects.
    async fn block_by_number(&self, number: u64) -> Result<Option<RawBlock>, IndexerError>;

    async fn transaction_receipt(&self, tx_hash: &str)
        -> Result<Option<RawReceipt>, IndexerError>;

    async fn uncle_by_block_hash_and_index(
        &self,
        block_hash: &str,
        index: usize,
    ) -> Result<Option<RawBlock>, IndexerError>;
}

#[async_trait]
impl<T: RpcTransport> ChainSource for EthApi<T> {
    async fn block_number(&self) -> Result<u64, IndexerError> {
        Ok(EthApi::block_number(self).await?)
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<RawBlock>, IndexerError> {
        Ok(EthApi::block_by_number(self, number).await?)
    }

    async fn transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<RawReceipt>, IndexerError> {
        Ok(EthApi::transaction_receipt(self, tx_hash).await?)
    }

    async fn uncle_by_block_hash_and_index(
        &self,
        block_hash: &str,
        index: usize,
    ) -> Result<Option<RawBlock>, IndexerError> {
        Ok(EthApi::uncle_by_block_hash_and_index(self, block_hash, index).await?)
    }
}

/// A live head feed produced by a [`HeadConnector`].
///
/// `heads == None` means the connector has no push transport and the tracker
/// should poll instead. A push feed that ends signals a dropped connection.
pub struct HeadStream {
    pub heads: Option<mpsc::UnboundedReceiver<u64>>,
}

impl HeadStream {
    pub fn polling() -> Self {
        Self { heads: None }
    }

    pub fn push(heads: mpsc::UnboundedReceiver<u64>) -> Self {
        Self { heads: Some(heads) }
    }
}

/// Establishes (and re-establishes) the head transport.
#[async_trait]
pub trait HeadConnector: Send + Sync {
    async fn connect(&self) -> Result<HeadStream, IndexerError>;
}

/// Connector backed by `eth_subscribe("newHeads")` when a WebSocket URL is
/// configured, polling otherwise.
pub struct RpcHeadConnector {
    ws_url: Option<String>,
}

impl RpcHeadConnector {
    pub fn new(ws_url: Option<String>) -> Self {
        Self { ws_url }
    }
}

#[async_trait]
impl HeadConnector for RpcHeadConnector {
    async fn connect(&self) -> Result<HeadStream, IndexerError> {
        let Some(url) = &self.ws_url else {
            return Ok(HeadStream::polling());
        };

        let client = WsRpcClient::connect(url.clone(), WsClientConfig::default()).await?;
        let (sub_id, mut notifications) = client.subscribe("newHeads", vec![]).await?;
        tracing::info!(url = %url, subscription = %sub_id, "subscribed to newHeads");

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            // The client lives as long as the forwarding task.
            let _client = client;
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    msg = notifications.recv() => {
                        let Some(header) = msg else { break };
                        match header_number(&header) {
                            Some(n) => {
                                if tx.send(n).is_err() {
                                    break;
                                }
                            }
                            None => tracing::warn!(%header, "newHeads notification without a number"),
                        }
                    }
                }
            }
        });

        Ok(HeadStream::push(rx))
    }
}

fn header_number(header: &Value) -> Option<u64> {
    header
        .get("number")
        .and_then(Value::as_str)
        .and_then(|n| parse_hex_u64(n).ok())
}

/// Build the default HTTP-backed [`ChainSource`].
pub fn http_chain_source(http_url: &str) -> Result<Arc<dyn ChainSource>, IndexerError> {
    let client = blockscribe_rpc::HttpRpcClient::default_for(http_url)?;
    Ok(Arc::new(EthApi::new(client)))
}
