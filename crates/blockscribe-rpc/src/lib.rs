//! blockscribe-rpc: JSON-RPC plumbing between the indexer and an EVM node.
//!
//! # Overview
//!
//! - [`RpcTransport`]: the async trait every transport implements
//! - [`HttpRpcClient`]: `reqwest` transport with retry/backoff
//! - [`WsRpcClient`]: WebSocket transport with `eth_subscribe` support
//! - [`EthApi`]: typed wrappers for the handful of `eth_*` calls we need
//! - [`types`]: raw block/transaction/receipt/log shapes as returned by nodes

pub mod error;
pub mod eth;
pub mod http;
pub mod request;
pub mod retry;
pub mod subscriptions;
pub mod transport;
pub mod types;
pub mod ws;

pub use error::TransportError;
pub use eth::EthApi;
pub use http::{HttpClientConfig, HttpRpcClient};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use retry::{RetryConfig, RetryPolicy};
pub use subscriptions::{SubscriptionId, SubscriptionManager};
pub use transport::RpcTransport;
pub use types::{RawBlock, RawLog, RawReceipt, RawTransaction};
pub use ws::{WsClientConfig, WsRpcClient};
