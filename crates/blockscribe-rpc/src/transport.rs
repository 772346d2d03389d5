//! The `RpcTransport` trait: the seam between the indexer and a node connection.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};

/// An async JSON-RPC transport.
///
/// Implementations must be `Send + Sync` so a single client can be shared
/// between the head tracker, the fetcher's receipt tasks and the CLI.
/// The trait is object-safe and can be stored as `Arc<dyn RpcTransport>`.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Send a single JSON-RPC request and return the response.
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError>;

    /// The transport's endpoint URL.
    fn url(&self) -> &str;

    /// Call a method and deserialize the result.
    async fn call<T: DeserializeOwned>(
        &self,
        id: u64,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, TransportError>
    where
        Self: Sized,
    {
        let req = JsonRpcRequest::new(id, method, params);
        let resp = self.send(req).await?;
        let result = resp.into_result().map_err(TransportError::Rpc)?;
        serde_json::from_value(result).map_err(TransportError::Deserialization)
    }
}

#[async_trait]
impl<T: RpcTransport + ?Sized> RpcTransport for std::sync::Arc<T> {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        (**self).send(req).await
    }

    fn url(&self) -> &str {
        (**self).url()
    }
}
