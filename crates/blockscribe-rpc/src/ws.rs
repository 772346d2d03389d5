//! WebSocket JSON-RPC client with `eth_subscribe` support.
//!
//! A background task owns the socket. Requests are multiplexed by id and
//! `eth_subscription` notifications are routed through a
//! [`SubscriptionManager`]. The client does not reconnect: when the socket
//! closes every pending request fails with [`TransportError::Closed`] and
//! every subscription receiver ends, leaving reconnection to the owner.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse, RpcId};
use crate::subscriptions::{SubscriptionId, SubscriptionManager};
use crate::transport::RpcTransport;

type Responder = oneshot::Sender<Result<JsonRpcResponse, TransportError>>;
type PendingMap = Arc<Mutex<HashMap<u64, Responder>>>;

fn lock_pending(pending: &PendingMap) -> MutexGuard<'_, HashMap<u64, Responder>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// Configuration for the WebSocket client.
#[derive(Debug, Clone)]
pub struct WsClientConfig {
    /// How long a request may wait for its response.
    pub request_timeout: Duration,
}

impl Default for WsClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Command sent from callers to the background WS task.
enum WsCommand {
    Send { req: JsonRpcRequest, tx: Responder },
    Close,
}

/// WebSocket JSON-RPC client.
pub struct WsRpcClient {
    url: String,
    cmd_tx: mpsc::UnboundedSender<WsCommand>,
    subscriptions: SubscriptionManager,
    next_id: AtomicU64,
    request_timeout: Duration,
}

impl WsRpcClient {
    /// Open the socket at `url` and start the background task.
    pub async fn connect(
        url: impl Into<String>,
        config: WsClientConfig,
    ) -> Result<Self, TransportError> {
        let url = url.into();
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;
        tracing::debug!(url = %url, "WS connected");

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<WsCommand>();
        let subscriptions = SubscriptionManager::new();
        tokio::spawn(ws_task(url.clone(), ws_stream, cmd_rx, subscriptions.clone()));

        Ok(Self {
            url,
            cmd_tx,
            subscriptions,
            next_id: AtomicU64::new(1),
            request_timeout: config.request_timeout,
        })
    }

    /// Subscribe to a WebSocket event stream.
    ///
    /// `kind` is the subscription type (e.g. `"newHeads"`). The receiver ends
    /// when the socket closes.
    pub async fn subscribe(
        &self,
        kind: &str,
        params: Vec<Value>,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<Value>), TransportError> {
        let id: String = self
            .call(
                self.next_id.fetch_add(1, Ordering::Relaxed),
                "eth_subscribe",
                std::iter::once(Value::String(kind.to_string()))
                    .chain(params)
                    .collect(),
            )
            .await?;
        let sub_id = SubscriptionId(id);
        let rx = self.subscriptions.register(sub_id.clone());
        Ok((sub_id, rx))
    }

    /// Close the socket; pending requests fail and subscriptions end.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(WsCommand::Close);
    }
}

impl Drop for WsRpcClient {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(WsCommand::Close);
    }
}

#[async_trait]
impl RpcTransport for WsRpcClient {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(WsCommand::Send { req, tx })
            .map_err(|_| TransportError::Closed)?;
        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout {
                ms: self.request_timeout.as_millis() as u64,
            }),
        }
    }

    fn url(&self) -> &str {
        &self.url
    }
}

/// Background task that owns the WebSocket connection.
async fn ws_task<S>(
    url: String,
    ws_stream: S,
    mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>,
    subscriptions: SubscriptionManager,
) where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    None | Some(WsCommand::Close) => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    Some(WsCommand::Send { req, tx }) => {
                        let Some(id) = req.id.as_number() else {
                            let _ = tx.send(Err(TransportError::Other(
                                "WS requests need a numeric id".into(),
                            )));
                            continue;
                        };
                        let text = match serde_json::to_string(&req) {
                            Ok(text) => text,
                            Err(e) => {
                                let _ = tx.send(Err(TransportError::Deserialization(e)));
                                continue;
                            }
                        };
                        lock_pending(&pending).insert(id, tx);
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            tracing::warn!(url = %url, error = %e, "WS send failed");
                            break;
                        }
                    }
                }
            }
            msg = stream.next() => {
                match msg {
                    None => break,
                    Some(Err(e)) => {
                        tracing::warn!(url = %url, error = %e, "WS receive error");
                        break;
                    }
                    Some(Ok(Message::Text(text))) => {
                        handle_message(&text, &pending, &subscriptions);
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    for (_, tx) in lock_pending(&pending).drain() {
        let _ = tx.send(Err(TransportError::Closed));
    }
    subscriptions.close_all();
    tracing::debug!(url = %url, "WS task finished");
}

fn handle_message(text: &str, pending: &PendingMap, subscriptions: &SubscriptionManager) {
    let Ok(val) = serde_json::from_str::<Value>(text) else {
        tracing::debug!("failed to parse WS message as JSON");
        return;
    };

    if val.get("method").and_then(|m| m.as_str()) == Some("eth_subscription") {
        if let Some(params) = val.get("params") {
            if let Some(id) = params["subscription"].as_str() {
                subscriptions.dispatch(&SubscriptionId(id.to_string()), params["result"].clone());
            }
        }
        return;
    }

    match serde_json::from_value::<JsonRpcResponse>(val) {
        Ok(resp) => {
            let RpcId::Number(id) = resp.id else {
                return;
            };
            if let Some(tx) = lock_pending(pending).remove(&id) {
                let _ = tx.send(Ok(resp));
            }
        }
        Err(e) => tracing::debug!(error = %e, "unrecognised WS message"),
    }
}
