//! WebSocket JSON-RPC transport with auto-reconnect and a connection epoch.
//!
//! A background task owns the socket. Every successful (re)connect bumps the
//! epoch published on a `watch` channel. When the socket drops, in-flight
//! requests fail and live subscriptions end; nothing is re-subscribed here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time;
use tokio_tungstenite::tungstenite::Message;

use crate::rpc::{JsonRpcRequest, JsonRpcResponse, RpcId, TransportError};
use crate::subscriptions::{SubscriptionId, SubscriptionManager};

type ResponseTx = oneshot::Sender<Result<JsonRpcResponse, TransportError>>;

struct Pending {
    tx: ResponseTx,
    /// Set for `eth_subscribe`: where notifications go once the id is known.
    subscription: Option<mpsc::UnboundedSender<Value>>,
}

type PendingMap = Arc<Mutex<HashMap<u64, Pending>>>;

/// Configuration for the WebSocket transport.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Reconnect backoff starting duration.
    pub reconnect_initial: Duration,
    /// Maximum reconnect backoff.
    pub reconnect_max: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(60),
        }
    }
}

/// Command sent from callers to the background WS task.
enum WsCommand {
    Send {
        req: JsonRpcRequest,
        tx: ResponseTx,
        subscription: Option<mpsc::UnboundedSender<Value>>,
    },
    Close,
}

/// WebSocket JSON-RPC transport.
pub struct WsTransport {
    url: String,
    cmd_tx: mpsc::UnboundedSender<WsCommand>,
    epoch: watch::Receiver<u64>,
    req_id: AtomicU64,
}

impl WsTransport {
    /// Start the background task for `url`. Returns immediately; the first
    /// connection is signalled by the epoch moving from 0 to 1.
    pub fn connect(url: impl Into<String>, config: WsConfig) -> Self {
        let url = url.into();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<WsCommand>();
        let (epoch_tx, epoch) = watch::channel(0u64);

        tokio::spawn(ws_task(url.clone(), cmd_rx, epoch_tx, config));

        Self {
            url,
            cmd_tx,
            epoch,
            req_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connection epoch (0 until the first connect).
    pub fn epoch(&self) -> watch::Receiver<u64> {
        self.epoch.clone()
    }

    /// Call `method` and deserialize the result.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, TransportError> {
        let value = self.send(method, params, None).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// `eth_subscribe(kind, ...params)`. The returned stream ends when the
    /// connection drops.
    pub async fn subscribe(
        &self,
        kind: &str,
        params: Vec<Value>,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<Value>), TransportError> {
        let (sub_tx, sub_rx) = mpsc::unbounded_channel();
        let params = std::iter::once(Value::String(kind.to_string()))
            .chain(params)
            .collect();
        let id = self.send("eth_subscribe", params, Some(sub_tx)).await?;
        let id = id
            .as_str()
            .map(|s| SubscriptionId(s.to_string()))
            .ok_or_else(|| TransportError::Other(format!("unexpected subscription id {id}")))?;
        Ok((id, sub_rx))
    }

    async fn send(
        &self,
        method: &str,
        params: Vec<Value>,
        subscription: Option<mpsc::UnboundedSender<Value>>,
    ) -> Result<Value, TransportError> {
        let req = JsonRpcRequest::new(self.req_id.fetch_add(1, Ordering::Relaxed), method, params);
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(WsCommand::Send {
                req,
                tx,
                subscription,
            })
            .map_err(|_| TransportError::WebSocket("WS task closed".into()))?;
        let resp = rx
            .await
            .map_err(|_| TransportError::WebSocket("WS response dropped".into()))??;
        resp.into_result().map_err(TransportError::Rpc)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(WsCommand::Close);
    }
}

/// Background task that owns the WebSocket connection.
async fn ws_task(
    url: String,
    mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>,
    epoch: watch::Sender<u64>,
    config: WsConfig,
) {
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let subscriptions = SubscriptionManager::new();
    let mut backoff = config.reconnect_initial;

    loop {
        tracing::info!(url = %url, "connecting via WebSocket");

        let (ws_stream, _) = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "WS connect failed, retrying in {backoff:?}");
                if !wait_backoff(&mut cmd_rx, backoff).await {
                    return;
                }
                backoff = (backoff * 2).min(config.reconnect_max);
                continue;
            }
        };

        backoff = config.reconnect_initial;
        let (mut sink, mut stream) = ws_stream.split();
        epoch.send_modify(|e| *e += 1);
        tracing::info!(url = %url, epoch = *epoch.borrow(), "WS connected");

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        None | Some(WsCommand::Close) => {
                            let _ = sink.send(Message::Close(None)).await;
                            return;
                        }
                        Some(WsCommand::Send { req, tx, subscription }) => {
                            let id = match &req.id { RpcId::Number(n) => *n, _ => continue };
                            let msg = match serde_json::to_string(&req) {
                                Ok(msg) => msg,
                                Err(e) => {
                                    let _ = tx.send(Err(e.into()));
                                    continue;
                                }
                            };
                            pending.lock().unwrap().insert(id, Pending { tx, subscription });
                            if sink.send(Message::Text(msg.into())).await.is_err() {
                                // connection dropped, reconnect
                                break;
                            }
                        }
                    }
                }
                msg = stream.next() => {
                    match msg {
                        None => break,
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "WS receive error");
                            break;
                        }
                        Some(Ok(Message::Text(text))) => {
                            handle_message(text.as_str(), &pending, &subscriptions);
                        }
                        Some(Ok(Message::Close(_))) => break,
                        _ => {}
                    }
                }
            }
        }

        let failed: Vec<Pending> = pending.lock().unwrap().drain().map(|(_, p)| p).collect();
        for p in failed {
            let _ = p
                .tx
                .send(Err(TransportError::WebSocket("connection lost".into())));
        }
        subscriptions.clear();

        tracing::warn!(url = %url, "WS disconnected, reconnecting in {backoff:?}");
        if !wait_backoff(&mut cmd_rx, backoff).await {
            return;
        }
        backoff = (backoff * 2).min(config.reconnect_max);
    }
}

/// Sleep out the backoff while failing requests fast. Returns `false` once the
/// transport has been dropped.
async fn wait_backoff(cmd_rx: &mut mpsc::UnboundedReceiver<WsCommand>, backoff: Duration) -> bool {
    let sleep = time::sleep(backoff);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = cmd_rx.recv() => match cmd {
                None | Some(WsCommand::Close) => return false,
                Some(WsCommand::Send { tx, .. }) => {
                    let _ = tx.send(Err(TransportError::WebSocket("not connected".into())));
                }
            },
        }
    }
}

fn handle_message(text: &str, pending: &PendingMap, subscriptions: &SubscriptionManager) {
    let Ok(val) = serde_json::from_str::<Value>(text) else {
        tracing::debug!("failed to parse WS message as JSON");
        return;
    };

    if val.get("method").and_then(|m| m.as_str()) == Some("eth_subscription") {
        if let Some(id) = val["params"]["subscription"].as_str() {
            subscriptions.dispatch(
                &SubscriptionId(id.to_string()),
                val["params"]["result"].clone(),
            );
        }
        return;
    }

    let Ok(resp) = serde_json::from_value::<JsonRpcResponse>(val) else {
        tracing::debug!("ignoring non-response WS message");
        return;
    };
    let id = match &resp.id {
        RpcId::Number(n) => *n,
        _ => return,
    };
    let Some(p) = pending.lock().unwrap().remove(&id) else {
        return;
    };

    // Register before the caller sees the id so no notification is missed.
    if let (Some(sender), Some(Value::String(sub_id))) = (p.subscription, resp.result.as_ref()) {
        subscriptions.register(SubscriptionId(sub_id.clone()), sender);
    }
    let _ = p.tx.send(Ok(resp));
}
