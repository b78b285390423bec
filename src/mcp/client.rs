//! JSON-RPC client side of one server connection
//!
//! [`JsonRpcClient`] turns requests into serialized messages on an outbound
//! channel and matches replies coming back through [`start_read_loop`] by
//! id. It knows nothing about framing; [`wire_transport`] connects both
//! channels to a [`Transport`].
//!
//! Each in-flight request owns a slot in the pending map for exactly as long
//! as its future lives, so timeouts and abandoned calls never leave entries
//! behind. Replies that arrive after their caller gave up are dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ToolbridgeError};
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR, METHOD_NOT_FOUND,
};

/// Applied when a caller passes no timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type Reply = std::result::Result<serde_json::Value, JsonRpcError>;
type NotificationHandler = Box<dyn Fn(serde_json::Value) + Send + Sync>;

/// Request/response correlation for one server.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
/// use toolbridge::mcp::client::{start_read_loop, JsonRpcClient};
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let (out_tx, _out_rx) = mpsc::unbounded_channel::<String>();
/// let (_in_tx, in_rx) = mpsc::unbounded_channel::<String>();
/// let client = Arc::new(JsonRpcClient::new("alpha", out_tx));
/// start_read_loop(in_rx, CancellationToken::new(), Arc::clone(&client));
/// # Ok(())
/// # }
/// ```
pub struct JsonRpcClient {
    server: String,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    outbound_tx: mpsc::UnboundedSender<String>,
    notification_handlers: Mutex<HashMap<String, NotificationHandler>>,
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("server", &self.server)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

/// Removes a request's pending entry when the request future goes away.
struct PendingSlot<'a> {
    client: &'a JsonRpcClient,
    id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.client.pending().remove(&self.id);
    }
}

impl JsonRpcClient {
    /// A client for `server` that writes serialized messages to
    /// `outbound_tx`. `server` names the peer in errors.
    pub fn new(server: impl Into<String>, outbound_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            server: server.into(),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            outbound_tx,
            notification_handlers: Mutex::new(HashMap::new()),
        }
    }

    /// The server this client talks to.
    pub fn server(&self) -> &str {
        &self.server
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Reply>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn closed(&self) -> anyhow::Error {
        ToolbridgeError::McpTransport(format!("connection to `{}` is closed", self.server)).into()
    }

    /// Send `method` and wait for its typed result.
    ///
    /// # Errors
    ///
    /// - [`ToolbridgeError::McpTimeout`] when no reply arrives in time.
    /// - [`ToolbridgeError::Mcp`] when the server answers with an error.
    /// - [`ToolbridgeError::McpTransport`] when the connection is gone.
    /// - [`ToolbridgeError::Serialization`] when the result has the wrong shape.
    pub async fn request<P, R>(&self, method: &str, params: P, timeout: Option<Duration>) -> Result<R>
    where
        P: serde::Serialize + Send,
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let message =
            serde_json::to_string(&JsonRpcRequest::call(id, method, serde_json::to_value(params)?))?;

        let (tx, rx) = oneshot::channel();
        self.pending().insert(id, tx);
        let _slot = PendingSlot { client: self, id };

        self.outbound_tx.send(message).map_err(|_| self.closed())?;

        let reply = match tokio::time::timeout(timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT), rx).await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(self.closed()),
            Err(_) => {
                return Err(ToolbridgeError::McpTimeout {
                    server: self.server.clone(),
                    method: method.to_string(),
                }
                .into())
            }
        };
        let value = reply.map_err(|e| ToolbridgeError::Mcp(e.message))?;
        Ok(serde_json::from_value(value)?)
    }

    /// Send a notification; nothing comes back.
    ///
    /// # Errors
    ///
    /// Fails when the connection is gone.
    pub fn notify<P: serde::Serialize>(&self, method: &str, params: P) -> Result<()> {
        let message = serde_json::to_string(&JsonRpcRequest::notification(
            method,
            serde_json::to_value(params)?,
        ))?;
        self.outbound_tx.send(message).map_err(|_| self.closed())
    }

    /// Run `f` with the params of every `method` notification. A later
    /// registration for the same method replaces the earlier one.
    pub fn on_notification(
        &self,
        method: impl Into<String>,
        f: impl Fn(serde_json::Value) + Send + Sync + 'static,
    ) {
        self.notification_handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(method.into(), Box::new(f));
    }

    /// Fail the request carried by `raw` now, because the transport could
    /// not deliver it. Notifications are ignored.
    pub fn fail_request(&self, raw: &str, reason: String) {
        let Some(id) = serde_json::from_str::<Incoming>(raw)
            .ok()
            .and_then(|m| m.id.as_ref().and_then(numeric_id))
        else {
            return;
        };
        if let Some(tx) = self.pending().remove(&id) {
            let _ = tx.send(Err(JsonRpcError {
                code: INTERNAL_ERROR,
                message: reason,
                data: None,
            }));
        }
    }

    /// Requests still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    fn resolve(&self, id: u64, reply: Reply) {
        match self.pending().remove(&id) {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => tracing::debug!(server = %self.server, id, "reply for no pending request"),
        }
    }

    fn notified(&self, method: &str, params: serde_json::Value) {
        let handlers = self
            .notification_handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match handlers.get(method) {
            Some(handler) => handler(params),
            None => tracing::debug!(server = %self.server, method, "unhandled notification"),
        }
    }

    /// Servers get no service from this side of the connection.
    fn refuse(&self, id: serde_json::Value, method: &str) {
        let reply =
            JsonRpcResponse::failure(id, METHOD_NOT_FOUND, format!("Method not found: {method}"));
        if let Ok(raw) = serde_json::to_string(&reply) {
            let _ = self.outbound_tx.send(raw);
        }
    }
}

/// Any inbound message, before it is classified.
#[derive(Debug, Deserialize)]
struct Incoming {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<serde_json::Value>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

fn numeric_id(id: &serde_json::Value) -> Option<u64> {
    id.as_u64()
        .or_else(|| id.as_str().and_then(|s| s.parse().ok()))
}

/// Route one inbound message to its pending request, its notification
/// handler, or a `Method not found` reply.
fn dispatch(raw: &str, client: &JsonRpcClient) {
    let message: Incoming = match serde_json::from_str(raw) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(server = %client.server, "dropping unparsable message: {e}");
            return;
        }
    };
    let id = message.id.filter(|id| !id.is_null());

    match (id, message.method) {
        (Some(id), Some(method)) => client.refuse(id, &method),
        (None, Some(method)) => {
            client.notified(&method, message.params.unwrap_or(serde_json::Value::Null))
        }
        (Some(id), None) => {
            let Some(id) = numeric_id(&id) else {
                tracing::warn!(server = %client.server, %id, "reply with a foreign id");
                return;
            };
            let reply = match message.error {
                Some(error) => Err(serde_json::from_value(error.clone()).unwrap_or_else(|_| {
                    JsonRpcError {
                        code: INTERNAL_ERROR,
                        message: format!("malformed error object: {error}"),
                        data: None,
                    }
                })),
                None => Ok(message.result.unwrap_or(serde_json::Value::Null)),
            };
            client.resolve(id, reply);
        }
        (None, None) => tracing::debug!(server = %client.server, "ignoring message without id or method"),
    }
}

/// Feed `inbound_rx` into `client` until it closes or `cancellation`
/// fires. Requests still pending at that point fail immediately.
pub fn start_read_loop(
    mut inbound_rx: mpsc::UnboundedReceiver<String>,
    cancellation: CancellationToken,
    client: Arc<JsonRpcClient>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => break,
                raw = inbound_rx.recv() => match raw {
                    Some(raw) => dispatch(&raw, &client),
                    None => break,
                },
            }
        }
        client.pending().clear();
    })
}

/// Connect a [`JsonRpcClient`] to a [`Transport`].
///
/// Spawns two pumps (outbound channel to [`Transport::send`], inbound stream
/// to the read loop) plus the read loop itself. All of them stop when
/// `cancellation` fires; the transport is dropped once the last pump exits.
/// A failed send fails the request it carried right away.
///
/// # Errors
///
/// Fails if the transport's inbound stream was already taken.
pub fn wire_transport(
    transport: Arc<dyn Transport>,
    cancellation: CancellationToken,
) -> Result<Arc<JsonRpcClient>> {
    let server = transport.server().to_string();
    let mut inbound = transport.take_inbound()?;
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
    let client = Arc::new(JsonRpcClient::new(server.clone(), outbound_tx));

    let writer_client = Arc::clone(&client);
    let writer_cancel = cancellation.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => break,
                maybe_msg = outbound_rx.recv() => {
                    let Some(msg) = maybe_msg else { break };
                    if let Err(e) = transport.send(msg.clone()).await {
                        tracing::warn!(server = %server, "transport send failed: {e:#}");
                        writer_client.fail_request(&msg, format!("transport send failed: {e:#}"));
                    }
                }
            }
        }
    });

    let reader_cancel = cancellation.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = reader_cancel.cancelled() => break,
                maybe_msg = inbound.next() => {
                    let Some(msg) = maybe_msg else { break };
                    if inbound_tx.send(msg).is_err() {
                        break;
                    }
                }
            }
        }
    });

    start_read_loop(inbound_rx, cancellation, Arc::clone(&client));
    Ok(client)
}
