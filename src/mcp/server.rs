//! Tool server: handler registry and JSON-RPC dispatch
//!
//! [`ToolServer`] exposes two fixed entry points backed by pluggable
//! handlers (`process_message` and `finish_chat`) plus an open-ended set of
//! named [`ServerTool`]s. Every invocation is guarded: an `Err` or a panic
//! inside a handler becomes a [`ToolOutcome::Error`] instead of reaching the
//! serving loop.
//!
//! The server performs no I/O itself. [`ToolServer::get_transport_instance`]
//! returns an [`McpEndpoint`], which serves newline-delimited JSON-RPC over
//! any async reader/writer pair (process stdio in production) and is also
//! the single-message entry used by the HTTP listener.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::mcp::outcome::ToolOutcome;
use crate::mcp::types::{
    CallToolParams, Implementation, InitializeParams, InitializeResponse, JsonRpcRequest,
    JsonRpcResponse, ListToolsResponse, McpTool, ServerCapabilities, ToolsCapability, INTERNAL_ERROR,
    INVALID_PARAMS, INVALID_REQUEST, LATEST_PROTOCOL_VERSION, METHOD_INITIALIZE, METHOD_NOT_FOUND,
    METHOD_PING, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, PARSE_ERROR, SUPPORTED_PROTOCOL_VERSIONS,
};

/// Tool name of the message entry point.
pub const PROCESS_MESSAGE_TOOL: &str = "process_message";

/// Tool name of the finish-chat entry point.
pub const FINISH_CHAT_TOOL: &str = "finish_chat";

/// Future returned by every registered handler.
pub type HandlerFuture = BoxFuture<'static, Result<ToolOutcome>>;

type MessageHandlerFn = dyn Fn(MessageRequest) -> HandlerFuture + Send + Sync;
type FinishChatHandlerFn = dyn Fn(String) -> HandlerFuture + Send + Sync;
type ToolFn = dyn Fn(serde_json::Value) -> HandlerFuture + Send + Sync;

/// Arguments of the `process_message` entry point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageRequest {
    /// The chat turn.
    pub message: String,
    /// Opaque attachments passed through to the handler.
    #[serde(default)]
    pub attachments: Vec<serde_json::Value>,
    /// Existing chat, or `None` to request a new one.
    #[serde(default)]
    pub chat_id: Option<String>,
    /// Whether the handler should keep the chat after this turn.
    #[serde(default)]
    pub persistent_chat: bool,
}

impl MessageRequest {
    /// A request that starts a new, non-persistent chat.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Continue an existing chat.
    pub fn with_chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    fn correlation_id(&self) -> String {
        self.chat_id.clone().unwrap_or_default()
    }
}

/// A named tool registered on a [`ToolServer`].
#[derive(Clone)]
pub struct ServerTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
    handler: Arc<ToolFn>,
}

impl std::fmt::Debug for ServerTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl ServerTool {
    /// Wrap an async callable as a tool.
    ///
    /// # Examples
    ///
    /// ```
    /// use toolbridge::mcp::outcome::ToolOutcome;
    /// use toolbridge::mcp::server::ServerTool;
    ///
    /// let echo = ServerTool::new(
    ///     "echo",
    ///     "Echo the `text` argument",
    ///     serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}}),
    ///     |args| async move {
    ///         let text = args["text"].as_str().unwrap_or_default().to_string();
    ///         Ok(ToolOutcome::response(text, ""))
    ///     },
    /// );
    /// assert_eq!(echo.name(), "echo");
    /// ```
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
        f: F,
    ) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutcome>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler: Arc::new(move |args: serde_json::Value| -> HandlerFuture {
                Box::pin(f(args))
            }),
        }
    }

    /// The tool's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The catalog entry advertised in `tools/list`.
    pub fn descriptor(&self) -> McpTool {
        McpTool {
            name: self.name.clone(),
            description: Some(self.description.clone()),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// Registry of entry-point handlers and named tools.
pub struct ToolServer {
    name: String,
    version: String,
    message_handler: RwLock<Option<Arc<MessageHandlerFn>>>,
    finish_chat_handler: RwLock<Option<Arc<FinishChatHandlerFn>>>,
    tools: RwLock<BTreeMap<String, ServerTool>>,
}

impl std::fmt::Debug for ToolServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolServer")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("tools", &read(&self.tools).keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ToolServer {
    /// Create an empty server advertising `name` as its identity.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            message_handler: RwLock::new(None),
            finish_chat_handler: RwLock::new(None),
            tools: RwLock::new(BTreeMap::new()),
        }
    }

    /// Override the version reported during `initialize`.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// The server (application) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Install the `process_message` handler, replacing any previous one.
    pub fn register_message_handler<F, Fut>(&self, f: F)
    where
        F: Fn(MessageRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutcome>> + Send + 'static,
    {
        let handler: Arc<MessageHandlerFn> =
            Arc::new(move |req: MessageRequest| -> HandlerFuture { Box::pin(f(req)) });
        if write(&self.message_handler).replace(handler).is_some() {
            tracing::debug!(server = %self.name, "message handler replaced");
        }
    }

    /// Install the `finish_chat` handler, replacing any previous one.
    pub fn register_finish_chat_handler<F, Fut>(&self, f: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutcome>> + Send + 'static,
    {
        let handler: Arc<FinishChatHandlerFn> =
            Arc::new(move |chat_id: String| -> HandlerFuture { Box::pin(f(chat_id)) });
        if write(&self.finish_chat_handler)
            .replace(handler)
            .is_some()
        {
            tracing::debug!(server = %self.name, "finish_chat handler replaced");
        }
    }

    /// Merge `tools` into the catalog. A later tool with the same name
    /// overwrites the earlier one; entry-point names are reserved.
    pub fn register_tools(&self, tools: Vec<ServerTool>) {
        let mut registry = write(&self.tools);
        for tool in tools {
            if tool.name == PROCESS_MESSAGE_TOOL || tool.name == FINISH_CHAT_TOOL {
                tracing::warn!(
                    server = %self.name,
                    tool = %tool.name,
                    "tool name is reserved for an entry point; skipping"
                );
                continue;
            }
            if registry.insert(tool.name.clone(), tool).is_some() {
                tracing::debug!(server = %self.name, "tool overwritten by later registration");
            }
        }
    }

    /// Invoke the message handler.
    pub async fn process_message(&self, request: MessageRequest) -> ToolOutcome {
        let chat_id = request.correlation_id();
        let handler = read(&self.message_handler).clone();
        let Some(handler) = handler else {
            return ToolOutcome::error("no message handler registered", chat_id);
        };
        guarded(
            PROCESS_MESSAGE_TOOL,
            &chat_id,
            async move { handler(request).await },
        )
        .await
    }

    /// Invoke the finish-chat handler.
    pub async fn finish_chat(&self, chat_id: &str) -> ToolOutcome {
        let handler = read(&self.finish_chat_handler).clone();
        let Some(handler) = handler else {
            return ToolOutcome::error("no finish_chat handler registered", chat_id);
        };
        let owned = chat_id.to_string();
        guarded(FINISH_CHAT_TOOL, chat_id, async move { handler(owned).await }).await
    }

    /// Invoke an entry point or a registered tool by name.
    pub async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> ToolOutcome {
        let chat_id = arguments
            .get("chat_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        match name {
            PROCESS_MESSAGE_TOOL => match serde_json::from_value::<MessageRequest>(arguments) {
                Ok(request) => self.process_message(request).await,
                Err(e) => ToolOutcome::error(
                    format!("invalid arguments for {PROCESS_MESSAGE_TOOL}: {e}"),
                    chat_id,
                ),
            },
            FINISH_CHAT_TOOL => {
                if chat_id.is_empty() {
                    return ToolOutcome::error(
                        format!("{FINISH_CHAT_TOOL} requires a non-empty `chat_id`"),
                        "",
                    );
                }
                self.finish_chat(&chat_id).await
            }
            _ => {
                let tool = read(&self.tools).get(name).cloned();
                match tool {
                    Some(tool) => {
                        let handler = Arc::clone(&tool.handler);
                        guarded(name, &chat_id, async move { handler(arguments).await }).await
                    }
                    None => ToolOutcome::error(format!("unknown tool: {name}"), chat_id),
                }
            }
        }
    }

    /// The catalog: entry points with a registered handler, then tools by name.
    pub fn list_tools(&self) -> Vec<McpTool> {
        let mut tools = Vec::new();
        if read(&self.message_handler).is_some() {
            tools.push(McpTool {
                name: PROCESS_MESSAGE_TOOL.to_string(),
                description: Some("Send a chat message to the application".to_string()),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "message": { "type": "string" },
                        "attachments": { "type": "array" },
                        "chat_id": { "type": ["string", "null"] },
                        "persistent_chat": { "type": "boolean" }
                    },
                    "required": ["message"]
                }),
            });
        }
        if read(&self.finish_chat_handler).is_some() {
            tools.push(McpTool {
                name: FINISH_CHAT_TOOL.to_string(),
                description: Some("Close a chat".to_string()),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": { "chat_id": { "type": "string" } },
                    "required": ["chat_id"]
                }),
            });
        }
        tools.extend(read(&self.tools).values().map(ServerTool::descriptor));
        tools
    }

    /// Handle one serialized JSON-RPC message.
    ///
    /// Returns the serialized response, or `None` for notifications.
    pub async fn handle_message(&self, raw: &str) -> Option<String> {
        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                return Some(encode(JsonRpcResponse::failure(
                    serde_json::Value::Null,
                    PARSE_ERROR,
                    format!("Parse error: {e}"),
                )))
            }
        };
        let id_hint = value.get("id").cloned().unwrap_or(serde_json::Value::Null);

        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                return Some(encode(JsonRpcResponse::failure(
                    id_hint,
                    INVALID_REQUEST,
                    format!("Invalid Request: {e}"),
                )))
            }
        };
        if request.jsonrpc != "2.0" {
            return Some(encode(JsonRpcResponse::failure(
                id_hint,
                INVALID_REQUEST,
                "Invalid Request: jsonrpc must be \"2.0\"",
            )));
        }

        let Some(id) = request.id else {
            tracing::debug!(server = %self.name, method = %request.method, "notification received");
            return None;
        };

        let response = match self.dispatch(&request.method, request.params).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err((code, message)) => JsonRpcResponse::failure(id, code, message),
        };
        Some(encode(response))
    }

    async fn dispatch(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> std::result::Result<serde_json::Value, (i64, String)> {
        match method {
            METHOD_INITIALIZE => {
                let requested = params
                    .and_then(|p| serde_json::from_value::<InitializeParams>(p).ok())
                    .map(|p| p.protocol_version);
                let protocol_version = match requested {
                    Some(v) if SUPPORTED_PROTOCOL_VERSIONS.contains(&v.as_str()) => v,
                    _ => LATEST_PROTOCOL_VERSION.to_string(),
                };
                to_result(&InitializeResponse {
                    protocol_version,
                    capabilities: ServerCapabilities {
                        tools: Some(ToolsCapability::default()),
                    },
                    server_info: Implementation::new(&self.name, &self.version),
                })
            }
            METHOD_PING => Ok(serde_json::json!({})),
            METHOD_TOOLS_LIST => to_result(&ListToolsResponse {
                tools: self.list_tools(),
                next_cursor: None,
            }),
            METHOD_TOOLS_CALL => {
                let params = params.ok_or_else(|| {
                    (INVALID_PARAMS, "tools/call requires params".to_string())
                })?;
                let call: CallToolParams = serde_json::from_value(params)
                    .map_err(|e| (INVALID_PARAMS, format!("Invalid params: {e}")))?;
                let arguments = call.arguments.unwrap_or_else(|| serde_json::json!({}));
                let outcome = self.call_tool(&call.name, arguments).await;
                to_result(&outcome.into_call_result())
            }
            other => Err((METHOD_NOT_FOUND, format!("Method not found: {other}"))),
        }
    }

    /// The object that actually serves requests for this server.
    pub fn get_transport_instance(self: &Arc<Self>) -> McpEndpoint {
        McpEndpoint {
            server: Arc::clone(self),
        }
    }
}

fn to_result<T: Serialize>(value: &T) -> std::result::Result<serde_json::Value, (i64, String)> {
    serde_json::to_value(value).map_err(|e| (INTERNAL_ERROR, format!("Internal error: {e}")))
}

fn encode(response: JsonRpcResponse) -> String {
    serde_json::to_string(&response).unwrap_or_else(|e| {
        format!(
            r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":{INTERNAL_ERROR},"message":"failed to encode response: {}"}}}}"#,
            e.to_string().replace('"', "'")
        )
    })
}

/// Run a handler future, converting `Err` and panics into a `ToolError`.
async fn guarded<Fut>(target: &str, chat_id: &str, fut: Fut) -> ToolOutcome
where
    Fut: Future<Output = Result<ToolOutcome>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            tracing::warn!(target_name = %target, "handler failed: {e:#}");
            ToolOutcome::error(format!("{e:#}"), chat_id)
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(target_name = %target, "handler panicked: {message}");
            ToolOutcome::error(format!("{target} panicked: {message}"), chat_id)
        }
    }
}

/// Transport-bound serving handle for a [`ToolServer`].
#[derive(Debug, Clone)]
pub struct McpEndpoint {
    server: Arc<ToolServer>,
}

impl McpEndpoint {
    /// The server this endpoint serves.
    pub fn server(&self) -> &Arc<ToolServer> {
        &self.server
    }

    /// Handle one serialized JSON-RPC message.
    pub async fn handle_message(&self, raw: &str) -> Option<String> {
        self.server.handle_message(raw).await
    }

    /// Serve newline-delimited JSON-RPC on this process's stdin/stdout.
    ///
    /// # Errors
    ///
    /// Returns an error if reading stdin or writing stdout fails.
    pub async fn serve_stdio(&self) -> Result<()> {
        tracing::info!(server = %self.server.name(), "serving on stdio");
        self.serve_lines(
            tokio::io::BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        )
        .await
    }

    /// Serve newline-delimited JSON-RPC over `reader` and `writer` until the
    /// reader reaches end of input and every in-flight request is answered.
    ///
    /// Each request runs on its own task; a single writer task serializes
    /// the replies, so responses may leave in a different order than their
    /// requests arrived.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or writing fails.
    pub async fn serve_lines<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<String>();

        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(reply) = reply_rx.recv().await {
                writer.write_all(reply.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            Ok::<(), std::io::Error>(())
        });

        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let server = Arc::clone(&self.server);
            let reply_tx = reply_tx.clone();
            let message = trimmed.to_string();
            tokio::spawn(async move {
                if let Some(reply) = server.handle_message(&message).await {
                    let _ = reply_tx.send(reply);
                }
            });
        }

        // The writer drains once every request task has dropped its sender.
        drop(reply_tx);
        writer_task.await??;
        tracing::info!(server = %self.server.name(), "input closed; endpoint stopped");
        Ok(())
    }
}
