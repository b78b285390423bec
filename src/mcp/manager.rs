//! Multi-server connection manager
//!
//! [`McpClientManager`] owns one live session per configured server. A call
//! to [`McpClientManager::connect_to_servers`] replaces the whole connection
//! set: every enabled descriptor gets its own task on a [`JoinSet`], so a
//! hanging server only ever costs its own `init_timeout`. Tools are exposed
//! under `<server>.<tool>` and [`McpClientManager::call_tool`] is total: it
//! always returns a [`ToolOutcome`].
//!
//! Each connect call bumps a generation counter. Results from tasks spawned
//! by a superseded call are discarded, and their sessions torn down.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ToolbridgeError};
use crate::mcp::client::wire_transport;
use crate::mcp::config::{
    check_server_name, qualify, split_qualified, ClientOptions, ConnectionState,
    ConnectionStatus, DuplicatePolicy, ServerDescriptor, ToolDescriptor,
};
use crate::mcp::outcome::ToolOutcome;
use crate::mcp::protocol::{Handshake, ServerSession};
use crate::mcp::transport;
use crate::mcp::types::{Implementation, McpTool, NOTIF_TOOLS_LIST_CHANGED};

/// A live connection. Dropping the last handle stops its pump tasks, which
/// in turn drops the transport (SIGTERM for children, DELETE for HTTP
/// sessions).
struct Session {
    protocol: ServerSession,
    cancel: CancellationToken,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Default)]
struct Registry {
    generation: u64,
    order: Vec<String>,
    states: HashMap<String, ConnectionState>,
    sessions: HashMap<String, Arc<Session>>,
}

impl Registry {
    /// Apply `update` to `name`'s state if `generation` is still current.
    fn update(
        &mut self,
        generation: u64,
        name: &str,
        update: impl FnOnce(&mut ConnectionState),
    ) -> bool {
        if self.generation != generation {
            return false;
        }
        match self.states.get_mut(name) {
            Some(state) => {
                update(state);
                state.updated_at = chrono::Utc::now();
                true
            }
            None => false,
        }
    }
}

/// Fan-out client over many tool servers.
///
/// # Examples
///
/// ```no_run
/// use toolbridge::mcp::config::{ClientOptions, ServerDescriptor};
/// use toolbridge::mcp::manager::McpClientManager;
///
/// # #[tokio::main]
/// # async fn main() {
/// let manager = McpClientManager::new(ClientOptions::default());
/// manager
///     .connect_to_servers(vec![ServerDescriptor::local("alpha", "echo-tool", vec![])])
///     .await;
///
/// let outcome = manager
///     .call_tool("alpha.echo", serde_json::json!({ "text": "hi" }))
///     .await;
/// println!("{}", outcome.text());
/// # }
/// ```
pub struct McpClientManager {
    options: ClientOptions,
    client_info: Implementation,
    registry: Arc<RwLock<Registry>>,
}

impl std::fmt::Debug for McpClientManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClientManager")
            .field("options", &self.options)
            .field("client_info", &self.client_info)
            .finish_non_exhaustive()
    }
}

impl McpClientManager {
    /// Create a manager with no connections.
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            client_info: Implementation::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            registry: Arc::new(RwLock::new(Registry::default())),
        }
    }

    /// Override the identity sent in `initialize`.
    pub fn with_client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_info = Implementation::new(name, version);
        self
    }

    /// The options this manager was built with.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Replace the connection set with `descriptors`.
    ///
    /// Returns once every enabled descriptor has settled as `Connected` or
    /// `Failed`. Connection failures are recorded in each server's state and
    /// never returned.
    pub async fn connect_to_servers(&self, descriptors: Vec<ServerDescriptor>) {
        let descriptors = dedupe(admissible(descriptors), self.options.duplicate_names);

        let (generation, retired) = {
            let mut registry = self.registry.write().await;
            registry.generation += 1;
            registry.order = descriptors.iter().map(|d| d.name.clone()).collect();
            registry.states = descriptors
                .iter()
                .map(|d| {
                    let status = if d.disabled {
                        ConnectionStatus::Disabled
                    } else {
                        ConnectionStatus::Pending
                    };
                    (d.name.clone(), ConnectionState::new(&d.name, status))
                })
                .collect();
            let retired = std::mem::take(&mut registry.sessions);
            (registry.generation, retired)
        };
        if !retired.is_empty() {
            tracing::info!(count = retired.len(), "tearing down previous connections");
        }
        drop(retired);

        let mut attempts = JoinSet::new();
        for descriptor in descriptors {
            if descriptor.disabled {
                tracing::info!(server = %descriptor.name, "server disabled; not connecting");
                continue;
            }
            attempts.spawn(connect_one(
                Arc::clone(&self.registry),
                generation,
                descriptor,
                self.options.clone(),
                self.client_info.clone(),
            ));
        }

        while let Some(joined) = attempts.join_next().await {
            if let Err(e) = joined {
                tracing::error!("connection task ended abnormally: {e}");
            }
        }

        // A task that panicked leaves its state unsettled.
        let mut registry = self.registry.write().await;
        if registry.generation == generation {
            for state in registry.states.values_mut() {
                if matches!(
                    state.status,
                    ConnectionStatus::Pending | ConnectionStatus::Connecting
                ) {
                    state.status = ConnectionStatus::Failed;
                    state.last_error = Some("connection task ended unexpectedly".to_string());
                    state.updated_at = chrono::Utc::now();
                }
            }
        }
    }

    /// Snapshot of every server's state, in descriptor order.
    pub async fn get_servers_status(&self) -> Vec<ConnectionState> {
        let registry = self.registry.read().await;
        registry
            .order
            .iter()
            .filter_map(|name| registry.states.get(name))
            .cloned()
            .collect()
    }

    /// Every tool of every `Connected` server.
    pub async fn get_tools(&self) -> Vec<ToolDescriptor> {
        let registry = self.registry.read().await;
        registry
            .order
            .iter()
            .filter_map(|name| registry.states.get(name))
            .filter(|state| state.status == ConnectionStatus::Connected)
            .flat_map(|state| state.tools.iter().cloned())
            .collect()
    }

    /// Whether `qualified_name` is currently callable.
    pub async fn has_tool(&self, qualified_name: &str) -> bool {
        self.get_tools()
            .await
            .iter()
            .any(|tool| tool.qualified_name == qualified_name)
    }

    /// Names of the servers in the current connection set.
    pub async fn server_names(&self) -> Vec<String> {
        self.registry.read().await.order.clone()
    }

    /// Invoke `<server>.<tool>` with `arguments`.
    ///
    /// Never fails: unknown names, disconnected servers, timeouts and
    /// transport faults all come back as [`ToolOutcome::Error`]. The error's
    /// chat id is taken from `arguments.chat_id` when present.
    pub async fn call_tool(&self, qualified_name: &str, arguments: serde_json::Value) -> ToolOutcome {
        let chat_id = arguments
            .get("chat_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let (session, tool_name) = match self.resolve(qualified_name).await {
            Ok(found) => found,
            Err(e) => {
                tracing::debug!(tool = %qualified_name, "call rejected: {e}");
                return ToolOutcome::error(e.to_string(), chat_id);
            }
        };

        let started = std::time::Instant::now();
        let result = session
            .protocol
            .call_tool(&tool_name, Some(arguments), Some(self.options.tool_timeout))
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                tracing::debug!(tool = %qualified_name, elapsed_ms, "tool call finished");
                ToolOutcome::from_call_result(response)
            }
            Err(e) => {
                tracing::warn!(tool = %qualified_name, elapsed_ms, "tool call failed: {e:#}");
                ToolOutcome::error(format!("tool call `{qualified_name}` failed: {e:#}"), chat_id)
            }
        }
    }

    async fn resolve(&self, qualified_name: &str) -> Result<(Arc<Session>, String)> {
        let (server, tool) = split_qualified(qualified_name).ok_or_else(|| {
            ToolbridgeError::NotFound(format!(
                "`{qualified_name}` is not a qualified tool name (expected <server>.<tool>)"
            ))
        })?;

        let registry = self.registry.read().await;
        let state = registry
            .states
            .get(server)
            .ok_or_else(|| ToolbridgeError::NotFound(format!("unknown server `{server}`")))?;
        if state.status != ConnectionStatus::Connected {
            return Err(ToolbridgeError::NotFound(format!(
                "server `{server}` is not connected (status: {})",
                state.status
            ))
            .into());
        }
        if !state.tools.iter().any(|t| t.tool_name == tool) {
            return Err(ToolbridgeError::NotFound(format!(
                "unknown tool `{tool}` on server `{server}`"
            ))
            .into());
        }
        let session = registry.sessions.get(server).cloned().ok_or_else(|| {
            ToolbridgeError::NotFound(format!("server `{server}` has no live session"))
        })?;
        Ok((session, tool.to_string()))
    }

    /// Tear down every connection and forget all state.
    pub async fn shutdown(&self) {
        let retired = {
            let mut registry = self.registry.write().await;
            registry.generation += 1;
            registry.order.clear();
            registry.states.clear();
            std::mem::take(&mut registry.sessions)
        };
        tracing::info!(count = retired.len(), "client manager shut down");
    }
}

/// Drop descriptors whose names would make qualified tool names ambiguous.
fn admissible(descriptors: Vec<ServerDescriptor>) -> Vec<ServerDescriptor> {
    descriptors
        .into_iter()
        .filter(|descriptor| match check_server_name(&descriptor.name) {
            Ok(()) => true,
            Err(reason) => {
                tracing::warn!(server = %descriptor.name, "skipping server: {reason}");
                false
            }
        })
        .collect()
}

/// Resolve duplicate names according to `policy`, preserving first positions.
fn dedupe(descriptors: Vec<ServerDescriptor>, policy: DuplicatePolicy) -> Vec<ServerDescriptor> {
    let mut kept: Vec<ServerDescriptor> = Vec::with_capacity(descriptors.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for descriptor in descriptors {
        match index.get(&descriptor.name) {
            None => {
                index.insert(descriptor.name.clone(), kept.len());
                kept.push(descriptor);
            }
            Some(&at) => match policy {
                DuplicatePolicy::Skip => {
                    tracing::warn!(server = %descriptor.name, "duplicate server name; skipping later descriptor");
                }
                DuplicatePolicy::Overwrite => {
                    tracing::warn!(server = %descriptor.name, "duplicate server name; later descriptor replaces earlier");
                    kept[at] = descriptor;
                }
            },
        }
    }
    kept
}

fn describe_tools(server: &str, tools: Vec<McpTool>) -> Vec<ToolDescriptor> {
    tools
        .into_iter()
        .map(|tool| ToolDescriptor {
            qualified_name: qualify(server, &tool.name),
            server_name: server.to_string(),
            tool_name: tool.name,
            description: tool.description,
            schema: tool.input_schema,
        })
        .collect()
}

/// One connection attempt, reported into `registry` under `generation`.
async fn connect_one(
    registry: Arc<RwLock<Registry>>,
    generation: u64,
    descriptor: ServerDescriptor,
    options: ClientOptions,
    client_info: Implementation,
) {
    let name = descriptor.name.clone();
    if !registry.write().await.update(generation, &name, |s| {
        s.status = ConnectionStatus::Connecting;
    }) {
        return;
    }
    tracing::debug!(server = %name, "connecting");

    let cancel = CancellationToken::new();
    // Cancels the session's tasks unless disarmed on success, including when
    // the timeout below drops the attempt mid-handshake.
    let guard = cancel.clone().drop_guard();

    let attempt = tokio::time::timeout(
        options.init_timeout,
        establish(&descriptor, &options, client_info, cancel.clone()),
    )
    .await;

    let outcome = match attempt {
        Ok(Ok((protocol, tools))) => Ok((protocol, tools)),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(_) => Err(format!(
            "timed out after {}s while connecting",
            options.init_timeout.as_secs_f64()
        )),
    };

    let mut reg = registry.write().await;
    match outcome {
        Ok((protocol, tools)) => {
            let descriptors = describe_tools(&name, tools);
            let count = descriptors.len();
            let accepted = reg.update(generation, &name, |s| {
                s.status = ConnectionStatus::Connected;
                s.last_error = None;
                s.tools = descriptors;
            });
            if accepted {
                guard.disarm();
                if protocol.announces_tool_changes() {
                    spawn_refresher(
                        Arc::downgrade(&registry),
                        generation,
                        name.clone(),
                        protocol.clone(),
                        options.init_timeout,
                        cancel.clone(),
                    );
                }
                reg.sessions
                    .insert(name.clone(), Arc::new(Session { protocol, cancel }));
                tracing::info!(server = %name, tools = count, "connected");
            } else {
                tracing::debug!(server = %name, "connection superseded; discarding");
            }
        }
        Err(reason) => {
            tracing::warn!(server = %name, "connection failed: {reason}");
            reg.update(generation, &name, |s| {
                s.status = ConnectionStatus::Failed;
                s.last_error = Some(reason);
                s.tools.clear();
            });
        }
    }
}

/// Open the transport, run the handshake and list tools.
async fn establish(
    descriptor: &ServerDescriptor,
    options: &ClientOptions,
    client_info: Implementation,
    cancel: CancellationToken,
) -> Result<(ServerSession, Vec<McpTool>)> {
    let request_timeout = options.init_timeout.max(options.tool_timeout);
    let transport = transport::connect(descriptor, request_timeout)?;
    let client = wire_transport(transport, cancel)?;

    let protocol = Handshake::new(client)
        .initialize(client_info, Some(options.init_timeout))
        .await?;
    tracing::debug!(
        server = %descriptor.name,
        remote = %protocol.server_name(),
        version = %protocol.protocol_version(),
        "handshake complete"
    );

    if !protocol.advertises_tools() {
        tracing::warn!(server = %descriptor.name, "server does not declare the tools capability");
        return Ok((protocol, Vec::new()));
    }
    let tools = protocol.list_tools(Some(options.init_timeout)).await?;
    Ok((protocol, tools))
}

/// Re-list a server's tools whenever it announces a catalog change.
fn spawn_refresher(
    registry: Weak<RwLock<Registry>>,
    generation: u64,
    name: String,
    protocol: ServerSession,
    timeout: Duration,
    cancel: CancellationToken,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();
    protocol.client().on_notification(NOTIF_TOOLS_LIST_CHANGED, move |_params| {
        let _ = tx.send(());
    });

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                signal = rx.recv() => {
                    if signal.is_none() {
                        break;
                    }
                }
            }
            let tools = match protocol.list_tools(Some(timeout)).await {
                Ok(tools) => describe_tools(&name, tools),
                Err(e) => {
                    tracing::warn!(server = %name, "tool refresh failed: {e:#}");
                    continue;
                }
            };
            let Some(registry) = registry.upgrade() else { break };
            let count = tools.len();
            let applied = registry.write().await.update(generation, &name, |s| {
                if s.status == ConnectionStatus::Connected {
                    s.tools = tools;
                }
            });
            if !applied {
                break;
            }
            tracing::info!(server = %name, tools = count, "tool catalog refreshed");
        }
    });
}
