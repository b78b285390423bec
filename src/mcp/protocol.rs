//! MCP lifecycle on top of a [`JsonRpcClient`]
//!
//! A connection starts as a [`Handshake`]. [`Handshake::initialize`] runs the
//! `initialize` exchange, checks the negotiated revision and sends
//! `notifications/initialized`; what comes back is a [`ServerSession`] that
//! can list and call tools. Neither type owns the transport: wire one with
//! [`crate::mcp::client::wire_transport`] first.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, ToolbridgeError};
use crate::mcp::client::JsonRpcClient;
use crate::mcp::types::{
    CallToolParams, CallToolResponse, Implementation, InitializeParams, InitializeResponse,
    ListToolsParams, ListToolsResponse, McpTool, LATEST_PROTOCOL_VERSION, METHOD_INITIALIZE,
    METHOD_INITIALIZED, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, SUPPORTED_PROTOCOL_VERSIONS,
};

/// Upper bound on `tools/list` pages, so a server that keeps returning a
/// cursor cannot stall a connect forever.
pub const MAX_TOOL_PAGES: usize = 100;

/// A wired connection that has not been initialized yet.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
/// use toolbridge::mcp::client::JsonRpcClient;
/// use toolbridge::mcp::protocol::Handshake;
///
/// let (tx, _rx) = mpsc::unbounded_channel::<String>();
/// let _handshake = Handshake::new(Arc::new(JsonRpcClient::new("alpha", tx)));
/// ```
#[derive(Debug)]
pub struct Handshake {
    client: Arc<JsonRpcClient>,
}

impl Handshake {
    /// The client's read loop must already be running.
    pub fn new(client: Arc<JsonRpcClient>) -> Self {
        Self { client }
    }

    /// Introduce ourselves as `client_info` and wait up to `timeout` for the
    /// server's answer.
    ///
    /// # Errors
    ///
    /// [`ToolbridgeError::McpProtocolVersion`] when the server picks a
    /// revision outside [`SUPPORTED_PROTOCOL_VERSIONS`]; otherwise whatever
    /// [`JsonRpcClient::request`] reports.
    pub async fn initialize(
        self,
        client_info: Implementation,
        timeout: Option<Duration>,
    ) -> Result<ServerSession> {
        let params = InitializeParams {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info,
        };
        let response: InitializeResponse = self
            .client
            .request(METHOD_INITIALIZE, params, timeout)
            .await?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&response.protocol_version.as_str()) {
            return Err(ToolbridgeError::McpProtocolVersion {
                expected: SUPPORTED_PROTOCOL_VERSIONS
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
                got: response.protocol_version,
            }
            .into());
        }

        // A dead channel shows up on the next request anyway.
        if let Err(e) = self.client.notify(METHOD_INITIALIZED, serde_json::json!({})) {
            tracing::debug!(server = %self.client.server(), "initialized notification not sent: {e:#}");
        }

        Ok(ServerSession {
            client: self.client,
            handshake: response,
        })
    }
}

/// An initialized connection.
#[derive(Debug, Clone)]
pub struct ServerSession {
    client: Arc<JsonRpcClient>,
    handshake: InitializeResponse,
}

impl ServerSession {
    pub fn client(&self) -> &Arc<JsonRpcClient> {
        &self.client
    }

    /// Revision agreed during the handshake.
    pub fn protocol_version(&self) -> &str {
        &self.handshake.protocol_version
    }

    /// Name the server reported for itself.
    pub fn server_name(&self) -> &str {
        &self.handshake.server_info.name
    }

    /// The server declared the `tools` capability.
    pub fn advertises_tools(&self) -> bool {
        self.handshake.capabilities.tools.is_some()
    }

    /// The server promised `notifications/tools/listChanged`.
    pub fn announces_tool_changes(&self) -> bool {
        self.handshake
            .capabilities
            .tools
            .is_some_and(|tools| tools.list_changed)
    }

    /// The full catalog, page by page. `timeout` applies to each page.
    ///
    /// # Errors
    ///
    /// Fails if any page fails, or if the server is still paging after
    /// [`MAX_TOOL_PAGES`] pages.
    pub async fn list_tools(&self, timeout: Option<Duration>) -> Result<Vec<McpTool>> {
        let mut tools = Vec::new();
        let mut params = ListToolsParams::default();

        for _ in 0..MAX_TOOL_PAGES {
            let page: ListToolsResponse = self
                .client
                .request(METHOD_TOOLS_LIST, &params, timeout)
                .await?;
            tools.extend(page.tools);

            match page.next_cursor.filter(|cursor| !cursor.is_empty()) {
                Some(cursor) => params.cursor = Some(cursor),
                None => return Ok(tools),
            }
        }

        Err(ToolbridgeError::Mcp(format!(
            "server `{}` returned more than {MAX_TOOL_PAGES} pages of tools",
            self.client.server()
        ))
        .into())
    }

    /// Run `name` with `arguments`.
    ///
    /// # Errors
    ///
    /// Transport failures, timeouts and JSON-RPC errors. A tool that ran and
    /// failed is not an error here; see [`CallToolResponse::is_error`].
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<CallToolResponse> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        self.client.request(METHOD_TOOLS_CALL, params, timeout).await
    }
}
