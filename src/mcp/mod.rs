//! Tool-invocation protocol layer
//!
//! Both sides of an MCP-style JSON-RPC 2.0 tool protocol, revision
//! **2025-11-25**:
//!
//! - the server side exposes a message handler, a finish-chat handler and
//!   custom tools ([`server::ToolServer`]), reachable over stdio or through a
//!   hot-swappable HTTP endpoint ([`proxy::DynamicProxy`],
//!   [`http_server`]);
//! - the client side fans out to many servers at once, local or remote, and
//!   aggregates their tools under qualified names
//!   ([`manager::McpClientManager`]).
//!
//! # Module Layout
//!
//! - `types`       -- protocol types and JSON-RPC primitives
//! - `outcome`     -- the `ToolOutcome` tagged union carried by tool results
//! - `client`      -- transport-agnostic async JSON-RPC 2.0 client
//! - `protocol`    -- handshake and tool calls over `JsonRpcClient`
//! - `transport`   -- `Transport` trait plus stdio and HTTP implementations
//! - `config`      -- server descriptors, client options, connection state
//! - `manager`     -- multi-server connection manager
//! - `server`      -- tool server and its line-delimited endpoint
//! - `proxy`       -- atomically reconfigurable binding for inbound requests
//! - `http_server` -- axum listener in front of the proxy

pub mod client;
pub mod config;
pub mod http_server;
pub mod manager;
pub mod outcome;
pub mod protocol;
pub mod proxy;
pub mod server;
pub mod transport;
pub mod types;

pub use manager::McpClientManager;
pub use outcome::ToolOutcome;
pub use proxy::DynamicProxy;
pub use server::ToolServer;
