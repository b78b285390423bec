//! Error types for Toolbridge
//!
//! This module defines all error types used throughout the crate, using
//! `thiserror` for ergonomic error handling. Public call surfaces that must
//! stay total (tool calls, handler invocations) convert these into
//! [`crate::mcp::outcome::ToolError`] values instead of returning them.

use thiserror::Error;

/// Main error type for Toolbridge operations
///
/// Covers configuration loading, descriptor normalization, transport and
/// protocol failures, and request-level authorization.
#[derive(Error, Debug)]
pub enum ToolbridgeError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A server record that cannot be turned into a descriptor
    #[error("Invalid server descriptor `{name}`: {reason}")]
    InvalidDescriptor {
        /// Name of the offending record (`<unnamed>` when missing)
        name: String,
        /// What is wrong with it
        reason: String,
    },

    /// Protocol-level error reported by the remote peer
    #[error("MCP error: {0}")]
    Mcp(String),

    /// Transport-level failure (spawn, pipe, HTTP)
    #[error("MCP transport error: {0}")]
    McpTransport(String),

    /// A request did not receive a response in time
    #[error("MCP timeout: server={server}, method={method}")]
    McpTimeout {
        /// Server the request was sent to
        server: String,
        /// JSON-RPC method that timed out
        method: String,
    },

    /// The remote endpoint rejected our credentials
    #[error("MCP authentication required: {0}")]
    McpAuth(String),

    /// The server negotiated a protocol version we do not speak
    #[error("MCP protocol version mismatch: expected one of {expected:?}, got {got}")]
    McpProtocolVersion {
        /// Versions this crate supports
        expected: Vec<String>,
        /// Version the server selected
        got: String,
    },

    /// Unknown server, tool, or handler
    #[error("Not found: {0}")]
    NotFound(String),

    /// Inbound request carried a token that does not match the active binding
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for Toolbridge operations
///
/// Uses `anyhow::Error` so that context can be attached freely; callers that
/// care about the category downcast to [`ToolbridgeError`].
pub type Result<T> = anyhow::Result<T>;
