//! toolbridge - tool-invocation protocol layer
//!
//! This library lets an application expose tools and chat-style handlers to
//! remote callers, and call tools hosted by many remote servers at once.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `mcp`: protocol types, transports, the tool server, the dynamic proxy
//!   and the multi-server client manager
//! - `config`: Configuration management and validation
//! - `commands`: Handlers behind the CLI subcommands
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use toolbridge::{Config, McpClientManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/toolbridge.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let manager = McpClientManager::new(config.client_options());
//!     manager.connect_to_servers(config.server_descriptors()).await;
//!     for tool in manager.get_tools().await {
//!         println!("{}", tool.qualified_name);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod mcp;

// Re-export commonly used types
pub use config::Config;
pub use error::{Result, ToolbridgeError};
pub use mcp::{DynamicProxy, McpClientManager, ToolOutcome, ToolServer};
