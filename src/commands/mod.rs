//! Command handlers for the toolbridge CLI
//!
//! Every command builds an [`McpClientManager`] from the configuration,
//! connects to the configured servers, and then inspects, calls or re-serves
//! what it found.

use std::sync::Arc;

use crate::config::Config;
use crate::mcp::manager::McpClientManager;

pub mod call;
pub mod serve;
pub mod servers;
pub mod tools;

/// Build a manager from `config` and connect to every configured server.
///
/// Connection failures are recorded in the manager's state, not returned.
pub async fn connect_all(config: &Config) -> Arc<McpClientManager> {
    let manager = Arc::new(McpClientManager::new(config.client_options()));
    let descriptors = config.server_descriptors();
    tracing::info!(count = descriptors.len(), "connecting to configured servers");
    manager.connect_to_servers(descriptors).await;
    manager
}
