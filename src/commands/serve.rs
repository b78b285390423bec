//! `toolbridge serve`: re-export downstream tools behind one endpoint
//!
//! The gateway is a [`ToolServer`] named after `serve.app_name` with one tool
//! per discovered downstream tool, registered under its qualified name and
//! forwarded through the [`McpClientManager`]. Over HTTP the gateway sits
//! behind a [`DynamicProxy`]; on Unix a `SIGHUP` rebuilds it from the
//! reloaded configuration and swaps it in without restarting the listener.

use std::sync::Arc;

use crate::cli::Cli;
use crate::config::Config;
use crate::error::Result;
use crate::mcp::http_server::serve_http;
use crate::mcp::manager::McpClientManager;
use crate::mcp::proxy::DynamicProxy;
use crate::mcp::server::{ServerTool, ToolServer};

/// Build a gateway server exposing every tool `manager` currently sees.
pub async fn build_gateway(app_name: &str, manager: &Arc<McpClientManager>) -> Arc<ToolServer> {
    let gateway = ToolServer::new(app_name);
    let tools = manager
        .get_tools()
        .await
        .into_iter()
        .map(|tool| {
            let manager = Arc::clone(manager);
            let qualified = tool.qualified_name.clone();
            ServerTool::new(
                tool.qualified_name,
                tool.description.unwrap_or_default(),
                tool.schema,
                move |arguments| {
                    let manager = Arc::clone(&manager);
                    let qualified = qualified.clone();
                    async move { Ok(manager.call_tool(&qualified, arguments).await) }
                },
            )
        })
        .collect::<Vec<_>>();

    tracing::info!(app = %app_name, tools = tools.len(), "gateway built");
    gateway.register_tools(tools);
    Arc::new(gateway)
}

/// Run the gateway until stdin closes (`--stdio`) or forever (HTTP).
pub async fn run_serve(config: Config, cli: Cli, stdio: bool) -> Result<()> {
    let manager = super::connect_all(&config).await;
    let gateway = build_gateway(&config.serve.app_name, &manager).await;

    if stdio {
        let result = gateway.get_transport_instance().serve_stdio().await;
        manager.shutdown().await;
        return result;
    }

    let proxy = Arc::new(DynamicProxy::new());
    proxy.reconfigure(gateway, config.serve.token.clone());
    spawn_reload_on_sighup(Arc::clone(&proxy), manager, cli);

    serve_http(proxy, config.bind_addr()?).await
}

/// Reload the configuration and rebind `proxy` to a freshly built gateway.
///
/// The previous manager is shut down after the swap; calls already admitted
/// keep their own session handles and finish normally.
pub async fn reload(
    proxy: &DynamicProxy,
    current: Arc<McpClientManager>,
    cli: &Cli,
) -> Result<Arc<McpClientManager>> {
    let path = cli
        .config
        .as_deref()
        .unwrap_or(crate::config::DEFAULT_CONFIG_PATH);
    let config = Config::load(path, cli)?;
    config.validate()?;

    let next = super::connect_all(&config).await;
    let gateway = build_gateway(&config.serve.app_name, &next).await;
    proxy.reconfigure(gateway, config.serve.token.clone());

    current.shutdown().await;
    Ok(next)
}

#[cfg(unix)]
fn spawn_reload_on_sighup(proxy: Arc<DynamicProxy>, manager: Arc<McpClientManager>, cli: Cli) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangups = match signal(SignalKind::hangup()) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("SIGHUP reload unavailable: {}", e);
                return;
            }
        };
        let mut manager = manager;
        while hangups.recv().await.is_some() {
            tracing::info!("SIGHUP received; reloading configuration");
            match reload(&proxy, Arc::clone(&manager), &cli).await {
                Ok(next) => manager = next,
                Err(e) => tracing::error!("reload failed; keeping current binding: {:#}", e),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_sighup(_proxy: Arc<DynamicProxy>, _manager: Arc<McpClientManager>, _cli: Cli) {
    tracing::debug!("configuration reload on signal is only available on Unix");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::config::ClientOptions;
    use serial_test::serial;
    use std::io::Write;

    #[tokio::test]
    async fn test_gateway_without_servers_is_named_and_empty() {
        let manager = Arc::new(McpClientManager::new(ClientOptions::default()));
        let gateway = build_gateway("hub", &manager).await;
        assert_eq!(gateway.name(), "hub");
        assert!(gateway.list_tools().is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn test_reload_rebinds_proxy_with_new_identity() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"serve:\n  app_name: reloaded\n  token: fresh\n")
            .unwrap();
        let cli = Cli {
            config: Some(file.path().to_string_lossy().to_string()),
            ..Cli::default()
        };

        let proxy = DynamicProxy::new();
        proxy.reconfigure(Arc::new(ToolServer::new("original")), "stale");
        let manager = Arc::new(McpClientManager::new(ClientOptions::default()));

        reload(&proxy, manager, &cli).await.unwrap();

        let binding = proxy.binding();
        assert_eq!(binding.app_name, "reloaded");
        assert!(proxy.admit("fresh").is_ok());
        assert!(proxy.admit("stale").is_err());
    }

    #[tokio::test]
    #[serial]
    async fn test_reload_with_invalid_config_keeps_binding() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"client:\n  tool_timeout_seconds: 0\n").unwrap();
        let cli = Cli {
            config: Some(file.path().to_string_lossy().to_string()),
            ..Cli::default()
        };

        let proxy = DynamicProxy::new();
        proxy.reconfigure(Arc::new(ToolServer::new("original")), "");
        let manager = Arc::new(McpClientManager::new(ClientOptions::default()));

        assert!(reload(&proxy, manager, &cli).await.is_err());
        assert_eq!(proxy.binding().app_name, "original");
    }
}
