//! `toolbridge servers`: connection status table

use prettytable::{cell, row, Table};

use crate::config::Config;
use crate::error::Result;
use crate::mcp::config::ConnectionState;

/// Connect to every configured server and print one row per server.
pub async fn show_servers(config: &Config) -> Result<()> {
    let manager = super::connect_all(config).await;
    let states = manager.get_servers_status().await;

    if states.is_empty() {
        println!("No servers configured.");
    } else {
        status_table(&states).printstd();
    }

    manager.shutdown().await;
    Ok(())
}

/// Render connection states as a table.
pub fn status_table(states: &[ConnectionState]) -> Table {
    let mut table = Table::new();
    table.add_row(row![bF => "Server", "Status", "Tools", "Last Error"]);
    for state in states {
        table.add_row(row![
            state.name,
            state.status,
            state.tools.len(),
            state.last_error.as_deref().unwrap_or("-")
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::config::ConnectionStatus;

    #[test]
    fn test_status_table_lists_each_server() {
        let mut failed = ConnectionState::new("beta", ConnectionStatus::Failed);
        failed.last_error = Some("spawn failed".to_string());
        let states = vec![
            ConnectionState::new("alpha", ConnectionStatus::Disabled),
            failed,
        ];

        let rendered = status_table(&states).to_string();
        assert!(rendered.contains("alpha"));
        assert!(rendered.contains("disabled"));
        assert!(rendered.contains("beta"));
        assert!(rendered.contains("spawn failed"));
    }

    #[tokio::test]
    async fn test_show_servers_with_no_servers() {
        assert!(show_servers(&Config::default()).await.is_ok());
    }
}
