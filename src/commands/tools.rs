//! `toolbridge tools`: aggregated tool catalog

use prettytable::{cell, row, Table};

use crate::config::Config;
use crate::error::Result;
use crate::mcp::config::ToolDescriptor;

/// Connect to every configured server and print every discovered tool.
pub async fn list_tools(config: &Config) -> Result<()> {
    let manager = super::connect_all(config).await;
    let tools = manager.get_tools().await;

    if tools.is_empty() {
        println!("No tools available.");
    } else {
        tools_table(&tools).printstd();
    }

    manager.shutdown().await;
    Ok(())
}

/// Render tool descriptors as a table.
pub fn tools_table(tools: &[ToolDescriptor]) -> Table {
    let mut table = Table::new();
    table.add_row(row![bF => "Tool", "Description"]);
    for tool in tools {
        table.add_row(row![
            tool.qualified_name,
            first_line(tool.description.as_deref().unwrap_or_default())
        ]);
    }
    table
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
