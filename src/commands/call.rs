//! `toolbridge call`: invoke one downstream tool

use crate::config::Config;
use crate::error::{Result, ToolbridgeError};
use crate::mcp::outcome::ToolOutcome;

/// Parse `--args` into a JSON object.
///
/// # Errors
///
/// Returns [`ToolbridgeError::Config`] if `raw` is not a JSON object.
pub fn parse_arguments(raw: &str) -> Result<serde_json::Value> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| ToolbridgeError::Config(format!("--args is not valid JSON: {}", e)))?;
    if !value.is_object() {
        return Err(ToolbridgeError::Config("--args must be a JSON object".to_string()).into());
    }
    Ok(value)
}

/// Connect, call `qualified` with `raw_args`, print the outcome as JSON.
///
/// Returns the outcome so the caller can pick the exit code.
pub async fn call_tool(config: &Config, qualified: &str, raw_args: &str) -> Result<ToolOutcome> {
    let arguments = parse_arguments(raw_args)?;
    let manager = super::connect_all(config).await;

    let outcome = manager.call_tool(qualified, arguments).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    manager.shutdown().await;
    Ok(outcome)
}
