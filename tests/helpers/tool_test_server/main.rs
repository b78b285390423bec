//! Scripted tool server for integration tests
//!
//! Serves newline-delimited JSON-RPC on stdin/stdout using the crate's own
//! [`ToolServer`]. Registered entry points and tools:
//!
//! - `process_message` -- answers `echo: <message>`, minting a chat id when
//!   none is supplied.
//! - `finish_chat` -- answers `finished <chat_id>`.
//! - `echo` -- returns the `text` argument, carrying `chat_id` through.
//! - `slow` -- sleeps `ms` milliseconds, then answers `done`.
//! - `fail` -- the handler returns an error.
//! - `explode` -- the handler panics.
//!
//! Flags:
//!
//! - `--name <name>` -- server identity (default `tool-test-server`).
//! - `--hang` -- read stdin forever and never answer anything.

use std::time::Duration;

use tokio::io::AsyncReadExt;
use toolbridge::mcp::outcome::ToolOutcome;
use toolbridge::mcp::server::{MessageRequest, ServerTool, ToolServer};

fn arg_str(args: &serde_json::Value, key: &str) -> String {
    args.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn tools() -> Vec<ServerTool> {
    vec![
        ServerTool::new(
            "echo",
            "Echo the `text` argument",
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" }, "chat_id": { "type": "string" } },
                "required": ["text"]
            }),
            |args| async move {
                Ok(ToolOutcome::response(
                    arg_str(&args, "text"),
                    arg_str(&args, "chat_id"),
                ))
            },
        ),
        ServerTool::new(
            "slow",
            "Sleep for `ms` milliseconds",
            serde_json::json!({ "type": "object", "properties": { "ms": { "type": "integer" } } }),
            |args| async move {
                let ms = args.get("ms").and_then(|v| v.as_u64()).unwrap_or(1000);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(ToolOutcome::response("done", arg_str(&args, "chat_id")))
            },
        ),
        ServerTool::new(
            "fail",
            "Always fails",
            serde_json::json!({ "type": "object" }),
            |_args| async move { Err(anyhow::anyhow!("scripted failure")) },
        ),
        ServerTool::new(
            "explode",
            "Always panics",
            serde_json::json!({ "type": "object" }),
            |_args| async move {
                if true {
                    panic!("scripted panic");
                }
                Ok(ToolOutcome::response("unreachable", ""))
            },
        ),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--hang") {
        let mut sink = Vec::new();
        tokio::io::stdin().read_to_end(&mut sink).await?;
        std::future::pending::<()>().await;
    }

    let name = args
        .iter()
        .position(|a| a == "--name")
        .and_then(|i| args.get(i + 1))
        .cloned()
        .unwrap_or_else(|| "tool-test-server".to_string());

    let server = std::sync::Arc::new(ToolServer::new(name));
    server.register_message_handler(|req: MessageRequest| async move {
        let chat_id = req
            .chat_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Ok(ToolOutcome::response(
            format!("echo: {}", req.message),
            chat_id,
        ))
    });
    server.register_finish_chat_handler(|chat_id: String| async move {
        Ok(ToolOutcome::response(format!("finished {chat_id}"), chat_id))
    });
    server.register_tools(tools());

    server.get_transport_instance().serve_stdio().await
}
