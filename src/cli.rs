//! Command-line interface definition for toolbridge
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands to inspect, call and re-serve downstream tools.

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_PATH;

/// toolbridge - tool-invocation protocol bridge
///
/// Connect to many tool servers at once, call their tools, or serve them
/// again behind a single endpoint.
#[derive(Parser, Debug, Clone)]
#[command(name = "toolbridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "TOOLBRIDGE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for toolbridge
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Connect to every configured server and print its status
    Servers,

    /// Connect and list every discovered tool
    Tools,

    /// Connect and invoke one tool
    Call {
        /// Qualified tool name (`<server>.<tool>`)
        qualified: String,

        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },

    /// Re-serve every discovered tool behind a single endpoint
    Serve {
        /// Serve over the process stdin/stdout
        #[arg(long, conflicts_with = "http")]
        stdio: bool,

        /// Serve over HTTP (the default)
        #[arg(long)]
        http: bool,

        /// Override the HTTP listen address
        #[arg(short, long)]
        bind: Option<String>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some(DEFAULT_CONFIG_PATH.to_string()),
            verbose: false,
            json_logs: false,
            command: Commands::Servers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default() {
        let cli = Cli::default();
        assert_eq!(cli.config.as_deref(), Some("config/toolbridge.yaml"));
        assert!(!cli.verbose);
        assert!(matches!(cli.command, Commands::Servers));
    }

    #[test]
    fn test_cli_parse_call_with_args() {
        let cli = Cli::try_parse_from([
            "toolbridge",
            "call",
            "files.read",
            "--args",
            r#"{"path":"a"}"#,
        ])
        .unwrap();
        match cli.command {
            Commands::Call { qualified, args } => {
                assert_eq!(qualified, "files.read");
                assert_eq!(args, r#"{"path":"a"}"#);
            }
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_parse_call_defaults_to_empty_object() {
        let cli = Cli::try_parse_from(["toolbridge", "call", "a.b"]).unwrap();
        assert!(matches!(cli.command, Commands::Call { ref args, .. } if args == "{}"));
    }

    #[test]
    fn test_cli_serve_transports_conflict() {
        assert!(Cli::try_parse_from(["toolbridge", "serve", "--stdio", "--http"]).is_err());
        let cli = Cli::try_parse_from(["toolbridge", "serve", "--stdio"]).unwrap();
        assert!(matches!(cli.command, Commands::Serve { stdio: true, .. }));
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["toolbridge", "tools", "--verbose", "--json-logs"]).unwrap();
        assert!(cli.verbose);
        assert!(cli.json_logs);
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["toolbridge"]).is_err());
    }
}
