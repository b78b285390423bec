//! toolbridge - tool-invocation protocol bridge CLI
//!
//! Main entry point for the toolbridge application.

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use toolbridge::cli::{Cli, Commands};
use toolbridge::commands;
use toolbridge::config::{Config, DEFAULT_CONFIG_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_tracing(cli.verbose, cli.json_logs);

    let config_path = cli.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);
    let config = Config::load(config_path, &cli)?;

    config.validate()?;

    match cli.command.clone() {
        Commands::Servers => {
            tracing::info!("Showing server status");
            commands::servers::show_servers(&config).await
        }
        Commands::Tools => {
            tracing::info!("Listing tools");
            commands::tools::list_tools(&config).await
        }
        Commands::Call { qualified, args } => {
            tracing::info!("Calling tool {}", qualified);
            let outcome = commands::call::call_tool(&config, &qualified, &args).await?;
            if outcome.is_error() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Serve { stdio, http, .. } => {
            if http {
                tracing::debug!("HTTP transport selected explicitly");
            }
            tracing::info!(stdio, "Starting gateway");
            commands::serve::run_serve(config, cli, stdio).await
        }
    }
}

/// Initialize tracing on stderr; stdout stays reserved for protocol frames
/// and command output.
fn init_tracing(verbose: bool, json: bool) {
    let default_directive = if verbose {
        "toolbridge=debug"
    } else {
        "toolbridge=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
