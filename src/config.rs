//! Configuration management for toolbridge
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{Result, ToolbridgeError};
use crate::mcp::config::{normalize_records, ClientOptions, DuplicatePolicy, ServerDescriptor};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/toolbridge.yaml";

/// Main configuration structure for toolbridge
///
/// Holds the client timeouts, the list of downstream servers and the
/// settings of the `serve` command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Client-side timeouts and policies
    #[serde(default)]
    pub client: ClientConfig,

    /// Downstream server records
    ///
    /// Kept as raw YAML so one malformed record is rejected on its own
    /// instead of failing the whole file.
    #[serde(default)]
    pub servers: Vec<serde_yaml::Value>,

    /// Settings for `toolbridge serve`
    #[serde(default)]
    pub serve: ServeConfig,
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Bound on connect plus handshake plus tool discovery, per server
    #[serde(default = "default_init_timeout")]
    pub init_timeout_seconds: u64,

    /// Bound on a single tool invocation
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_seconds: u64,

    /// What to do with repeated server names
    #[serde(default)]
    pub duplicate_names: DuplicatePolicy,
}

fn default_init_timeout() -> u64 {
    30
}

fn default_tool_timeout() -> u64 {
    60
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            init_timeout_seconds: default_init_timeout(),
            tool_timeout_seconds: default_tool_timeout(),
            duplicate_names: DuplicatePolicy::default(),
        }
    }
}

/// Gateway server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServeConfig {
    /// Identity advertised to connecting clients
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Bearer token required on the HTTP endpoint; empty disables the check
    #[serde(default)]
    pub token: String,

    /// Listen address for `serve --http`
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_app_name() -> String {
    "toolbridge".to_string()
}

fn default_bind() -> String {
    "127.0.0.1:8808".to_string()
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            token: String::new(),
            bind: default_bind(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, then apply environment and CLI overrides
    ///
    /// A missing file falls back to defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ToolbridgeError::Config`] if the file exists but cannot be
    /// read or parsed.
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    /// Parse a configuration file without applying any override
    ///
    /// # Errors
    ///
    /// Returns [`ToolbridgeError::Config`] on I/O or YAML errors.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ToolbridgeError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ToolbridgeError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(timeout) = std::env::var("TOOLBRIDGE_INIT_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.client.init_timeout_seconds = value;
            } else {
                tracing::warn!("Invalid TOOLBRIDGE_INIT_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(timeout) = std::env::var("TOOLBRIDGE_TOOL_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.client.tool_timeout_seconds = value;
            } else {
                tracing::warn!("Invalid TOOLBRIDGE_TOOL_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(app_name) = std::env::var("TOOLBRIDGE_APP_NAME") {
            tracing::debug!(app_name = %app_name, "Env override: TOOLBRIDGE_APP_NAME");
            self.serve.app_name = app_name;
        }

        if let Ok(token) = std::env::var("TOOLBRIDGE_TOKEN") {
            tracing::debug!("Env override: TOOLBRIDGE_TOKEN");
            self.serve.token = token;
        }

        if let Ok(bind) = std::env::var("TOOLBRIDGE_BIND") {
            tracing::debug!(bind = %bind, "Env override: TOOLBRIDGE_BIND");
            self.serve.bind = bind;
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let crate::cli::Commands::Serve {
            bind: Some(bind), ..
        } = &cli.command
        {
            self.serve.bind = bind.clone();
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ToolbridgeError::Config`] for zero timeouts, an empty app
    /// name or an unparsable bind address.
    pub fn validate(&self) -> Result<()> {
        if self.client.init_timeout_seconds == 0 {
            return Err(
                ToolbridgeError::Config("init_timeout_seconds must be greater than 0".into())
                    .into(),
            );
        }

        if self.client.tool_timeout_seconds == 0 {
            return Err(
                ToolbridgeError::Config("tool_timeout_seconds must be greater than 0".into())
                    .into(),
            );
        }

        if self.serve.app_name.trim().is_empty() {
            return Err(ToolbridgeError::Config("serve.app_name cannot be empty".into()).into());
        }

        self.bind_addr()?;
        Ok(())
    }

    /// The parsed listen address for `serve --http`
    ///
    /// # Errors
    ///
    /// Returns [`ToolbridgeError::Config`] if `serve.bind` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.serve.bind.parse().map_err(|e| {
            ToolbridgeError::Config(format!("Invalid serve.bind '{}': {}", self.serve.bind, e))
                .into()
        })
    }

    /// Client options derived from the `client` section
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            init_timeout: Duration::from_secs(self.client.init_timeout_seconds),
            tool_timeout: Duration::from_secs(self.client.tool_timeout_seconds),
            duplicate_names: self.client.duplicate_names,
        }
    }

    /// Normalize the `servers` records
    ///
    /// Malformed records are logged and skipped.
    pub fn server_descriptors(&self) -> Vec<ServerDescriptor> {
        let (descriptors, diagnostics) = normalize_records(&self.servers);
        for diagnostic in &diagnostics {
            tracing::warn!("Skipping server record: {}", diagnostic);
        }
        descriptors
    }
}
