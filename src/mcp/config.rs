//! Server descriptors, client options and connection state
//!
//! Configuration arrives as plain records (`name`, `description`,
//! `disabled`, and either `command`/`args` or `url`/`headers`).
//! [`normalize_records`] turns them into validated [`ServerDescriptor`]s one
//! record at a time: a malformed record is rejected with a diagnostic and
//! the rest of the list still loads.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ToolbridgeError};

/// Separator between server name and tool name in a qualified tool name.
pub const QUALIFIER_SEPARATOR: char = '.';

/// Default bound on connection establishment.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on a single tool invocation.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// How to reach a server: a local subprocess or a remote streamed endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Spawn `command args...` and speak the protocol over its stdio.
    LocalCommand {
        /// Executable to spawn.
        command: String,
        /// Arguments passed to the executable.
        args: Vec<String>,
        /// Extra environment variables for the child.
        env: HashMap<String, String>,
        /// Working directory for the child.
        cwd: Option<PathBuf>,
    },
    /// Open a persistent streamed HTTP connection to `url`.
    RemoteUrl {
        /// Endpoint URL.
        url: url::Url,
        /// Headers attached to every request (bearer tokens go here).
        headers: HashMap<String, String>,
    },
}

/// A validated server descriptor. Immutable for the lifetime of the
/// connection made from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    /// Unique name within one client; never contains `.`.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Disabled descriptors are reported but never connected.
    pub disabled: bool,
    /// Exactly one transport variant.
    pub transport: TransportConfig,
}

impl ServerDescriptor {
    /// Descriptor for a local subprocess server.
    pub fn local(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            disabled: false,
            transport: TransportConfig::LocalCommand {
                command: command.into(),
                args,
                env: HashMap::new(),
                cwd: None,
            },
        }
    }

    /// Descriptor for a remote streamed-HTTP server.
    pub fn remote(name: impl Into<String>, url: url::Url, headers: HashMap<String, String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            disabled: false,
            transport: TransportConfig::RemoteUrl { url, headers },
        }
    }

    /// Builder-style toggle for `disabled`.
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Builder-style setter for `description`.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Validate a raw record into a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ToolbridgeError::InvalidDescriptor`] when the name is
    /// missing or contains `.`, when neither or both of `command` and `url`
    /// are present, when the URL does not parse, or when fields of the other
    /// transport variant are set.
    ///
    /// # Examples
    ///
    /// ```
    /// use toolbridge::mcp::config::{ServerDescriptor, ServerRecord};
    ///
    /// let record = ServerRecord {
    ///     name: Some("alpha".into()),
    ///     command: Some("echo-tool".into()),
    ///     ..Default::default()
    /// };
    /// let descriptor = ServerDescriptor::from_record(record).unwrap();
    /// assert_eq!(descriptor.name, "alpha");
    /// ```
    pub fn from_record(record: ServerRecord) -> Result<Self> {
        let name = record.name.as_deref().map(str::trim).unwrap_or_default();
        let invalid = |reason: &str| {
            anyhow::Error::from(ToolbridgeError::InvalidDescriptor {
                name: if name.is_empty() {
                    "<unnamed>".to_string()
                } else {
                    name.to_string()
                },
                reason: reason.to_string(),
            })
        };

        if let Err(reason) = check_server_name(name) {
            return Err(invalid(reason));
        }

        let transport = match (record.command, record.url) {
            (Some(_), Some(_)) => {
                return Err(invalid("exactly one of `command` or `url` is allowed, got both"))
            }
            (None, None) => return Err(invalid("one of `command` or `url` is required")),
            (Some(command), None) => {
                if command.trim().is_empty() {
                    return Err(invalid("`command` must not be empty"));
                }
                if !record.headers.is_empty() {
                    return Err(invalid("`headers` only apply to `url` servers"));
                }
                TransportConfig::LocalCommand {
                    command,
                    args: record.args,
                    env: record.env,
                    cwd: record.cwd,
                }
            }
            (None, Some(raw_url)) => {
                if !record.args.is_empty() || !record.env.is_empty() || record.cwd.is_some() {
                    return Err(invalid("`args`, `env` and `cwd` only apply to `command` servers"));
                }
                let url = url::Url::parse(raw_url.trim())
                    .map_err(|e| invalid(&format!("invalid url `{raw_url}`: {e}")))?;
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(invalid(&format!(
                        "unsupported url scheme `{}`",
                        url.scheme()
                    )));
                }
                TransportConfig::RemoteUrl {
                    url,
                    headers: record.headers,
                }
            }
        };

        Ok(Self {
            name: name.to_string(),
            description: record.description.unwrap_or_default(),
            disabled: record.disabled,
            transport,
        })
    }
}

/// The raw configuration record for one server, every field optional so
/// that validation can report exactly what is missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Server name.
    #[serde(default)]
    pub name: Option<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Skip this server without attempting I/O.
    #[serde(default)]
    pub disabled: bool,
    /// Local executable.
    #[serde(default)]
    pub command: Option<String>,
    /// Arguments for `command`.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment for `command`.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for `command`.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Remote endpoint.
    #[serde(default)]
    pub url: Option<String>,
    /// Headers for `url`.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Normalize a list of raw records.
///
/// Returns the descriptors that validated and one diagnostic line per
/// rejected record. Duplicate names are not resolved here; that policy
/// belongs to [`crate::mcp::manager::McpClientManager::connect_to_servers`].
pub fn normalize_records(values: &[serde_yaml::Value]) -> (Vec<ServerDescriptor>, Vec<String>) {
    let mut descriptors = Vec::new();
    let mut diagnostics = Vec::new();

    for (index, value) in values.iter().enumerate() {
        let record = match serde_yaml::from_value::<ServerRecord>(value.clone()) {
            Ok(record) => record,
            Err(e) => {
                diagnostics.push(format!("server record #{index}: {e}"));
                continue;
            }
        };
        match ServerDescriptor::from_record(record) {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(e) => diagnostics.push(format!("server record #{index}: {e}")),
        }
    }

    (descriptors, diagnostics)
}

// ---------------------------------------------------------------------------
// Client options
// ---------------------------------------------------------------------------

/// What to do when two descriptors in one connect call share a name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep the first descriptor, skip later ones with a warning.
    #[default]
    Skip,
    /// Later descriptors replace earlier ones, keeping the first position.
    Overwrite,
}

/// Timeouts and policies for [`crate::mcp::manager::McpClientManager`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Bound on spawn/connect plus handshake plus tool discovery.
    pub init_timeout: Duration,
    /// Bound on a single remote tool invocation.
    pub tool_timeout: Duration,
    /// Duplicate-name resolution.
    pub duplicate_names: DuplicatePolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            init_timeout: DEFAULT_INIT_TIMEOUT,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            duplicate_names: DuplicatePolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Discovery results and connection state
// ---------------------------------------------------------------------------

/// A discovered tool, qualified by the server that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// `<server_name>.<tool_name>`.
    pub qualified_name: String,
    /// Owning server.
    pub server_name: String,
    /// Name on the owning server.
    pub tool_name: String,
    /// Description as advertised by the server.
    pub description: Option<String>,
    /// Input schema as advertised by the server (opaque).
    pub schema: serde_json::Value,
}

/// Reject names that cannot prefix a qualified tool name.
pub fn check_server_name(name: &str) -> std::result::Result<(), &'static str> {
    if name.trim().is_empty() {
        return Err("missing required field `name`");
    }
    if name.contains(QUALIFIER_SEPARATOR) {
        return Err("server names must not contain `.`");
    }
    Ok(())
}

/// Join a server name and a tool name.
pub fn qualify(server_name: &str, tool_name: &str) -> String {
    format!("{server_name}{QUALIFIER_SEPARATOR}{tool_name}")
}

/// Split a qualified name on the first `.`; server names never contain one,
/// tool names may.
///
/// # Examples
///
/// ```
/// use toolbridge::mcp::config::split_qualified;
///
/// assert_eq!(split_qualified("alpha.fs.read"), Some(("alpha", "fs.read")));
/// assert_eq!(split_qualified("alpha"), None);
/// ```
pub fn split_qualified(qualified: &str) -> Option<(&str, &str)> {
    let (server, tool) = qualified.split_once(QUALIFIER_SEPARATOR)?;
    if server.is_empty() || tool.is_empty() {
        return None;
    }
    Some((server, tool))
}

/// Per-server connection lifecycle.
///
/// `Pending -> Connecting -> {Connected | Failed}`; `Disabled` is terminal
/// and reached without I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Accepted, attempt not started yet.
    Pending,
    /// Spawn/connect or handshake in progress.
    Connecting,
    /// Handshake and discovery finished; tools are callable.
    Connected,
    /// Attempt failed or timed out; see `last_error`.
    Failed,
    /// Descriptor was disabled.
    Disabled,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

/// Snapshot of one server's connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionState {
    /// Server name.
    pub name: String,
    /// Current status.
    pub status: ConnectionStatus,
    /// Populated when `status` is `Failed`.
    pub last_error: Option<String>,
    /// Discovered tools; empty unless `Connected`.
    pub tools: Vec<ToolDescriptor>,
    /// When `status` last changed.
    pub updated_at: DateTime<Utc>,
}

impl ConnectionState {
    pub(crate) fn new(name: &str, status: ConnectionStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
            last_error: None,
            tools: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Vec<serde_yaml::Value> {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_local_record_normalizes() {
        let (descriptors, diagnostics) = normalize_records(&yaml(
            r#"
- name: alpha
  description: echo server
  command: echo-tool
  args: ["--fast"]
"#,
        ));
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        assert_eq!(descriptors.len(), 1);
        let d = &descriptors[0];
        assert_eq!(d.name, "alpha");
        assert_eq!(d.description, "echo server");
        assert!(!d.disabled);
        assert!(matches!(
            &d.transport,
            TransportConfig::LocalCommand { command, args, .. }
                if command == "echo-tool" && args == &vec!["--fast".to_string()]
        ));
    }

    #[test]
    fn test_remote_record_normalizes_with_headers() {
        let (descriptors, diagnostics) = normalize_records(&yaml(
            r#"
- name: beta
  disabled: true
  url: http://x
  headers:
    Authorization: Bearer abc
"#,
        ));
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        let d = &descriptors[0];
        assert!(d.disabled);
        match &d.transport {
            TransportConfig::RemoteUrl { url, headers } => {
                assert_eq!(url.host_str(), Some("x"));
                assert_eq!(headers.get("Authorization").unwrap(), "Bearer abc");
            }
            other => panic!("unexpected transport {other:?}"),
        }
    }

    #[test]
    fn test_malformed_records_rejected_individually() {
        let (descriptors, diagnostics) = normalize_records(&yaml(
            r#"
- name: good
  command: ok
- name: both
  command: x
  url: http://x
- name: neither
- command: no-name
- name: dotted.name
  command: x
- name: badurl
  url: "not a url"
- name: wrongtype
  command: x
  args: "should be a list"
- name: also-good
  url: https://example.com/mcp
"#,
        ));
        let names: Vec<_> = descriptors.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["good", "also-good"]);
        assert_eq!(diagnostics.len(), 6, "{diagnostics:#?}");
        assert!(diagnostics[0].contains("got both"));
        assert!(diagnostics[1].contains("is required"));
        assert!(diagnostics[2].contains("<unnamed>"));
        assert!(diagnostics[3].contains("must not contain"));
        assert!(diagnostics[4].contains("invalid url"));
        assert!(diagnostics[5].starts_with("server record #6"));
    }

    #[test]
    fn test_cross_variant_fields_rejected() {
        let record = ServerRecord {
            name: Some("r".into()),
            url: Some("http://localhost/mcp".into()),
            args: vec!["x".into()],
            ..Default::default()
        };
        let err = ServerDescriptor::from_record(record).unwrap_err();
        assert!(err.to_string().contains("only apply to `command`"));

        let record = ServerRecord {
            name: Some("l".into()),
            command: Some("x".into()),
            headers: HashMap::from([("A".to_string(), "b".to_string())]),
            ..Default::default()
        };
        let err = ServerDescriptor::from_record(record).unwrap_err();
        assert!(err.to_string().contains("only apply to `url`"));
    }

    #[test]
    fn test_non_http_scheme_rejected() {
        let record = ServerRecord {
            name: Some("f".into()),
            url: Some("file:///tmp/sock".into()),
            ..Default::default()
        };
        assert!(ServerDescriptor::from_record(record).is_err());
    }

    #[test]
    fn test_check_server_name() {
        assert!(check_server_name("alpha_1").is_ok());
        assert!(check_server_name("").is_err());
        assert!(check_server_name("  ").is_err());
        assert_eq!(
            check_server_name("a.b"),
            Err("server names must not contain `.`")
        );
    }

    #[test]
    fn test_split_qualified_edges() {
        assert_eq!(split_qualified("alpha.echo"), Some(("alpha", "echo")));
        assert_eq!(split_qualified(".echo"), None);
        assert_eq!(split_qualified("alpha."), None);
        assert_eq!(split_qualified("noseparator"), None);
        assert_eq!(qualify("alpha", "echo"), "alpha.echo");
    }

    #[test]
    fn test_duplicate_policy_parses_from_yaml() {
        let p: DuplicatePolicy = serde_yaml::from_str("overwrite").unwrap();
        assert_eq!(p, DuplicatePolicy::Overwrite);
        assert_eq!(DuplicatePolicy::default(), DuplicatePolicy::Skip);
    }
}
