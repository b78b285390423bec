//! Local command transport
//!
//! The server runs as a child process. Messages travel as newline-framed
//! JSON over its stdin and stdout; stderr lines are logged under the server's
//! name and never reach the protocol layer. The child is supervised by a
//! background task that logs an unexpected exit and, once the transport is
//! dropped, stops the child with SIGTERM followed by a hard kill after
//! [`STOP_GRACE`].

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

use crate::error::{Result, ToolbridgeError};
use crate::mcp::transport::{Inbound, MessageStream, Transport};

/// Longest stdout or stderr line accepted from a server. Longer lines are
/// dropped with a warning.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// How long a stopped server gets to exit before it is killed.
pub const STOP_GRACE: Duration = Duration::from_secs(2);

/// What to run for a local server.
#[derive(Debug, Clone, Copy)]
pub struct Launch<'a> {
    /// Executable, resolved through `PATH`.
    pub command: &'a str,
    /// Arguments.
    pub args: &'a [String],
    /// Variables layered over the inherited environment.
    pub env: &'a HashMap<String, String>,
    /// Working directory; inherited when `None`.
    pub cwd: Option<&'a Path>,
}

/// Transport over a child process's stdio.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use toolbridge::mcp::transport::stdio::{Launch, StdioTransport};
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let args = vec!["--root".to_string(), "/tmp".to_string()];
/// let transport = StdioTransport::spawn(
///     "files",
///     Launch { command: "files-server", args: &args, env: &HashMap::new(), cwd: None },
/// )?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StdioTransport {
    server: String,
    outbound: mpsc::UnboundedSender<String>,
    inbound: Inbound,
    // Dropping this tells the supervisor to stop the child.
    _stop: oneshot::Sender<()>,
}

impl StdioTransport {
    /// Spawn the server and start its pipe and supervisor tasks.
    ///
    /// # Errors
    ///
    /// Returns [`ToolbridgeError::McpTransport`] if the command cannot be
    /// started.
    pub fn spawn(server: &str, launch: Launch<'_>) -> Result<Self> {
        let mut command = Command::new(launch.command);
        command
            .args(launch.args)
            .envs(launch.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = launch.cwd {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            ToolbridgeError::McpTransport(format!(
                "failed to spawn server `{server}` (`{}`): {e}",
                launch.command
            ))
        })?;
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(ToolbridgeError::McpTransport(format!(
                "server `{server}` started without stdio pipes"
            ))
            .into());
        };
        tracing::debug!(server, command = launch.command, pid = ?child.id(), "server process started");

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound) = Inbound::channel();
        let (stop, stop_rx) = oneshot::channel();

        let name = server.to_string();
        tokio::spawn(async move {
            let mut sink = FramedWrite::new(stdin, LinesCodec::new());
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    tracing::debug!(server = %name, "stdin closed: {e}");
                    break;
                }
            }
        });

        let name = server.to_string();
        tokio::spawn(async move {
            let mut lines = FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
            while let Some(line) = lines.next().await {
                match line {
                    Ok(line) if line.trim().is_empty() => {}
                    Ok(line) => {
                        if inbound_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(LinesCodecError::MaxLineLengthExceeded) => {
                        tracing::warn!(server = %name, "dropping stdout line over {MAX_LINE_BYTES} bytes");
                    }
                    Err(LinesCodecError::Io(e)) => {
                        tracing::debug!(server = %name, "stdout read failed: {e}");
                        break;
                    }
                }
            }
        });

        let name = server.to_string();
        tokio::spawn(async move {
            let mut lines = FramedRead::new(stderr, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
            while let Some(line) = lines.next().await {
                match line {
                    Ok(line) => tracing::debug!(server = %name, "stderr: {line}"),
                    Err(LinesCodecError::MaxLineLengthExceeded) => {}
                    Err(LinesCodecError::Io(_)) => break,
                }
            }
        });

        tokio::spawn(supervise(server.to_string(), child, stop_rx));

        Ok(Self {
            server: server.to_string(),
            outbound,
            inbound,
            _stop: stop,
        })
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    fn server(&self) -> &str {
        &self.server
    }

    async fn send(&self, message: String) -> Result<()> {
        self.outbound.send(message).map_err(|_| {
            ToolbridgeError::McpTransport(format!("server `{}` closed its stdin", self.server))
                .into()
        })
    }

    fn take_inbound(&self) -> Result<MessageStream> {
        self.inbound.take(&self.server)
    }
}

/// Wait for the child to exit on its own or for the transport to go away.
async fn supervise(server: String, mut child: Child, stop: oneshot::Receiver<()>) {
    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => tracing::info!(server = %server, %status, "server process exited"),
                Err(e) => tracing::warn!(server = %server, "waiting on server process failed: {e}"),
            }
            return;
        }
        _ = stop => {}
    }

    terminate(&mut child);
    match tokio::time::timeout(STOP_GRACE, child.wait()).await {
        Ok(_) => tracing::debug!(server = %server, "server process stopped"),
        Err(_) => {
            tracing::warn!(server = %server, "server ignored SIGTERM; killing");
            let _ = child.kill().await;
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: `pid` belongs to a child we have not reaped yet.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    async fn next(stream: &mut MessageStream) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("no line within 5s")
    }

    fn sh(server: &str, script: &str) -> StdioTransport {
        let args = vec!["-c".to_string(), script.to_string()];
        StdioTransport::spawn(
            server,
            Launch {
                command: "sh",
                args: &args,
                env: &HashMap::new(),
                cwd: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_spawn_missing_command_names_the_server() {
        let err = StdioTransport::spawn(
            "ghost",
            Launch {
                command: "/nonexistent/binary/that/does/not/exist",
                args: &[],
                env: &HashMap::new(),
                cwd: None,
            },
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("failed to spawn server `ghost`"), "{msg}");
    }

    #[tokio::test]
    async fn test_messages_round_trip_through_cat() {
        let transport = StdioTransport::spawn(
            "cat",
            Launch {
                command: "cat",
                args: &[],
                env: &HashMap::new(),
                cwd: None,
            },
        )
        .unwrap();
        assert_eq!(transport.server(), "cat");
        let mut inbound = transport.take_inbound().unwrap();

        let msg = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.to_string();
        transport.send(msg.clone()).await.unwrap();
        assert_eq!(next(&mut inbound).await, Some(msg));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stderr_and_blank_lines_never_reach_inbound() {
        let transport = sh("noisy", "echo oops >&2; printf '\\n\\n'; echo '{\"id\":1}'");
        let mut inbound = transport.take_inbound().unwrap();
        assert_eq!(next(&mut inbound).await.as_deref(), Some(r#"{"id":1}"#));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_inbound_ends_when_server_exits() {
        let transport = sh("brief", "echo '{}'");
        let mut inbound = transport.take_inbound().unwrap();
        assert_eq!(next(&mut inbound).await.as_deref(), Some("{}"));
        assert_eq!(next(&mut inbound).await, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_env_overlay_and_working_dir_reach_child() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = HashMap::new();
        env.insert("TOOLBRIDGE_ECHO".to_string(), "from-env".to_string());
        let args = vec!["-c".to_string(), "echo \"$TOOLBRIDGE_ECHO\"; pwd".to_string()];

        let transport = StdioTransport::spawn(
            "env",
            Launch {
                command: "sh",
                args: &args,
                env: &env,
                cwd: Some(dir.path()),
            },
        )
        .unwrap();
        let mut inbound = transport.take_inbound().unwrap();

        assert_eq!(next(&mut inbound).await.as_deref(), Some("from-env"));
        let cwd = PathBuf::from(next(&mut inbound).await.unwrap());
        assert_eq!(cwd.canonicalize().unwrap(), dir.path().canonicalize().unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dropping_transport_stops_long_running_server() {
        let transport = sh("sleeper", "echo '{}'; exec sleep 30");
        let mut inbound = transport.take_inbound().unwrap();
        assert_eq!(next(&mut inbound).await.as_deref(), Some("{}"));

        drop(transport);
        // stdout closes once the child is gone.
        assert_eq!(next(&mut inbound).await, None);
    }
}
