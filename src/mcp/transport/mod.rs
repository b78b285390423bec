//! Message transports between the client manager and one tool server
//!
//! A [`Transport`] moves whole JSON-RPC messages: [`Transport::send`] takes
//! one serialized message and [`Transport::take_inbound`] hands out the
//! stream of messages coming back. Framing belongs to the implementation:
//!
//! - [`stdio::StdioTransport`] runs a local command and frames messages as
//!   lines on its stdin/stdout.
//! - [`http::HttpTransport`] POSTs each message to a remote endpoint and
//!   reads replies from JSON bodies or event streams.
//! - `fake::FakeTransport` is an in-process pair for unit tests.
//!
//! [`connect`] picks the implementation for a [`ServerDescriptor`].

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::{Result, ToolbridgeError};
use crate::mcp::config::{ServerDescriptor, TransportConfig};

/// Inbound messages, one complete JSON-RPC object per item.
pub type MessageStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// A bidirectional message channel to one tool server.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Configured name of the server on the other end.
    fn server(&self) -> &str;

    /// Deliver one serialized JSON-RPC message.
    ///
    /// # Errors
    ///
    /// Fails when the peer can no longer be reached or refuses the message.
    async fn send(&self, message: String) -> Result<()>;

    /// Take the inbound stream. It ends when the peer goes away.
    ///
    /// # Errors
    ///
    /// Only one consumer exists; every call after the first fails.
    fn take_inbound(&self) -> Result<MessageStream>;
}

/// Single-consumer inbound queue shared by the transport implementations.
#[derive(Debug)]
pub(crate) struct Inbound {
    rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl Inbound {
    pub(crate) fn channel() -> (mpsc::UnboundedSender<String>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                rx: Mutex::new(Some(rx)),
            },
        )
    }

    pub(crate) fn take(&self, server: &str) -> Result<MessageStream> {
        let taken = self
            .rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match taken {
            Some(rx) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
            None => Err(ToolbridgeError::McpTransport(format!(
                "inbound stream for `{server}` was already taken"
            ))
            .into()),
        }
    }
}

/// Open the transport described by `descriptor`.
///
/// Local commands are spawned immediately; remote endpoints perform no I/O
/// until the first message is sent. `request_timeout` bounds each HTTP
/// request and is ignored for local commands.
///
/// # Errors
///
/// Returns [`ToolbridgeError::McpTransport`] if the process cannot be
/// spawned or the HTTP client cannot be built.
pub fn connect(
    descriptor: &ServerDescriptor,
    request_timeout: Duration,
) -> Result<Arc<dyn Transport>> {
    match &descriptor.transport {
        TransportConfig::LocalCommand {
            command,
            args,
            env,
            cwd,
        } => {
            let transport = stdio::StdioTransport::spawn(
                &descriptor.name,
                stdio::Launch {
                    command,
                    args,
                    env,
                    cwd: cwd.as_deref(),
                },
            )?;
            Ok(Arc::new(transport))
        }
        TransportConfig::RemoteUrl { url, headers } => {
            let transport =
                http::HttpTransport::new(&descriptor.name, url.clone(), headers, request_timeout)?;
            Ok(Arc::new(transport))
        }
    }
}

pub mod http;
pub mod stdio;

#[cfg(test)]
pub mod fake;

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_connect_local_command_missing_binary_fails() {
        let descriptor = ServerDescriptor::local(
            "ghost",
            "/nonexistent/toolbridge/server",
            Vec::<String>::new(),
        );
        let err = connect(&descriptor, Duration::from_secs(1)).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn test_connect_remote_url_builds_without_io() {
        let descriptor = ServerDescriptor::remote(
            "remote",
            url::Url::parse("http://127.0.0.1:9/mcp").unwrap(),
            std::collections::HashMap::new(),
        );
        let transport = connect(&descriptor, Duration::from_secs(1)).unwrap();
        assert_eq!(transport.server(), "remote");
    }

    #[tokio::test]
    async fn test_inbound_has_a_single_consumer() {
        let (tx, inbound) = Inbound::channel();
        let mut stream = inbound.take("alpha").unwrap();
        let err = inbound.take("alpha").err().unwrap();
        assert!(err.to_string().contains("`alpha`"));

        tx.send("{}".to_string()).unwrap();
        drop(tx);
        assert_eq!(stream.next().await.as_deref(), Some("{}"));
        assert!(stream.next().await.is_none());
    }
}
