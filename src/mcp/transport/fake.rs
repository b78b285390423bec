//! Channel-backed [`Transport`] for unit tests
//!
//! [`FakeTransport::new`] returns the transport plus a [`FakeTransportHandle`]
//! playing the remote peer:
//!
//! ```text
//! transport.send()    --> handle.outbound_rx
//! handle.inbound_tx   --> transport.take_inbound()
//! ```
//!
//! Dropping the handle closes the outbound side, so subsequent sends fail the
//! way a dead child process or refused connection would.

use tokio::sync::mpsc;

use crate::error::{Result, ToolbridgeError};
use crate::mcp::transport::{Inbound, MessageStream, Transport};

#[derive(Debug)]
pub struct FakeTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    inbound: Inbound,
}

/// The peer side of a [`FakeTransport`].
#[derive(Debug)]
pub struct FakeTransportHandle {
    /// Everything the transport sent, in order.
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
    /// Messages pushed here come out of [`Transport::take_inbound`].
    pub inbound_tx: mpsc::UnboundedSender<String>,
}

impl FakeTransport {
    pub fn new() -> (Self, FakeTransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = Inbound::channel();
        (
            Self {
                outbound_tx,
                inbound,
            },
            FakeTransportHandle {
                outbound_rx,
                inbound_tx,
            },
        )
    }
}

impl FakeTransportHandle {
    /// Wait for the next outbound message and parse it.
    pub async fn next_sent(&mut self) -> Option<serde_json::Value> {
        let raw = self.outbound_rx.recv().await?;
        serde_json::from_str(&raw).ok()
    }

    /// Deliver `message` to the transport's receive stream.
    pub fn deliver(&self, message: serde_json::Value) {
        let _ = self.inbound_tx.send(message.to_string());
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    fn server(&self) -> &str {
        "fake"
    }

    async fn send(&self, message: String) -> Result<()> {
        self.outbound_tx.send(message).map_err(|_| {
            ToolbridgeError::McpTransport("fake peer hung up".to_string()).into()
        })
    }

    fn take_inbound(&self) -> Result<MessageStream> {
        self.inbound.take("fake")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_peer_sees_sent_messages_in_order() {
        let (transport, mut peer) = FakeTransport::new();
        for id in 1..=3 {
            transport
                .send(serde_json::json!({ "jsonrpc": "2.0", "id": id, "method": "ping" }).to_string())
                .await
                .unwrap();
        }
        for id in 1..=3 {
            assert_eq!(peer.next_sent().await.unwrap()["id"], id);
        }
    }

    #[tokio::test]
    async fn test_delivered_messages_are_received() {
        let (transport, peer) = FakeTransport::new();
        peer.deliver(serde_json::json!({ "jsonrpc": "2.0", "id": 4, "result": {} }));

        let raw = transport.take_inbound().unwrap().next().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["id"], 4);
        assert!(transport.take_inbound().is_err());
    }

    #[tokio::test]
    async fn test_send_fails_once_peer_is_gone() {
        let (transport, peer) = FakeTransport::new();
        drop(peer);
        let err = transport.send("{}".to_string()).await.unwrap_err();
        assert!(err.to_string().contains("hung up"));
    }
}
