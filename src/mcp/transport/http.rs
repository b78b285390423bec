//! Remote endpoint transport (Streamable HTTP)
//!
//! Every outbound message is one POST to the configured endpoint. The reply
//! is either a JSON body, an event stream carrying one or more messages, or
//! `202 Accepted` with nothing to deliver. The configured headers, the
//! protocol version and (once the server hands one out) the session id ride
//! on every request. Dropping the transport ends the session with a DELETE.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use tokio::sync::mpsc;

use crate::error::{Result, ToolbridgeError};
use crate::mcp::transport::{Inbound, MessageStream, Transport};
use crate::mcp::types::LATEST_PROTOCOL_VERSION;

/// Header carrying the server-assigned session id.
pub const SESSION_HEADER: &str = "MCP-Session-Id";

/// Header carrying the protocol revision on every request.
pub const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";

/// Transport to a server reachable at an HTTP endpoint.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use std::time::Duration;
/// use toolbridge::mcp::transport::http::HttpTransport;
///
/// let mut headers = HashMap::new();
/// headers.insert("Authorization".to_string(), "Bearer s3cret".to_string());
/// let transport = HttpTransport::new(
///     "search",
///     url::Url::parse("http://localhost:3000/mcp").unwrap(),
///     &headers,
///     Duration::from_secs(30),
/// )
/// .unwrap();
/// ```
#[derive(Debug)]
pub struct HttpTransport {
    server: String,
    endpoint: url::Url,
    client: reqwest::Client,
    /// Configured headers plus the protocol version, already validated.
    headers: HeaderMap,
    session: Arc<Mutex<Option<HeaderValue>>>,
    inbound_tx: mpsc::UnboundedSender<String>,
    inbound: Inbound,
}

impl HttpTransport {
    /// Build a transport for `endpoint`. No request is made until the first
    /// [`Transport::send`].
    ///
    /// `timeout` bounds each individual request, event streams included.
    ///
    /// # Errors
    ///
    /// Returns [`ToolbridgeError::McpTransport`] for a header that is not a
    /// valid HTTP header, or if the HTTP client cannot be built.
    pub fn new(
        server: &str,
        endpoint: url::Url,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let headers = request_headers(server, headers)?;
        let client = reqwest::Client::builder()
            .default_headers(headers.clone())
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ToolbridgeError::McpTransport(format!(
                    "server `{server}`: failed to build HTTP client: {e}"
                ))
            })?;
        let (inbound_tx, inbound) = Inbound::channel();

        Ok(Self {
            server: server.to_string(),
            endpoint,
            client,
            headers,
            session: Arc::new(Mutex::new(None)),
            inbound_tx,
            inbound,
        })
    }

    /// The endpoint every message is POSTed to.
    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }

    fn session(&self) -> Option<HeaderValue> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_session(&self, value: Option<HeaderValue>) {
        *self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = value;
    }

    /// Map a non-success status to the error the caller sees.
    fn reject(&self, response: &reqwest::Response, had_session: bool) -> anyhow::Error {
        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED => {
                let challenge = response
                    .headers()
                    .get(WWW_AUTHENTICATE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("no challenge");
                ToolbridgeError::McpAuth(format!(
                    "server `{}` rejected the request ({challenge})",
                    self.server
                ))
                .into()
            }
            StatusCode::NOT_FOUND if had_session => {
                self.set_session(None);
                ToolbridgeError::Mcp(format!("session expired on server `{}`", self.server)).into()
            }
            _ => ToolbridgeError::McpTransport(format!(
                "server `{}` answered HTTP {status}",
                self.server
            ))
            .into(),
        }
    }
}

/// Validate the configured headers and add the fixed protocol headers.
fn request_headers(server: &str, configured: &HashMap<String, String>) -> Result<HeaderMap> {
    let invalid = |name: &str, reason: String| {
        ToolbridgeError::McpTransport(format!("server `{server}`: invalid header `{name}`: {reason}"))
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/event-stream"),
    );
    headers.insert(
        HeaderName::from_static("mcp-protocol-version"),
        HeaderValue::from_static(LATEST_PROTOCOL_VERSION),
    );
    for (name, value) in configured {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(name, e.to_string()))?;
        let mut header_value =
            HeaderValue::from_str(value).map_err(|e| invalid(name, e.to_string()))?;
        if header_name == reqwest::header::AUTHORIZATION {
            header_value.set_sensitive(true);
        }
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

fn is_event_stream(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"))
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    fn server(&self) -> &str {
        &self.server
    }

    /// POST `message` and queue whatever the server sends back.
    ///
    /// # Errors
    ///
    /// - [`ToolbridgeError::McpAuth`] on `401`.
    /// - [`ToolbridgeError::Mcp`] ("session expired") on `404` while a
    ///   session is open; the session is forgotten.
    /// - [`ToolbridgeError::McpTransport`] for any other failure.
    async fn send(&self, message: String) -> Result<()> {
        let session = self.session();
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(message);
        if let Some(id) = &session {
            request = request.header(SESSION_HEADER, id.clone());
        }

        let response = request.send().await.map_err(|e| {
            ToolbridgeError::McpTransport(format!("POST to server `{}` failed: {e}", self.server))
        })?;
        if !response.status().is_success() {
            return Err(self.reject(&response, session.is_some()));
        }

        if session.is_none() {
            if let Some(id) = response.headers().get(SESSION_HEADER) {
                tracing::debug!(server = %self.server, "session opened");
                self.set_session(Some(id.clone()));
            }
        }

        if response.status() == StatusCode::ACCEPTED {
            return Ok(());
        }
        if is_event_stream(&response) {
            tokio::spawn(forward_events(
                self.server.clone(),
                response,
                self.inbound_tx.clone(),
            ));
            return Ok(());
        }

        let body = response.text().await.map_err(|e| {
            ToolbridgeError::McpTransport(format!(
                "reading reply from server `{}` failed: {e}",
                self.server
            ))
        })?;
        if !body.trim().is_empty() {
            let _ = self.inbound_tx.send(body);
        }
        Ok(())
    }

    fn take_inbound(&self) -> Result<MessageStream> {
        self.inbound.take(&self.server)
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        let Some(session) = self.session() else {
            return;
        };
        let endpoint = self.endpoint.clone();
        let mut headers = self.headers.clone();
        headers.insert(HeaderName::from_static("mcp-session-id"), session);
        let server = self.server.clone();

        // The blocking client must not run on a runtime thread.
        std::thread::spawn(move || {
            let result = reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .and_then(|client| client.delete(endpoint).headers(headers).send());
            if let Err(e) = result {
                tracing::debug!(server = %server, "closing session failed: {e}");
            }
        });
    }
}

/// Push every message of an event-stream reply into `inbound`.
async fn forward_events(
    server: String,
    response: reqwest::Response,
    inbound: mpsc::UnboundedSender<String>,
) {
    let mut decoder = EventDecoder::default();
    let mut chunks = response.bytes_stream();
    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(bytes) => {
                for message in decoder.feed(&bytes) {
                    if inbound.send(message).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(server = %server, "event stream broke off: {e}");
                break;
            }
        }
    }
    if let Some(message) = decoder.finish() {
        let _ = inbound.send(message);
    }
}

/// Incremental `text/event-stream` decoder yielding the `data` of each
/// event.
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across chunks survive. Keep-alive events (`event: ping`
/// or `data: [PING]`) and comments are dropped; `id` and `retry` fields are
/// ignored.
#[derive(Debug, Default)]
pub struct EventDecoder {
    partial: BytesMut,
    event: Option<String>,
    data: Vec<String>,
}

impl EventDecoder {
    /// Consume one chunk and return the events it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);
        let mut completed = Vec::new();
        while let Some(end) = self.partial.iter().position(|&b| b == b'\n') {
            let raw = self.partial.split_to(end + 1);
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(message) = self.line(line) {
                completed.push(message);
            }
        }
        completed
    }

    /// Flush an event left open when the stream ended without a blank line.
    pub fn finish(mut self) -> Option<String> {
        if !self.partial.is_empty() {
            let rest = String::from_utf8_lossy(&self.partial.split()).into_owned();
            self.line(rest.trim_end_matches('\r'));
        }
        self.dispatch()
    }

    fn line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        let event = self.event.take();
        let data = std::mem::take(&mut self.data).join("\n");
        let keep_alive = event.as_deref().is_some_and(|e| e.eq_ignore_ascii_case("ping"))
            || data.eq_ignore_ascii_case("[ping]");
        if keep_alive || data.is_empty() {
            None
        } else {
            Some(data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_headers_are_validated() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer k".to_string());
        let map = request_headers("alpha", &headers).unwrap();
        assert!(map[reqwest::header::AUTHORIZATION].is_sensitive());
        assert_eq!(map[PROTOCOL_VERSION_HEADER], LATEST_PROTOCOL_VERSION);

        headers.insert("bad header".to_string(), "x".to_string());
        let err = HttpTransport::new(
            "alpha",
            url::Url::parse("http://localhost:9/mcp").unwrap(),
            &headers,
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid header `bad header`"), "{err}");
    }

    #[test]
    fn test_decoder_splits_events_and_drops_keep_alives() {
        let mut decoder = EventDecoder::default();
        let events = decoder.feed(
            b": comment\n\nevent: ping\ndata: x\n\ndata: [PING]\n\nid: 7\ndata: {\"id\":1}\n\n",
        );
        assert_eq!(events, vec![r#"{"id":1}"#.to_string()]);
    }

    #[test]
    fn test_decoder_handles_crlf_and_multiline_data() {
        let mut decoder = EventDecoder::default();
        let events = decoder.feed(b"data: first\r\ndata: second\r\n\r\n");
        assert_eq!(events, vec!["first\nsecond".to_string()]);
    }

    #[test]
    fn test_decoder_reassembles_split_chunks() {
        let text = "data: {\"text\":\"h\u{e9}llo\"}\n\n".as_bytes();
        // Split inside the two-byte `é`.
        let cut = text.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let mut decoder = EventDecoder::default();
        assert!(decoder.feed(&text[..cut]).is_empty());
        assert_eq!(
            decoder.feed(&text[cut..]),
            vec!["{\"text\":\"h\u{e9}llo\"}".to_string()]
        );
    }

    #[test]
    fn test_decoder_flushes_unterminated_event() {
        let mut decoder = EventDecoder::default();
        assert!(decoder.feed(b"data: tail").is_empty());
        assert_eq!(decoder.finish().as_deref(), Some("tail"));
    }

    #[tokio::test]
    async fn test_new_performs_no_io_and_starts_without_session() {
        let transport = HttpTransport::new(
            "remote",
            url::Url::parse("http://localhost:9/mcp").unwrap(),
            &HashMap::new(),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(transport.endpoint().path(), "/mcp");
        assert_eq!(transport.server(), "remote");
        assert!(transport.session().is_none());
    }
}
