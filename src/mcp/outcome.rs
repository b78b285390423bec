//! Tool invocation outcomes
//!
//! Every handler and every remote tool call in this crate produces exactly
//! one [`ToolOutcome`]: either a [`ToolResponse`] or a [`ToolError`]. Errors
//! are values, not faults, so the transport never needs an out-of-band error
//! channel and callers branch on the variant they received.
//!
//! On the wire an outcome travels inside a `tools/call` result: the text
//! content carries the human-readable string and `structuredContent` carries
//! the outcome object verbatim (`{response, chat_id}` or `{error, chat_id}`).

use serde::{Deserialize, Serialize};

use crate::mcp::types::{CallToolResponse, ContentItem};

/// A successful handler or tool result.
///
/// `chat_id` correlates the reply with a conversation. When the caller sent
/// no chat id the handler may mint one; the caller persists it for later
/// turns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResponse {
    /// The response payload.
    pub response: String,
    /// Conversation correlation id; empty before a chat is established.
    #[serde(default)]
    pub chat_id: String,
}

/// A failed handler or tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolError {
    /// Description of what went wrong.
    pub error: String,
    /// Conversation correlation id; empty when none is known.
    #[serde(default)]
    pub chat_id: String,
}

/// The result of any invocation: a response or an error, never both.
///
/// Serialized untagged; the two variants have disjoint field sets so the
/// JSON shape alone identifies the variant.
///
/// # Examples
///
/// ```
/// use toolbridge::mcp::outcome::ToolOutcome;
///
/// let ok = ToolOutcome::response("hi", "");
/// assert!(ok.is_response());
/// assert_eq!(serde_json::to_value(&ok).unwrap(), serde_json::json!({"response": "hi", "chat_id": ""}));
///
/// let err = ToolOutcome::error("boom", "chat-1");
/// assert_eq!(err.chat_id(), "chat-1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutcome {
    /// Successful result.
    Response(ToolResponse),
    /// Failed result.
    Error(ToolError),
}

impl ToolOutcome {
    /// Build a [`ToolOutcome::Response`].
    pub fn response(response: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self::Response(ToolResponse {
            response: response.into(),
            chat_id: chat_id.into(),
        })
    }

    /// Build a [`ToolOutcome::Error`].
    pub fn error(error: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self::Error(ToolError {
            error: error.into(),
            chat_id: chat_id.into(),
        })
    }

    /// `true` for [`ToolOutcome::Response`].
    pub fn is_response(&self) -> bool {
        matches!(self, Self::Response(_))
    }

    /// `true` for [`ToolOutcome::Error`].
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// The correlation id carried by either variant.
    pub fn chat_id(&self) -> &str {
        match self {
            Self::Response(r) => &r.chat_id,
            Self::Error(e) => &e.chat_id,
        }
    }

    /// The response text or the error description.
    pub fn text(&self) -> &str {
        match self {
            Self::Response(r) => &r.response,
            Self::Error(e) => &e.error,
        }
    }

    /// Encode as a `tools/call` result.
    pub fn into_call_result(self) -> CallToolResponse {
        let structured = serde_json::to_value(&self).ok();
        let is_error = self.is_error();
        let text = match self {
            Self::Response(r) => r.response,
            Self::Error(e) => e.error,
        };
        CallToolResponse {
            content: vec![ContentItem::Text { text }],
            is_error: Some(is_error),
            structured_content: structured,
        }
    }

    /// Decode a `tools/call` result.
    ///
    /// `structuredContent` wins when it is an outcome object. Otherwise the
    /// text items are joined with newlines and `isError` selects the
    /// variant, with an empty chat id. Non-text items are ignored.
    pub fn from_call_result(result: CallToolResponse) -> Self {
        if let Some(structured) = result.structured_content {
            if let Ok(outcome) = serde_json::from_value::<ToolOutcome>(structured) {
                return outcome;
            }
        }

        let text = result
            .content
            .into_iter()
            .filter_map(|item| match item {
                ContentItem::Text { text } => Some(text),
                ContentItem::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        if result.is_error.unwrap_or(false) {
            Self::error(text, "")
        } else {
            Self::response(text, "")
        }
    }
}

impl From<ToolResponse> for ToolOutcome {
    fn from(value: ToolResponse) -> Self {
        Self::Response(value)
    }
}

impl From<ToolError> for ToolOutcome {
    fn from(value: ToolError) -> Self {
        Self::Error(value)
    }
}
