//! The message data model: an immutable record with a role, a
//! text-or-parts content body, an optional tool-call correlation id, and
//! optional provider-opaque metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One part of a multi-part message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    Image { mime_type: String, data: Vec<u8> },
    ToolCall { id: String, name: String, arguments: Value },
    ToolResult { tool_call_id: String, result: Value },
}

/// Either a single text blob or an ordered sequence of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<Part>),
}

impl Content {
    pub fn text(s: impl Into<String>) -> Self {
        Content::Text(s.into())
    }

    /// Best-effort flattening to plain text, concatenating any `Text` parts
    /// (used by tokenizers/formatters that only need a rough size estimate).
    pub fn as_text(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    Part::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Immutable record. No timestamp is intrinsic; ordering is positional
/// within a session's message history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Content,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Content::text(text),
            tool_call_id: None,
            metadata: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::text(text),
            tool_call_id: None,
            metadata: None,
        }
    }

    pub fn assistant_tool_call(id: &str, name: &str, arguments: Value) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::Parts(vec![Part::ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments,
            }]),
            tool_call_id: None,
            metadata: None,
        }
    }

    pub fn tool_result(tool_call_id: &str, result: Value) -> Self {
        Self {
            role: Role::Tool,
            content: Content::Parts(vec![Part::ToolResult {
                tool_call_id: tool_call_id.to_string(),
                result: result.clone(),
            }]),
            tool_call_id: Some(tool_call_id.to_string()),
            metadata: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Content::text(text),
            tool_call_id: None,
            metadata: None,
        }
    }

    /// Tool calls embedded in this message's parts, if any.
    pub fn tool_calls(&self) -> Vec<(&str, &str, &Value)> {
        match &self.content {
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    Part::ToolCall { id, name, arguments } => {
                        Some((id.as_str(), name.as_str(), arguments))
                    }
                    _ => None,
                })
                .collect(),
            Content::Text(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_content_round_trips_through_json() {
        let msg = Message::user("hello");
        let json = serde_json::to_value(&msg).unwrap();
        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back.content.as_text(), "hello");
    }

    #[test]
    fn tool_call_message_exposes_the_call() {
        let msg = Message::assistant_tool_call("k1", "add", serde_json::json!({"a": 2, "b": 3}));
        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "k1");
        assert_eq!(calls[0].1, "add");
    }
}
