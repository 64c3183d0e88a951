//! Formatter: renders the internal [`Message`] log into the wire shape a
//! specific router (provider SDK) expects. One formatter per router,
//! swapped only when `switchLLM` changes router, not model.

use serde_json::Value;

use crate::message::{Content, Part, Role};
use crate::message::Message;

/// Renders an internal message log into a router's wire format.
pub trait Formatter: Send + Sync {
    /// Router name this formatter targets (e.g. `"openai"`, `"anthropic"`).
    fn router(&self) -> &str;

    fn format(&self, messages: &[Message]) -> Value;
}

/// Generic chat-completions-style formatter: `{role, content, tool_call_id?}`
/// per message, flattening multi-part bodies to a single string. Suitable
/// as the default/fallback router shape; provider-specific formatters can
/// be layered on top of the same `Message` model.
pub struct GenericFormatter {
    router: String,
}

impl GenericFormatter {
    pub fn new(router: impl Into<String>) -> Self {
        Self {
            router: router.into(),
        }
    }
}

impl Formatter for GenericFormatter {
    fn router(&self) -> &str {
        &self.router
    }

    fn format(&self, messages: &[Message]) -> Value {
        let rendered: Vec<Value> = messages.iter().map(render_message).collect();
        Value::Array(rendered)
    }
}

fn render_message(message: &Message) -> Value {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    let mut obj = serde_json::Map::new();
    obj.insert("role".into(), Value::String(role.to_string()));

    match &message.content {
        Content::Text(text) => {
            obj.insert("content".into(), Value::String(text.clone()));
        }
        Content::Parts(parts) => {
            if let Some(calls) = render_tool_calls(parts) {
                obj.insert("tool_calls".into(), calls);
            }
            if let Some(result) = render_tool_result(parts) {
                obj.insert("content".into(), result);
            } else {
                obj.insert("content".into(), Value::String(message.content.as_text()));
            }
        }
    }

    if let Some(id) = &message.tool_call_id {
        obj.insert("tool_call_id".into(), Value::String(id.clone()));
    }

    Value::Object(obj)
}

fn render_tool_calls(parts: &[Part]) -> Option<Value> {
    let calls: Vec<Value> = parts
        .iter()
        .filter_map(|p| match p {
            Part::ToolCall { id, name, arguments } => Some(serde_json::json!({
                "id": id,
                "type": "function",
                "function": { "name": name, "arguments": arguments },
            })),
            _ => None,
        })
        .collect();
    if calls.is_empty() {
        None
    } else {
        Some(Value::Array(calls))
    }
}

fn render_tool_result(parts: &[Part]) -> Option<Value> {
    parts.iter().find_map(|p| match p {
        Part::ToolResult { result, .. } => Some(result.clone()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_message_renders_role_and_content() {
        let formatter = GenericFormatter::new("openai");
        let out = formatter.format(&[Message::user("hi")]);
        assert_eq!(out[0]["role"], "user");
        assert_eq!(out[0]["content"], "hi");
    }

    #[test]
    fn tool_call_message_renders_tool_calls_array() {
        let formatter = GenericFormatter::new("openai");
        let msg = Message::assistant_tool_call("c1", "add", serde_json::json!({"a": 1}));
        let out = formatter.format(&[msg]);
        assert_eq!(out[0]["tool_calls"][0]["function"]["name"], "add");
    }

    #[test]
    fn tool_result_message_carries_its_call_id() {
        let formatter = GenericFormatter::new("openai");
        let msg = Message::tool_result("c1", serde_json::json!({"sum": 3}));
        let out = formatter.format(&[msg]);
        assert_eq!(out[0]["tool_call_id"], "c1");
        assert_eq!(out[0]["content"]["sum"], 3);
    }
}
