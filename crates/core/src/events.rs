//! Event payloads: one tagged-enum variant per event name, with a
//! forwarding shim (see [`crate::session::ChatSession`]) mapping
//! session-bus variants onto global-bus variants that add `sessionId`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events emitted on a single chat session's local bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEventKind {
    #[serde(rename = "llmservice:thinking")]
    Thinking,
    #[serde(rename = "llmservice:chunk")]
    Chunk { text: String, is_complete: bool },
    #[serde(rename = "llmservice:toolCall")]
    ToolCall {
        tool_name: String,
        args: Value,
        call_id: String,
    },
    #[serde(rename = "llmservice:toolResult")]
    ToolResult {
        tool_name: String,
        result: Value,
        call_id: String,
        success: bool,
    },
    #[serde(rename = "llmservice:response")]
    Response {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        token_count: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    #[serde(rename = "llmservice:error")]
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<String>,
        recoverable: bool,
    },
    #[serde(rename = "llmservice:switched")]
    Switched {
        new_config: Value,
        router: String,
        history_retained: bool,
    },
    #[serde(rename = "saiki:conversationReset")]
    ConversationReset,
}

/// Events emitted on the global (process-wide) bus. Every
/// forwarded session event carries `session_id`; the remaining variants are
/// manager-level and never originate from a single session's local bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GlobalEvent {
    /// A session-bus event forwarded with `sessionId` attribution (spec
    /// §4.7 invariant).
    Session {
        session_id: String,
        #[serde(flatten)]
        kind: SessionEventKind,
    },
    #[serde(rename = "saiki:mcpServerConnected")]
    McpServerConnected {
        name: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename = "saiki:availableToolsUpdated")]
    AvailableToolsUpdated { tools: Vec<String>, source: String },
    #[serde(rename = "saiki:llmSwitched")]
    LlmSwitched {
        new_config: Value,
        router: String,
        history_retained: bool,
        session_ids: Vec<String>,
    },
}

impl GlobalEvent {
    pub fn from_session(session_id: impl Into<String>, kind: SessionEventKind) -> Self {
        GlobalEvent::Session {
            session_id: session_id.into(),
            kind,
        }
    }
}
