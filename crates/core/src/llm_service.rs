//! LM service object capability: `completeTask`, `getAllTools`,
//! `getConfig`. The single request/response shape the chat session's
//! tool-calling loop actually drives: one call per iteration, returning
//! either a terminal text or a batch of tool calls to execute before
//! looping again.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One LM-requested tool invocation within a single turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

/// The LM's reply to one `complete_task` call: either a terminal answer or
/// a batch of tool calls the chat session must execute and feed back
/// before asking again.
#[derive(Debug, Clone)]
pub enum LlmTurn {
    Final { text: String, token_count: Option<u64> },
    ToolCalls(Vec<ToolCall>),
}

/// Effective configuration the chat session needs to decide whether a
/// `switchLLM` requires rebuilding the tokenizer/formatter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub router: String,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_max_iterations() -> u32 {
    50
}

/// The object capability a chat session drives its tool-calling loop
/// against. One implementation wraps a provider SDK call; the chat
/// session never speaks the provider's wire protocol directly.
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Advances the conversation by one LM turn given the rendered message
    /// log (already run through the session's [`crate::formatter::Formatter`]).
    /// `image_data` carries an optional inline attachment for the turn that
    /// just started (only meaningful on the first iteration of a `run`).
    async fn complete_task(
        &self,
        rendered_messages: &Value,
        image_data: Option<&[u8]>,
    ) -> Result<LlmTurn, LlmServiceError>;

    /// Tool descriptors to advertise to the LM on this and subsequent
    /// calls.
    async fn get_all_tools(&self) -> Vec<ToolDescriptor>;

    fn get_config(&self) -> LlmConfig;
}

/// Tool descriptor shape the LM service hands to the provider SDK.
/// Structurally identical to `agent_mcp_client::ToolDescriptor`; kept as a
/// separate type here so `agent-core` does not need to depend on
/// `agent-mcp-client`'s wire-adaptation concerns to describe the LM-facing
/// contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl From<agent_mcp_client::ToolDescriptor> for ToolDescriptor {
    fn from(t: agent_mcp_client::ToolDescriptor) -> Self {
        Self {
            name: t.name,
            description: t.description,
            input_schema: t.input_schema,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmServiceError {
    #[error("llm request timed out")]
    Timeout,
    #[error("llm request cancelled")]
    Cancelled,
    #[error("llm provider error: {0}")]
    Provider(String),
}
