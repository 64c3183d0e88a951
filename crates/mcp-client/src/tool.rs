use serde_json::Value;

/// Tool descriptor surfaced to the chat session / LM service, adapted from
/// `rmcp::model::Tool` into a single flat struct.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl From<rmcp::model::Tool> for ToolDescriptor {
    fn from(tool: rmcp::model::Tool) -> Self {
        Self {
            name: tool.name.into_owned(),
            description: tool.description.map(|d| d.into_owned()).unwrap_or_default(),
            input_schema: Value::Object((*tool.input_schema).clone()),
        }
    }
}

/// A prompt descriptor, the MCP analogue of [`ToolDescriptor`]. Tool and
/// prompt listings are cached on first successful fetch.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PromptDescriptor {
    pub name: String,
    pub description: Option<String>,
}

impl From<rmcp::model::Prompt> for PromptDescriptor {
    fn from(p: rmcp::model::Prompt) -> Self {
        Self {
            name: p.name,
            description: p.description,
        }
    }
}
