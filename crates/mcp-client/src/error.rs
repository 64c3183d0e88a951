use thiserror::Error;

/// Error taxonomy for the MCP client manager: connection and not-found
/// kinds. Tool-execution failures are deliberately *not* modeled here —
/// `execute_tool` catches and returns them as a human-readable string
/// rather than raising, so the chat session's loop can hand the failure
/// back to the LM.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("mcp server `{name}` failed to connect: {source}")]
    Connection {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("strict initialization failed: server `{name}` unreachable: {source}")]
    StrictInitFailure {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("no mcp servers configured")]
    NoServersConfigured,

    #[error("lenient initialization failed: none of the configured mcp servers were reachable")]
    AllServersUnreachable,

    #[error("unknown tool: {0}")]
    ToolNotFound(String),

    #[error("mcp server `{0}` not found")]
    ServerNotFound(String),

    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),
}

pub type McpResult<T> = Result<T, McpError>;
