use thiserror::Error;

/// Error taxonomy for the agent core: configuration, not-found,
/// limit-exceeded, and init-fatal kinds surfaced by the session manager,
/// chat session, and agent façade.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("maximum session count ({max}) exceeded")]
    SessionLimitExceeded { max: usize },

    #[error("session initialization failed: {0}")]
    InitFailed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("llm service error: {0}")]
    Llm(String),

    #[error(transparent)]
    Storage(#[from] agent_storage::StorageError),

    #[error(transparent)]
    Mcp(#[from] agent_mcp_client::McpError),
}

pub type CoreResult<T> = Result<T, CoreError>;
