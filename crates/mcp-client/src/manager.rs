//! MCP client manager: a pool of named connections plus name→client
//! routing indexes for tools and prompts, shared across every chat
//! session.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::config::{InitMode, McpServerConfig};
use crate::connection::{ConnectionState, McpConnection};
use crate::error::{McpError, McpResult};
use crate::tool::{PromptDescriptor, ToolDescriptor};

/// One entry of the failed-connections report surfaced after a lenient
/// `initialize_from_config`.
#[derive(Debug, Clone)]
pub struct FailedConnection {
    pub name: String,
    pub error: String,
}

pub struct McpClientManager {
    connections: RwLock<HashMap<String, Arc<McpConnection>>>,
    /// Name→client routing index, rebuilt on every `get_all_tools` (spec
    /// §3 "Tool Binding"). Last registrant wins on a name collision.
    tool_index: RwLock<HashMap<String, Arc<McpConnection>>>,
    failed: RwLock<Vec<FailedConnection>>,
}

impl McpClientManager {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            tool_index: RwLock::new(HashMap::new()),
            failed: RwLock::new(Vec::new()),
        }
    }

    /// Attempts each configured server in turn. `Strict` requires every
    /// server to connect (first failure aborts and is returned); `Lenient`
    /// requires at least one success when any server was configured, and
    /// records unreachable servers for `failed_connections` as a
    /// connection-error kind.
    pub async fn initialize_from_config(
        &self,
        configs: HashMap<String, McpServerConfig>,
        mode: InitMode,
    ) -> McpResult<()> {
        if configs.is_empty() {
            return Ok(());
        }

        let mut failed = Vec::new();
        let mut succeeded = 0usize;

        for (name, config) in configs {
            let conn = Arc::new(McpConnection::new(name.clone(), config));
            match conn.connect().await {
                Ok(()) => {
                    succeeded += 1;
                    self.connections.write().await.insert(name.clone(), conn);
                }
                Err(e) => {
                    if mode == InitMode::Strict {
                        return Err(McpError::StrictInitFailure {
                            name: name.clone(),
                            source: anyhow::anyhow!(e.to_string()),
                        });
                    }
                    log::warn!("mcp server `{name}` failed to connect (lenient mode): {e}");
                    failed.push(FailedConnection {
                        name,
                        error: e.to_string(),
                    });
                }
            }
        }

        *self.failed.write().await = failed;

        if succeeded == 0 && mode == InitMode::Lenient {
            return Err(McpError::AllServersUnreachable);
        }

        Ok(())
    }

    pub async fn failed_connections(&self) -> Vec<FailedConnection> {
        self.failed.read().await.clone()
    }

    /// Queries every live connection for its tools and rebuilds the
    /// name→client index. On a name collision, the last iteration's client
    /// wins and a warning is logged.
    pub async fn get_all_tools(&self) -> McpResult<HashMap<String, ToolDescriptor>> {
        let connections: Vec<Arc<McpConnection>> =
            self.connections.read().await.values().cloned().collect();

        let mut merged = HashMap::new();
        let mut index = HashMap::new();

        for conn in connections {
            if conn.state().await != ConnectionState::Live {
                continue;
            }
            let tools = match conn.list_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    log::warn!("mcp server `{}` failed to list tools: {e}", conn.name);
                    continue;
                }
            };
            for tool in tools {
                if merged.contains_key(&tool.name) {
                    log::warn!(
                        "tool name collision for `{}`: server `{}` overrides the previous registrant",
                        tool.name,
                        conn.name
                    );
                }
                index.insert(tool.name.clone(), Arc::clone(&conn));
                merged.insert(tool.name.clone(), tool);
            }
        }

        *self.tool_index.write().await = index;
        Ok(merged)
    }

    pub async fn get_all_prompts(&self) -> McpResult<HashMap<String, PromptDescriptor>> {
        let connections: Vec<Arc<McpConnection>> =
            self.connections.read().await.values().cloned().collect();
        let mut merged = HashMap::new();
        for conn in connections {
            if conn.state().await != ConnectionState::Live {
                continue;
            }
            match conn.list_prompts().await {
                Ok(prompts) => {
                    for p in prompts {
                        merged.insert(p.name.clone(), p);
                    }
                }
                Err(e) => log::warn!("mcp server `{}` failed to list prompts: {e}", conn.name),
            }
        }
        Ok(merged)
    }

    /// Looks up the owning client and forwards the call. Failures are
    /// caught and returned as a human-readable string rather than
    /// propagated as an error, so the chat session's loop can hand the
    /// failure back to the LM and continue.
    pub async fn execute_tool(&self, name: &str, args: Value) -> String {
        let conn = {
            let index = self.tool_index.read().await;
            index.get(name).cloned()
        };
        let Some(conn) = conn else {
            return format!("error: unknown tool `{name}`");
        };
        match conn.call_tool(name, args).await {
            Ok(result) => result.to_string(),
            Err(e) => format!("error: tool `{name}` failed: {e}"),
        }
    }

    /// Best-effort `close` on every connection; clears all indexes; never
    /// throws for an individual failure.
    pub async fn disconnect_all(&self) {
        let connections: Vec<Arc<McpConnection>> =
            self.connections.write().await.drain().map(|(_, c)| c).collect();
        for conn in connections {
            conn.disconnect().await;
        }
        self.tool_index.write().await.clear();
        self.failed.write().await.clear();
    }

    pub async fn connection_names(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }
}

impl Default for McpClientManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::McpTransportConfig;
    use std::collections::HashMap as Map;

    fn unreachable_stdio(name: &str) -> (String, McpServerConfig) {
        (
            name.to_string(),
            McpServerConfig {
                transport: McpTransportConfig::Stdio {
                    command: "definitely-not-a-real-binary-xyz".to_string(),
                    args: vec![],
                    env: Map::new(),
                    timeout: 1,
                },
            },
        )
    }

    #[tokio::test]
    async fn strict_mode_fails_on_first_unreachable_server() {
        let manager = McpClientManager::new();
        let mut configs = HashMap::new();
        let (name, cfg) = unreachable_stdio("a");
        configs.insert(name, cfg);
        let err = manager
            .initialize_from_config(configs, InitMode::Strict)
            .await;
        assert!(matches!(err, Err(McpError::StrictInitFailure { .. })));
    }

    #[tokio::test]
    async fn lenient_mode_records_failure_without_erroring_when_others_succeed() {
        // This test only exercises the all-unreachable lenient path, since a
        // genuinely reachable stdio server isn't available in this test
        // environment; scenario 6's "one reachable" half is exercised at
        // the Chat Session integration level with a stub connection.
        let manager = McpClientManager::new();
        let mut configs = HashMap::new();
        let (name, cfg) = unreachable_stdio("a");
        configs.insert(name, cfg);
        let err = manager
            .initialize_from_config(configs, InitMode::Lenient)
            .await;
        assert!(matches!(err, Err(McpError::AllServersUnreachable)));
        let failed = manager.failed_connections().await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].name, "a");
    }

    #[tokio::test]
    async fn execute_tool_on_unknown_name_returns_error_string_not_raised() {
        let manager = McpClientManager::new();
        let result = manager.execute_tool("nonexistent", serde_json::json!({})).await;
        assert!(result.contains("unknown tool"));
    }

    #[tokio::test]
    async fn empty_config_is_a_no_op() {
        let manager = McpClientManager::new();
        manager
            .initialize_from_config(HashMap::new(), InitMode::Strict)
            .await
            .unwrap();
        assert!(manager.connection_names().await.is_empty());
    }
}
