//! MCP server configuration shapes.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_timeout() -> u64 {
    30
}

/// One configured MCP server: `name → config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    #[serde(flatten)]
    pub transport: McpTransportConfig,
}

/// `{type: "stdio"|"sse"|"http", …}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpTransportConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default = "default_timeout")]
        timeout: u64,
    },
    Sse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default = "default_timeout")]
        timeout: u64,
    },
    Http {
        base_url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default = "default_timeout")]
        timeout: u64,
    },
}

impl McpTransportConfig {
    pub fn timeout(&self) -> Duration {
        let secs = match self {
            McpTransportConfig::Stdio { timeout, .. }
            | McpTransportConfig::Sse { timeout, .. }
            | McpTransportConfig::Http { timeout, .. } => *timeout,
        };
        Duration::from_secs(secs)
    }
}

/// Mode passed to `initialize_from_config`: `strict` requires
/// every configured server to connect; `lenient` requires at least one
/// success when any server was configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitMode {
    Strict,
    Lenient,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdio_config_deserializes_with_default_timeout() {
        let json = serde_json::json!({
            "type": "stdio",
            "command": "mcp-server-fs",
            "args": ["--root", "/tmp"],
        });
        let cfg: McpServerConfig = serde_json::from_value(json).unwrap();
        match cfg.transport {
            McpTransportConfig::Stdio { command, timeout, .. } => {
                assert_eq!(command, "mcp-server-fs");
                assert_eq!(timeout, 30);
            }
            _ => panic!("expected stdio"),
        }
    }
}
