//! A single MCP connection: owns a transport + client handle and tracks
//! lifecycle state (stdio via `TokioChildProcess`, SSE/HTTP via `rmcp`'s
//! reqwest-backed transports).

use std::time::Duration;

use rmcp::model::{
    CallToolRequestParam, ClientCapabilities, ClientInfo, Implementation, PaginatedRequestParam,
    ProtocolVersion,
};
use rmcp::service::{DynService, RunningService};
use rmcp::{RoleClient, ServiceExt};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::config::{McpServerConfig, McpTransportConfig};
use crate::error::{McpError, McpResult};
use crate::tool::{PromptDescriptor, ToolDescriptor};

pub type McpService = RunningService<RoleClient, Box<dyn DynService<RoleClient>>>;

/// Lifecycle state of an [`McpConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Live,
    Failed,
    Closed,
}

struct Inner {
    state: ConnectionState,
    service: Option<McpService>,
    cached_tools: Option<Vec<ToolDescriptor>>,
    cached_prompts: Option<Vec<PromptDescriptor>>,
    last_error: Option<String>,
}

/// An `{ name, transport, state, cachedTools, cachedPrompts, lastError? }`
/// record. Cached tools/prompts are invalidated on any transition out of
/// `Live`.
pub struct McpConnection {
    pub name: String,
    config: McpServerConfig,
    inner: RwLock<Inner>,
}

impl McpConnection {
    pub fn new(name: impl Into<String>, config: McpServerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: RwLock::new(Inner {
                state: ConnectionState::Idle,
                service: None,
                cached_tools: None,
                cached_prompts: None,
                last_error: None,
            }),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.read().await.state
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.read().await.last_error.clone()
    }

    pub fn timeout(&self) -> Duration {
        self.config.transport.timeout()
    }

    /// Performs the transport handshake, bounded by this server's configured
    /// timeout. On success, transitions to `Live`; on failure, to `Failed`
    /// with the error captured.
    pub async fn connect(&self) -> McpResult<()> {
        {
            let mut guard = self.inner.write().await;
            guard.state = ConnectionState::Connecting;
        }

        let timeout = self.timeout();
        let result = tokio::time::timeout(timeout, start_transport(&self.config.transport)).await;

        let mut guard = self.inner.write().await;
        match result {
            Ok(Ok(service)) => {
                guard.service = Some(service);
                guard.state = ConnectionState::Live;
                guard.last_error = None;
                Ok(())
            }
            Ok(Err(e)) => {
                guard.state = ConnectionState::Failed;
                guard.last_error = Some(e.to_string());
                Err(McpError::Connection {
                    name: self.name.clone(),
                    source: e,
                })
            }
            Err(_) => {
                let e = anyhow::anyhow!("handshake timed out after {:?}", timeout);
                guard.state = ConnectionState::Failed;
                guard.last_error = Some(e.to_string());
                Err(McpError::Connection {
                    name: self.name.clone(),
                    source: e,
                })
            }
        }
    }

    pub async fn disconnect(&self) {
        let mut guard = self.inner.write().await;
        if let Some(service) = guard.service.take() {
            let _ = service.cancel().await;
        }
        guard.state = ConnectionState::Closed;
        guard.cached_tools = None;
        guard.cached_prompts = None;
    }

    /// Lists tools, using the cache populated on first successful fetch.
    pub async fn list_tools(&self) -> McpResult<Vec<ToolDescriptor>> {
        {
            let guard = self.inner.read().await;
            if let Some(cached) = &guard.cached_tools {
                return Ok(cached.clone());
            }
        }
        let mut guard = self.inner.write().await;
        let Some(service) = &guard.service else {
            return Err(McpError::ServerNotFound(self.name.clone()));
        };
        let result = service
            .list_tools(Some(PaginatedRequestParam::default()))
            .await
            .map_err(|e| McpError::Connection {
                name: self.name.clone(),
                source: anyhow::Error::from(e),
            })?;
        let tools: Vec<ToolDescriptor> = result.tools.into_iter().map(ToolDescriptor::from).collect();
        guard.cached_tools = Some(tools.clone());
        Ok(tools)
    }

    pub async fn list_prompts(&self) -> McpResult<Vec<PromptDescriptor>> {
        {
            let guard = self.inner.read().await;
            if let Some(cached) = &guard.cached_prompts {
                return Ok(cached.clone());
            }
        }
        let mut guard = self.inner.write().await;
        let Some(service) = &guard.service else {
            return Err(McpError::ServerNotFound(self.name.clone()));
        };
        let result = service
            .list_prompts(Some(PaginatedRequestParam::default()))
            .await
            .map_err(|e| McpError::Connection {
                name: self.name.clone(),
                source: anyhow::Error::from(e),
            })?;
        let prompts: Vec<PromptDescriptor> =
            result.prompts.into_iter().map(PromptDescriptor::from).collect();
        guard.cached_prompts = Some(prompts.clone());
        Ok(prompts)
    }

    /// Invokes `tool_name` with either a structured object or a JSON string
    /// (parsed; unparseable strings wrapped as `{"input": str}` — spec
    /// §4.5).
    pub async fn call_tool(&self, tool_name: &str, args: Value) -> McpResult<Value> {
        let arguments = coerce_arguments(args);
        let guard = self.inner.read().await;
        let Some(service) = &guard.service else {
            return Err(McpError::ServerNotFound(self.name.clone()));
        };
        let result = service
            .call_tool(CallToolRequestParam {
                name: tool_name.to_string().into(),
                arguments,
            })
            .await
            .map_err(|e| McpError::Connection {
                name: self.name.clone(),
                source: anyhow::Error::from(e),
            })?;
        serde_json::to_value(result).map_err(|e| McpError::InvalidArguments(e.to_string()))
    }
}

/// Normalizes tool call arguments: a JSON object passes through, a JSON
/// string is parsed and re-coerced, and anything else unparseable is
/// wrapped as `{"input": <original string>}`.
fn coerce_arguments(args: Value) -> Option<Map<String, Value>> {
    match args {
        Value::Object(map) => Some(map),
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Object(map)) => Some(map),
            _ => {
                let mut map = Map::new();
                map.insert("input".to_string(), Value::String(s));
                Some(map)
            }
        },
        Value::Null => None,
        other => {
            let mut map = Map::new();
            map.insert("input".to_string(), other);
            Some(map)
        }
    }
}

async fn start_transport(transport: &McpTransportConfig) -> anyhow::Result<McpService> {
    let client_info = ClientInfo {
        protocol_version: ProtocolVersion::default(),
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "agent-core".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    };

    match transport {
        McpTransportConfig::Stdio { command, args, env, .. } => {
            if which::which(command).is_err() && !std::path::Path::new(command).exists() {
                anyhow::bail!("command not found: {command}");
            }
            let mut cmd = tokio::process::Command::new(command);
            cmd.args(args)
                .envs(env)
                .stderr(std::process::Stdio::inherit())
                .stdout(std::process::Stdio::piped())
                .stdin(std::process::Stdio::piped());
            let child = rmcp::transport::child_process::TokioChildProcess::new(cmd)?;
            let service = client_info.into_dyn().serve(child).await?;
            log::trace!("mcp stdio connected: {:#?}", service.peer_info());
            Ok(service)
        }
        McpTransportConfig::Sse { url, headers, .. } => {
            let client = http_client(headers)?;
            let transport = rmcp::transport::SseClientTransport::start_with_client(
                client,
                rmcp::transport::sse_client::SseClientConfig {
                    sse_endpoint: url.clone().into(),
                    ..Default::default()
                },
            )
            .await?;
            let service = client_info.into_dyn().serve(transport).await?;
            log::trace!("mcp sse connected: {:#?}", service.peer_info());
            Ok(service)
        }
        McpTransportConfig::Http { base_url, headers, .. } => {
            let client = http_client(headers)?;
            let transport = rmcp::transport::StreamableHttpClientTransport::with_client(
                client,
                rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig {
                    uri: base_url.clone().into(),
                    ..Default::default()
                },
            );
            let service = client_info.into_dyn().serve(transport).await?;
            log::trace!("mcp http connected: {:#?}", service.peer_info());
            Ok(service)
        }
    }
}

fn http_client(headers: &std::collections::HashMap<String, String>) -> anyhow::Result<reqwest::Client> {
    if headers.is_empty() {
        return Ok(reqwest::Client::new());
    }
    let mut map = reqwest::header::HeaderMap::new();
    for (k, v) in headers {
        map.insert(
            reqwest::header::HeaderName::from_bytes(k.as_bytes())?,
            reqwest::header::HeaderValue::from_str(v)?,
        );
    }
    Ok(reqwest::ClientBuilder::new().default_headers(map).build()?)
}
