//! Agent Façade (spec §4.9, C9): a thin adaptor exposing `run`/`reset`/
//! `switch_llm`/`list_sessions`/`end_session` plus global-bus subscribe.
//! Grounded on the teacher's `agent::handle::AgentHandle` (a thin wrapper
//! delegating every operation to the session registry it owns) — all
//! logic here lives in [`crate::session::ChatSession`] (C7) and
//! [`crate::manager::SessionManager`] (C8).

use std::sync::Arc;

use crate::error::CoreResult;
use crate::event_bus::{CancellationHandle, EventBus, ObserverToken};
use crate::events::GlobalEvent;
use crate::llm_service::LlmConfig;
use crate::manager::{SessionManager, SessionMetadata, SessionStats};
use crate::session::RunCancellation;

/// Scope for a `switch_llm` call (mirrors
/// `switchLLMForAllSessions`/`…ForSpecificSession`/`…ForDefaultSession`,
/// spec §4.8).
pub enum SwitchScope {
    All,
    Session(String),
    Default,
}

/// Exclusive owner of the [`SessionManager`] (spec §3 ownership summary).
/// Everything else — the MCP Client Manager, the global event bus — is
/// constructed once and handed down through this façade.
pub struct Agent {
    sessions: Arc<SessionManager>,
    global_bus: EventBus<GlobalEvent>,
}

impl Agent {
    pub fn new(sessions: Arc<SessionManager>, global_bus: EventBus<GlobalEvent>) -> Self {
        Self { sessions, global_bus }
    }

    /// `run(text, imageData?, sessionId?) -> text` (spec §4.9). Resolves
    /// (creating if necessary) the named session, or the default session
    /// if none is given, then delegates to its tool-calling loop.
    pub async fn run(
        &self,
        text: &str,
        image_data: Option<&[u8]>,
        session_id: Option<&str>,
        cancellation: Option<RunCancellation>,
    ) -> CoreResult<String> {
        let session = match session_id {
            Some(id) => self.sessions.create_session(Some(id.to_string())).await?,
            None => self.sessions.get_default_session().await?,
        };
        let before = session.get_messages().await?.len();
        let result = session.run(text, image_data, cancellation).await?;
        let after = session.get_messages().await?.len();
        self.sessions
            .increment_message_count(&session.id, (after - before) as u64)
            .await?;
        Ok(result)
    }

    pub async fn reset(&self, session_id: Option<&str>) -> CoreResult<()> {
        let session = match session_id {
            Some(id) => self.sessions.create_session(Some(id.to_string())).await?,
            None => self.sessions.get_default_session().await?,
        };
        session.reset().await
    }

    pub async fn switch_llm(&self, config: LlmConfig, scope: SwitchScope) -> CoreResult<Vec<String>> {
        match scope {
            SwitchScope::All => Ok(self.sessions.switch_llm_for_all_sessions(config).await),
            SwitchScope::Session(id) => {
                self.sessions.switch_llm_for_session(&id, config).await?;
                Ok(vec![id])
            }
            SwitchScope::Default => {
                self.sessions.switch_llm_for_default_session(config).await?;
                Ok(vec!["default".to_string()])
            }
        }
    }

    pub async fn list_sessions(&self) -> CoreResult<Vec<String>> {
        self.sessions.list_sessions().await
    }

    pub async fn session_metadata(&self, id: &str) -> CoreResult<Option<SessionMetadata>> {
        self.sessions.get_session_metadata(id).await
    }

    pub async fn session_stats(&self) -> CoreResult<SessionStats> {
        self.sessions.get_session_stats().await
    }

    pub async fn end_session(&self, id: &str) -> CoreResult<()> {
        self.sessions.end_session(id).await
    }

    /// Subscribes to the global event bus, returning a token usable with
    /// [`Self::unsubscribe`].
    pub fn subscribe(&self, handler: impl Fn(&GlobalEvent) + Send + Sync + 'static) -> ObserverToken {
        self.global_bus.on(handler)
    }

    pub fn unsubscribe(&self, token: ObserverToken) -> bool {
        self.global_bus.off(token)
    }

    /// Scoped subscription: every handler registered through the returned
    /// handle detaches together when the handle is aborted (spec §4.4).
    pub fn subscribe_scope(&self) -> CancellationHandle<GlobalEvent> {
        self.global_bus.scope()
    }

    pub async fn shutdown(&self) -> CoreResult<()> {
        self.sessions.cleanup().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::SessionManagerConfig;
    use crate::session::test_support::{test_config, ScriptedLlmService};
    use crate::llm_service::LlmTurn;
    use agent_mcp_client::McpClientManager;
    use agent_storage::backends::MemoryBackend;
    use agent_storage::providers::SessionProvider as StorageSessionProvider;
    use agent_storage::StorageBackend;
    use std::time::Duration;

    fn agent() -> Agent {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new(None));
        let metadata = StorageSessionProvider::new(backend.clone(), "sessions");
        let global_bus = EventBus::new();
        let manager = Arc::new(SessionManager::new(
            metadata,
            backend,
            Arc::new(McpClientManager::new()),
            global_bus.clone(),
            test_config("stub", "openai"),
            |cfg| {
                ScriptedLlmService::new(
                    cfg.clone(),
                    vec![LlmTurn::Final {
                        text: "hi".into(),
                        token_count: None,
                    }],
                )
            },
            SessionManagerConfig {
                max_sessions: 10,
                session_ttl: Duration::from_secs(60),
            },
        ));
        Agent::new(manager, global_bus)
    }

    #[tokio::test]
    async fn run_against_the_default_session_round_trips() {
        let a = agent();
        let text = a.run("hello", None, None, None).await.unwrap();
        assert_eq!(text, "hi");
        assert_eq!(a.list_sessions().await.unwrap(), vec!["default".to_string()]);
        let meta = a.session_metadata("default").await.unwrap().unwrap();
        assert_eq!(meta.message_count, 2);
    }

    #[tokio::test]
    async fn end_session_removes_it_from_the_listing() {
        let a = agent();
        a.run("hello", None, Some("s1"), None).await.unwrap();
        a.end_session("s1").await.unwrap();
        assert!(a.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn subscribe_receives_forwarded_session_events() {
        let a = agent();
        let received = Arc::new(std::sync::Mutex::new(0usize));
        let r = received.clone();
        a.subscribe(move |_| *r.lock().unwrap() += 1);
        a.run("hello", None, Some("s1"), None).await.unwrap();
        assert!(*received.lock().unwrap() >= 2); // thinking + response
    }
}
