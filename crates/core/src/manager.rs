//! Session manager: multi-session lifecycle — create/get/end, TTL,
//! activity, limits, LM-switch fan-out. An in-memory map keyed by
//! session id, backed by storage-persisted metadata with lazy
//! hydration, and a periodic cleanup task for expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agent_mcp_client::McpClientManager;
use agent_storage::{StorageBackend, StorageResult};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::event_bus::EventBus;
use crate::events::GlobalEvent;
use crate::llm_service::{LlmConfig, LlmService};
use crate::session::ChatSession;

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Session metadata: invariants `created_at <= last_activity` and
/// `message_count` monotonically non-decreasing are maintained by the
/// session manager, never by callers writing this struct directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub id: String,
    pub created_at: u64,
    pub last_activity: u64,
    pub message_count: u64,
}

#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    pub max_sessions: usize,
    pub session_ttl: Duration,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 100,
            session_ttl: Duration::from_millis(3_600_000),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub in_memory_sessions: usize,
    pub max_sessions: usize,
    pub session_ttl_ms: u64,
}

/// Per-session factory inputs the manager needs to hydrate a `ChatSession`
/// it either constructs fresh or lazily rehydrates from persisted
/// metadata — in-memory session objects are not reconstructed until they
/// are next requested.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<ChatSession>>>,
    metadata: agent_storage::providers::SessionProvider,
    history_backend: Arc<dyn StorageBackend>,
    mcp: Arc<McpClientManager>,
    global_bus: EventBus<GlobalEvent>,
    llm_factory: Box<dyn Fn(&LlmConfig) -> Arc<dyn LlmService> + Send + Sync>,
    default_llm_config: RwLock<LlmConfig>,
    config: SessionManagerConfig,
    cleanup_handle: RwLock<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(
        metadata: agent_storage::providers::SessionProvider,
        history_backend: Arc<dyn StorageBackend>,
        mcp: Arc<McpClientManager>,
        global_bus: EventBus<GlobalEvent>,
        default_llm_config: LlmConfig,
        llm_factory: impl Fn(&LlmConfig) -> Arc<dyn LlmService> + Send + Sync + 'static,
        config: SessionManagerConfig,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            metadata,
            history_backend,
            mcp,
            global_bus,
            llm_factory: Box::new(llm_factory),
            default_llm_config: RwLock::new(default_llm_config),
            config,
            cleanup_handle: RwLock::new(None),
        }
    }

    /// Returns the cleanup interval: `min(sessionTTL/4, 15 min)`.
    pub fn cleanup_interval(&self) -> Duration {
        std::cmp::min(self.config.session_ttl / 4, Duration::from_secs(15 * 60))
    }

    /// Restores metadata for non-expired persisted sessions (lazy
    /// hydration — no `ChatSession` is reconstructed here, only the
    /// storage-side bookkeeping is consulted) and schedules the periodic
    /// cleanup task at `min(sessionTTL/4, 15 min)`. Idempotent: calling it
    /// again replaces any previously running task.
    pub async fn init(self: &Arc<Self>) -> CoreResult<()> {
        self.metadata.cleanup_expired().await?;

        let interval = self.cleanup_interval();
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    return;
                };
                if let Err(e) = manager.sweep_expired().await {
                    log::error!("session manager: periodic sweep failed: {e}");
                }
            }
        });
        *self.cleanup_handle.write().await = Some(handle);
        Ok(())
    }

    fn expired(&self, meta: &SessionMetadata) -> bool {
        now_ms().saturating_sub(meta.last_activity) > self.config.session_ttl.as_millis() as u64
    }

    async fn hydrate(&self, id: &str) -> CoreResult<Arc<ChatSession>> {
        let config = self.default_llm_config.read().await.clone();
        let llm = (self.llm_factory)(&config);
        let session = ChatSession::new(
            id.to_string(),
            self.history_backend.clone(),
            llm,
            self.mcp.clone(),
            self.global_bus.clone(),
        )
        .await?;
        Ok(Arc::new(session))
    }

    async fn touch(&self, id: &str) -> StorageResult<()> {
        let mut meta: SessionMetadata = match self.metadata.get_session(id).await? {
            Some(m) => m,
            None => return Ok(()),
        };
        meta.last_activity = now_ms();
        self.metadata
            .set_session(id, &meta, Some(self.config.session_ttl))
            .await
    }

    /// Creates or returns a session:
    /// memory hit bumps activity and returns; storage-only hit hydrates;
    /// otherwise checks `max_sessions` before constructing a fresh one.
    pub async fn create_session(&self, id: Option<String>) -> CoreResult<Arc<ChatSession>> {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());

        if let Some(session) = self.sessions.read().await.get(&id) {
            self.touch(&id).await?;
            return Ok(session.clone());
        }

        if self.metadata.has_session(&id).await? {
            let session = self.hydrate(&id).await?;
            self.sessions.write().await.insert(id.clone(), session.clone());
            self.touch(&id).await?;
            return Ok(session);
        }

        let active = self.sessions.read().await.len();
        if active >= self.config.max_sessions {
            return Err(CoreError::SessionLimitExceeded {
                max: self.config.max_sessions,
            });
        }

        let now = now_ms();
        let meta = SessionMetadata {
            id: id.clone(),
            created_at: now,
            last_activity: now,
            message_count: 0,
        };
        self.metadata
            .set_session(&id, &meta, Some(self.config.session_ttl))
            .await?;

        let session = self.hydrate(&id).await?;
        self.sessions.write().await.insert(id.clone(), session.clone());
        Ok(session)
    }

    pub async fn get_default_session(&self) -> CoreResult<Arc<ChatSession>> {
        self.create_session(Some("default".to_string())).await
    }

    /// Memory hit bumps activity; storage hit hydrates and bumps; miss
    /// returns `None` without raising.
    pub async fn get_session(&self, id: &str) -> CoreResult<Option<Arc<ChatSession>>> {
        if let Some(session) = self.sessions.read().await.get(id) {
            self.touch(id).await?;
            return Ok(Some(session.clone()));
        }
        if !self.metadata.has_session(id).await? {
            return Ok(None);
        }
        let session = self.hydrate(id).await?;
        self.sessions.write().await.insert(id.to_string(), session.clone());
        self.touch(id).await?;
        Ok(Some(session))
    }

    /// Resets and disposes the in-memory session (if any) and deletes its
    /// metadata. Idempotent.
    pub async fn end_session(&self, id: &str) -> CoreResult<()> {
        if let Some(session) = self.sessions.write().await.remove(id) {
            session.reset().await?;
            session.dispose();
        }
        self.metadata.delete_session(id).await?;
        Ok(())
    }

    pub async fn list_sessions(&self) -> CoreResult<Vec<String>> {
        Ok(self.metadata.get_active_sessions().await?)
    }

    pub async fn get_session_metadata(&self, id: &str) -> CoreResult<Option<SessionMetadata>> {
        Ok(self.metadata.get_session(id).await?)
    }

    /// Read-modify-write on metadata; not atomic across concurrent callers
    /// for a given session id (an atomic backend-level increment would be
    /// a valid refinement, but isn't required here).
    /// `by` is the number of messages appended during the turn that just
    /// completed (e.g. 2 for a plain user+assistant turn, more when the
    /// tool-calling loop appended tool-call/tool-result messages too).
    pub async fn increment_message_count(&self, id: &str, by: u64) -> CoreResult<()> {
        if let Some(mut meta) = self.metadata.get_session::<SessionMetadata>(id).await? {
            meta.message_count += by;
            meta.last_activity = now_ms();
            self.metadata
                .set_session(id, &meta, Some(self.config.session_ttl))
                .await?;
        }
        Ok(())
    }

    /// Fans the new config/service out to every in-memory session,
    /// collecting per-session failures without aborting the fan-out, then
    /// emits a single `saiki:llmSwitched` naming the sessions that actually
    /// switched.
    pub async fn switch_llm_for_all_sessions(&self, config: LlmConfig) -> Vec<String> {
        let sessions: Vec<Arc<ChatSession>> = self.sessions.read().await.values().cloned().collect();
        let mut switched = Vec::new();
        for session in sessions {
            let llm = (self.llm_factory)(&config);
            session.switch_llm(llm, config.clone()).await;
            switched.push(session.id.clone());
        }
        *self.default_llm_config.write().await = config.clone();
        self.global_bus.emit(GlobalEvent::LlmSwitched {
            new_config: serde_json::to_value(&config).unwrap_or(serde_json::Value::Null),
            router: config.router.clone(),
            history_retained: true,
            session_ids: switched.clone(),
        });
        switched
    }

    pub async fn switch_llm_for_session(&self, id: &str, config: LlmConfig) -> CoreResult<()> {
        let session = self
            .sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::SessionNotFound(id.to_string()))?;
        let llm = (self.llm_factory)(&config);
        session.switch_llm(llm, config.clone()).await;
        self.global_bus.emit(GlobalEvent::LlmSwitched {
            new_config: serde_json::to_value(&config).unwrap_or(serde_json::Value::Null),
            router: config.router.clone(),
            history_retained: true,
            session_ids: vec![id.to_string()],
        });
        Ok(())
    }

    pub async fn switch_llm_for_default_session(&self, config: LlmConfig) -> CoreResult<()> {
        self.switch_llm_for_session("default", config).await
    }

    pub async fn get_session_stats(&self) -> CoreResult<SessionStats> {
        Ok(SessionStats {
            total_sessions: self.metadata.get_active_sessions().await?.len(),
            in_memory_sessions: self.sessions.read().await.len(),
            max_sessions: self.config.max_sessions,
            session_ttl_ms: self.config.session_ttl.as_millis() as u64,
        })
    }

    /// Periodic sweep: deletes expired metadata and evicts the
    /// corresponding in-memory session via `reset`+`dispose`.
    /// Errors in individual evictions are logged and do not stop the sweep.
    pub async fn sweep_expired(&self) -> CoreResult<usize> {
        let active_ids = self.metadata.get_active_sessions().await?;
        let mut evicted = 0;
        for id in active_ids {
            let Some(meta) = self.metadata.get_session::<SessionMetadata>(&id).await? else {
                continue;
            };
            if !self.expired(&meta) {
                continue;
            }
            if let Some(session) = self.sessions.write().await.remove(&id) {
                if let Err(e) = session.reset().await {
                    log::error!("session manager: eviction reset failed for `{id}`: {e}");
                }
                session.dispose();
            }
            if let Err(e) = self.metadata.delete_session(&id).await {
                log::error!("session manager: failed to delete expired metadata for `{id}`: {e}");
                continue;
            }
            evicted += 1;
        }
        self.metadata.cleanup_expired().await?;
        Ok(evicted)
    }

    /// Cancels the periodic cleanup task, ends every session, and clears
    /// the in-memory map.
    pub async fn cleanup(&self) -> CoreResult<()> {
        if let Some(handle) = self.cleanup_handle.write().await.take() {
            handle.abort();
        }
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for id in ids {
            self.end_session(&id).await?;
        }
        self.sessions.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_support::{test_config, ScriptedLlmService};
    use agent_storage::backends::MemoryBackend;
    use agent_storage::providers::SessionProvider as StorageSessionProvider;

    fn manager(max_sessions: usize, ttl: Duration) -> SessionManager {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new(None));
        let metadata = StorageSessionProvider::new(backend.clone(), "sessions");
        SessionManager::new(
            metadata,
            backend,
            Arc::new(McpClientManager::new()),
            EventBus::new(),
            test_config("stub", "openai"),
            |cfg| ScriptedLlmService::new(cfg.clone(), vec![]),
            SessionManagerConfig {
                max_sessions,
                session_ttl: ttl,
            },
        )
    }

    #[tokio::test]
    async fn create_session_persists_metadata_with_zero_message_count() {
        let mgr = manager(10, Duration::from_secs(60));
        mgr.create_session(Some("s1".into())).await.unwrap();
        let meta = mgr.get_session_metadata("s1").await.unwrap().unwrap();
        assert_eq!(meta.message_count, 0);
        assert_eq!(meta.created_at, meta.last_activity);
    }

    #[tokio::test]
    async fn session_limit_is_enforced_and_reported() {
        let mgr = manager(1, Duration::from_secs(60));
        mgr.create_session(Some("a".into())).await.unwrap();
        let err = mgr.create_session(Some("b".into())).await;
        assert!(matches!(err, Err(CoreError::SessionLimitExceeded { max: 1 })));
        assert_eq!(mgr.list_sessions().await.unwrap(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn ttl_expiry_evicts_from_listing_and_memory() {
        let mgr = manager(10, Duration::from_millis(50));
        mgr.create_session(Some("x".into())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        let evicted = mgr.sweep_expired().await.unwrap();
        assert_eq!(evicted, 1);
        assert!(mgr.list_sessions().await.unwrap().is_empty());
        assert!(mgr.get_session("x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn end_session_is_idempotent() {
        let mgr = manager(10, Duration::from_secs(60));
        mgr.create_session(Some("s1".into())).await.unwrap();
        mgr.end_session("s1").await.unwrap();
        mgr.end_session("s1").await.unwrap();
        assert!(mgr.get_session_metadata("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_session_rehydrates_from_storage_only_hit() {
        let mgr = manager(10, Duration::from_secs(60));
        mgr.create_session(Some("s1".into())).await.unwrap();
        mgr.cleanup().await.unwrap(); // drops in-memory map, metadata stays... actually cleanup deletes metadata too
        // re-seed metadata without an in-memory session to exercise hydration
        let now = now_ms();
        mgr.metadata
            .set_session(
                "s2",
                &SessionMetadata {
                    id: "s2".into(),
                    created_at: now,
                    last_activity: now,
                    message_count: 0,
                },
                Some(Duration::from_secs(60)),
            )
            .await
            .unwrap();
        let session = mgr.get_session("s2").await.unwrap();
        assert!(session.is_some());
    }

    #[tokio::test]
    async fn increment_message_count_updates_metadata() {
        let mgr = manager(10, Duration::from_secs(60));
        mgr.create_session(Some("s1".into())).await.unwrap();
        mgr.increment_message_count("s1", 2).await.unwrap();
        mgr.increment_message_count("s1", 1).await.unwrap();
        let meta = mgr.get_session_metadata("s1").await.unwrap().unwrap();
        assert_eq!(meta.message_count, 3);
    }

    #[tokio::test]
    async fn stats_reflect_memory_and_total_counts() {
        let mgr = manager(5, Duration::from_secs(60));
        mgr.create_session(Some("a".into())).await.unwrap();
        mgr.create_session(Some("b".into())).await.unwrap();
        let stats = mgr.get_session_stats().await.unwrap();
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.in_memory_sessions, 2);
        assert_eq!(stats.max_sessions, 5);
    }

    #[tokio::test]
    async fn init_schedules_a_sweep_that_evicts_without_manual_invocation() {
        let mgr = Arc::new(manager(10, Duration::from_millis(40)));
        mgr.create_session(Some("x".into())).await.unwrap();
        mgr.init().await.unwrap();
        assert_eq!(mgr.cleanup_interval(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(mgr.list_sessions().await.unwrap().is_empty());
        mgr.cleanup().await.unwrap();
    }
}
