use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::backend::StorageBackend;
use crate::error::StorageResult;

/// Stored envelope for a session-with-TTL entry: `{ data, expiresAt? }`.
/// Expiry is additionally re-checked here (on top of the
/// backend's own TTL) so `getActiveSessions` can filter cheaply without a
/// second backend round trip per key.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    data: T,
    expires_at: Option<u64>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Session-with-TTL provider: stores per-session metadata/state keyed by
/// session id, with lazy expiry on read and a bulk `cleanup_expired` for
/// periodic sweeps (used by the session manager).
pub struct SessionProvider {
    backend: Arc<dyn StorageBackend>,
    namespace: String,
}

impl SessionProvider {
    pub fn new(backend: Arc<dyn StorageBackend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    fn key(&self, id: &str) -> String {
        format!("{}:{id}", self.namespace)
    }

    pub async fn set_session<T: Serialize>(
        &self,
        id: &str,
        data: &T,
        ttl: Option<Duration>,
    ) -> StorageResult<()> {
        let envelope = Envelope {
            data,
            expires_at: ttl.map(|d| now_secs() + d.as_secs()),
        };
        let json = serde_json::to_value(&envelope)?;
        self.backend.set(&self.key(id), json, ttl).await
    }

    pub async fn get_session<T: DeserializeOwned>(&self, id: &str) -> StorageResult<Option<T>> {
        let key = self.key(id);
        let Some(raw) = self.backend.get(&key).await? else {
            return Ok(None);
        };
        let Ok(envelope) = serde_json::from_value::<Envelope<T>>(raw) else {
            return Ok(None);
        };
        if let Some(expires_at) = envelope.expires_at {
            if now_secs() > expires_at {
                self.backend.delete(&key).await?;
                return Ok(None);
            }
        }
        Ok(Some(envelope.data))
    }

    pub async fn has_session(&self, id: &str) -> StorageResult<bool> {
        Ok(self.get_session::<serde_json::Value>(id).await?.is_some())
    }

    pub async fn delete_session(&self, id: &str) -> StorageResult<bool> {
        self.backend.delete(&self.key(id)).await
    }

    /// Enumerates session ids whose entries are still live, lazily dropping
    /// any that have expired.
    pub async fn get_active_sessions(&self) -> StorageResult<Vec<String>> {
        let prefix = format!("{}:", self.namespace);
        let matched = self.backend.keys(&format!("{prefix}*")).await?;
        let mut active = Vec::new();
        for full_key in matched {
            let id = full_key.trim_start_matches(&prefix).to_string();
            if self.get_session::<serde_json::Value>(&id).await?.is_some() {
                active.push(id);
            }
        }
        Ok(active)
    }

    /// Deletes every expired session entry in this namespace. Returns the
    /// count removed.
    pub async fn cleanup_expired(&self) -> StorageResult<usize> {
        let prefix = format!("{}:", self.namespace);
        let matched = self.backend.keys(&format!("{prefix}*")).await?;
        let mut removed = 0;
        for full_key in matched {
            let id = full_key.trim_start_matches(&prefix).to_string();
            if self.get_session::<serde_json::Value>(&id).await?.is_none()
                && self.backend.delete(&full_key).await?
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn clear(&self) -> StorageResult<()> {
        self.backend
            .delete_pattern(&format!("{}:*", self.namespace))
            .await?;
        Ok(())
    }

    pub async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Meta {
        message_count: u64,
    }

    fn provider() -> SessionProvider {
        SessionProvider::new(Arc::new(MemoryBackend::new(None)), "sessions")
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let p = provider();
        p.set_session("s1", &Meta { message_count: 0 }, None)
            .await
            .unwrap();
        assert_eq!(
            p.get_session::<Meta>("s1").await.unwrap(),
            Some(Meta { message_count: 0 })
        );
    }

    #[tokio::test]
    async fn expired_session_reads_as_absent_and_is_deleted() {
        let p = provider();
        p.set_session("s1", &Meta { message_count: 0 }, Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(p.get_session::<Meta>("s1").await.unwrap(), None);
        assert!(!p.has_session("s1").await.unwrap());
    }

    #[tokio::test]
    async fn get_active_sessions_excludes_expired() {
        let p = provider();
        p.set_session("live", &Meta { message_count: 0 }, None)
            .await
            .unwrap();
        p.set_session(
            "dead",
            &Meta { message_count: 0 },
            Some(Duration::from_millis(10)),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let active = p.get_active_sessions().await.unwrap();
        assert_eq!(active, vec!["live".to_string()]);
    }

    #[tokio::test]
    async fn cleanup_expired_counts_removed() {
        let p = provider();
        p.set_session(
            "dead",
            &Meta { message_count: 0 },
            Some(Duration::from_millis(10)),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(p.cleanup_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_session_is_idempotent() {
        let p = provider();
        p.set_session("s1", &Meta { message_count: 0 }, None)
            .await
            .unwrap();
        assert!(p.delete_session("s1").await.unwrap());
        assert!(!p.delete_session("s1").await.unwrap());
    }
}
