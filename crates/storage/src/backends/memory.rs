//! Memory backend: an `Arc<Mutex<HashMap<..>>>` holding the full
//! key/value + list + counter contract.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::backend::{resolve_range, StorageBackend};
use crate::error::{StorageError, StorageResult};
use crate::pattern::glob_to_regex;

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

struct Entry {
    value: Value,
    expires_at: Option<SystemTime>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(t) if SystemTime::now() > t)
    }
}

struct Inner {
    entries: HashMap<String, Entry>,
    lists: HashMap<String, Vec<Value>>,
    counters: HashMap<String, i64>,
}

pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
    max_size: Option<usize>,
    connected: AtomicBool,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
    sweep_interval: Duration,
}

impl MemoryBackend {
    pub fn new(max_size: Option<usize>) -> Self {
        Self::with_sweep_interval(max_size, DEFAULT_SWEEP_INTERVAL)
    }

    pub fn with_sweep_interval(max_size: Option<usize>, sweep_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                lists: HashMap::new(),
                counters: HashMap::new(),
            })),
            max_size,
            connected: AtomicBool::new(false),
            sweep_handle: Mutex::new(None),
            sweep_interval,
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> StorageResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let interval = self.sweep_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let mut guard = inner.lock().await;
                guard.entries.retain(|_, e| !e.is_expired());
            }
        });
        *self.sweep_handle.lock().await = Some(handle);
        Ok(())
    }

    async fn disconnect(&self) -> StorageResult<()> {
        if let Some(handle) = self.sweep_handle.lock().await.take() {
            handle.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let mut guard = self.inner.lock().await;
        let expired = guard.entries.get(key).is_some_and(Entry::is_expired);
        if expired {
            guard.entries.remove(key);
            return Ok(None);
        }
        Ok(guard.entries.get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> StorageResult<()> {
        let mut guard = self.inner.lock().await;
        if !guard.entries.contains_key(key) {
            if let Some(max) = self.max_size {
                if guard.entries.len() >= max {
                    return Err(StorageError::LimitExceeded { max });
                }
            }
        }
        let expires_at = ttl.map(|d| SystemTime::now() + d);
        guard
            .entries
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self.inner.lock().await.entries.remove(key).is_some())
    }

    async fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn keys(&self, pattern: &str) -> StorageResult<Vec<String>> {
        let re = glob_to_regex(pattern)?;
        let guard = self.inner.lock().await;
        Ok(guard
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired())
            .map(|(k, _)| k.clone())
            .filter(|k| re.is_match(k))
            .collect())
    }

    async fn lpush(&self, key: &str, value: Value) -> StorageResult<usize> {
        let mut guard = self.inner.lock().await;
        let list = guard.lists.entry(key.to_string()).or_default();
        list.push(value);
        Ok(list.len())
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StorageResult<Vec<Value>> {
        let guard = self.inner.lock().await;
        let Some(list) = guard.lists.get(key) else {
            return Ok(Vec::new());
        };
        let (s, e) = resolve_range(list.len(), start, stop);
        Ok(list[s..e].to_vec())
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> StorageResult<()> {
        let mut guard = self.inner.lock().await;
        if let Some(list) = guard.lists.get_mut(key) {
            let (s, e) = resolve_range(list.len(), start, stop);
            *list = list[s..e].to_vec();
        }
        Ok(())
    }

    async fn llen(&self, key: &str) -> StorageResult<usize> {
        Ok(self
            .inner
            .lock()
            .await
            .lists
            .get(key)
            .map(Vec::len)
            .unwrap_or(0))
    }

    async fn incr(&self, key: &str, by: i64) -> StorageResult<i64> {
        let mut guard = self.inner.lock().await;
        let counter = guard.counters.entry(key.to_string()).or_insert(0);
        *counter += by;
        Ok(*counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let backend = MemoryBackend::new(None);
        backend.connect().await.unwrap();
        backend
            .set("k", serde_json::json!({"n": 1}), None)
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(serde_json::json!({"n": 1})));
    }

    #[tokio::test]
    async fn ttl_expiry_is_lazy() {
        let backend = MemoryBackend::new(None);
        backend.connect().await.unwrap();
        backend
            .set("k", serde_json::json!(1), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(backend.get("k").await.unwrap(), None);
        assert!(!backend.has("k").await.unwrap());
    }

    #[tokio::test]
    async fn max_size_rejects_new_key_overflow() {
        let backend = MemoryBackend::new(Some(1));
        backend.connect().await.unwrap();
        backend.set("a", serde_json::json!(1), None).await.unwrap();
        let err = backend.set("b", serde_json::json!(1), None).await;
        assert!(matches!(err, Err(StorageError::LimitExceeded { max: 1 })));
    }

    #[tokio::test]
    async fn incr_is_atomic_for_sequential_calls() {
        let backend = MemoryBackend::new(None);
        assert_eq!(backend.incr("c", 1).await.unwrap(), 1);
        assert_eq!(backend.incr("c", 2).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn keys_pattern_matches_prefix() {
        let backend = MemoryBackend::new(None);
        backend.set("alpha", serde_json::json!(1), None).await.unwrap();
        backend.set("beta", serde_json::json!(1), None).await.unwrap();
        let mut matched = backend.keys("a*").await.unwrap();
        matched.sort();
        assert_eq!(matched, vec!["alpha".to_string()]);
    }

    #[tokio::test]
    async fn delete_pattern_clears_matched_only() {
        let backend = MemoryBackend::new(None);
        backend.set("a1", serde_json::json!(1), None).await.unwrap();
        backend.set("a2", serde_json::json!(1), None).await.unwrap();
        backend.set("b1", serde_json::json!(1), None).await.unwrap();
        let removed = backend.delete_pattern("a*").await.unwrap();
        assert_eq!(removed, 2);
        assert!(backend.has("b1").await.unwrap());
    }

    #[tokio::test]
    async fn list_ops_preserve_chronological_order() {
        let backend = MemoryBackend::new(None);
        backend.lpush("list", serde_json::json!(1)).await.unwrap();
        backend.lpush("list", serde_json::json!(2)).await.unwrap();
        backend.lpush("list", serde_json::json!(3)).await.unwrap();
        assert_eq!(backend.llen("list").await.unwrap(), 3);
        let range = backend.lrange("list", 0, -1).await.unwrap();
        assert_eq!(range, vec![serde_json::json!(1), serde_json::json!(2), serde_json::json!(3)]);
    }
}
