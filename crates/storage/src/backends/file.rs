//! File backend. Each key is a JSON document under `keys/`, written
//! atomically (`path.tmp` then rename). Lists live under `lists/`.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::backend::{resolve_range, StorageBackend};
use crate::error::{StorageError, StorageResult};
use crate::pattern::glob_to_regex;

#[derive(Debug, Serialize, Deserialize)]
struct KeyEnvelope {
    value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<u64>,
    created_at: u64,
    updated_at: u64,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct ListEnvelope {
    items: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<u64>,
}

pub struct FileBackend {
    root: PathBuf,
    // Single-writer queue within one process; not shared across processes.
    write_lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn keys_dir(&self) -> PathBuf {
        self.root.join("keys")
    }

    fn lists_dir(&self) -> PathBuf {
        self.root.join("lists")
    }

    fn sanitize(key: &str) -> String {
        key.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.keys_dir().join(format!("{}.json", Self::sanitize(key)))
    }

    fn list_path(&self, key: &str) -> PathBuf {
        self.lists_dir().join(format!("{}.json", Self::sanitize(key)))
    }

    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    async fn write_atomic(path: &Path, contents: &str) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_key_envelope(path: &Path) -> StorageResult<Option<KeyEnvelope>> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => match serde_json::from_str::<KeyEnvelope>(&contents) {
                Ok(env) => Ok(Some(env)),
                Err(e) => {
                    log::warn!("corrupted storage record at {}: {e}", path.display());
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes the key envelope. Caller must already hold `write_lock`; used
    /// by both `set` and `incr` so `incr`'s read-modify-write happens under
    /// a single lock acquisition instead of recursively re-locking.
    async fn set_locked(&self, key: &str, value: Value, ttl: Option<Duration>) -> StorageResult<()> {
        let path = self.key_path(key);
        let now = Self::now_secs();
        let created_at = Self::read_key_envelope(&path)
            .await?
            .map(|e| e.created_at)
            .unwrap_or(now);
        let env = KeyEnvelope {
            value,
            expires_at: ttl.map(|d| now + d.as_secs()),
            created_at,
            updated_at: now,
        };
        let json = serde_json::to_string_pretty(&env)?;
        Self::write_atomic(&path, &json).await
    }

    async fn read_list_envelope(path: &Path) -> StorageResult<Option<ListEnvelope>> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => match serde_json::from_str::<ListEnvelope>(&contents) {
                Ok(env) => Ok(Some(env)),
                Err(e) => {
                    log::warn!("corrupted list record at {}: {e}", path.display());
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    fn backend_type(&self) -> &'static str {
        "file"
    }

    async fn connect(&self) -> StorageResult<()> {
        tokio::fs::create_dir_all(self.keys_dir()).await?;
        tokio::fs::create_dir_all(self.lists_dir()).await?;
        Ok(())
    }

    async fn disconnect(&self) -> StorageResult<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.root.exists()
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let path = self.key_path(key);
        let Some(env) = Self::read_key_envelope(&path).await? else {
            return Ok(None);
        };
        if let Some(expires_at) = env.expires_at {
            if Self::now_secs() > expires_at {
                let _ = tokio::fs::remove_file(&path).await;
                return Ok(None);
            }
        }
        Ok(Some(env.value))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        self.set_locked(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let _guard = self.write_lock.lock().await;
        let path = self.key_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn keys(&self, pattern: &str) -> StorageResult<Vec<String>> {
        let re = glob_to_regex(pattern)?;
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(self.keys_dir()).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !re.is_match(stem) {
                continue;
            }
            if self.get(stem).await?.is_some() {
                out.push(stem.to_string());
            }
        }
        Ok(out)
    }

    async fn lpush(&self, key: &str, value: Value) -> StorageResult<usize> {
        let _guard = self.write_lock.lock().await;
        let path = self.list_path(key);
        let mut env = Self::read_list_envelope(&path).await?.unwrap_or_default();
        env.items.push(value);
        let len = env.items.len();
        let json = serde_json::to_string_pretty(&env)?;
        Self::write_atomic(&path, &json).await?;
        Ok(len)
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StorageResult<Vec<Value>> {
        let path = self.list_path(key);
        let Some(env) = Self::read_list_envelope(&path).await? else {
            return Ok(Vec::new());
        };
        let (s, e) = resolve_range(env.items.len(), start, stop);
        Ok(env.items[s..e].to_vec())
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.list_path(key);
        let Some(mut env) = Self::read_list_envelope(&path).await? else {
            return Ok(());
        };
        let (s, e) = resolve_range(env.items.len(), start, stop);
        env.items = env.items[s..e].to_vec();
        let json = serde_json::to_string_pretty(&env)?;
        Self::write_atomic(&path, &json).await
    }

    async fn llen(&self, key: &str) -> StorageResult<usize> {
        let path = self.list_path(key);
        Ok(Self::read_list_envelope(&path)
            .await?
            .map(|e| e.items.len())
            .unwrap_or(0))
    }

    async fn incr(&self, key: &str, by: i64) -> StorageResult<i64> {
        let _guard = self.write_lock.lock().await;
        let current = match self.get(key).await? {
            Some(Value::Number(n)) => n.as_i64().ok_or_else(|| {
                StorageError::Other(format!("counter at {key} is not an integer"))
            })?,
            Some(_) => return Err(StorageError::Other(format!("counter at {key} is not a number"))),
            None => 0,
        };
        let next = current + by;
        self.set_locked(key, Value::from(next), None).await?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let backend = FileBackend::new(dir.path());
            backend.connect().await.unwrap();
            backend.set("k", serde_json::json!({"n": 1}), None).await.unwrap();
        }
        let backend2 = FileBackend::new(dir.path());
        assert_eq!(
            backend2.get("k").await.unwrap(),
            Some(serde_json::json!({"n": 1}))
        );
    }

    #[tokio::test]
    async fn ttl_expiry_removes_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        backend.connect().await.unwrap();
        backend
            .set("k", serde_json::json!(1), Some(Duration::from_secs(0)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_key_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        backend.connect().await.unwrap();
        assert_eq!(backend.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        backend.connect().await.unwrap();
        backend.set("k", serde_json::json!(1), None).await.unwrap();
        assert!(backend.delete("k").await.unwrap());
        assert!(!backend.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn sanitizes_unsafe_key_characters() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        backend.connect().await.unwrap();
        backend.set("a/b:c", serde_json::json!(1), None).await.unwrap();
        assert!(backend.has("a/b:c").await.unwrap());
    }

    #[tokio::test]
    async fn incr_persists_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        backend.connect().await.unwrap();
        assert_eq!(backend.incr("c", 1).await.unwrap(), 1);
        assert_eq!(backend.incr("c", 2).await.unwrap(), 3);
    }
}
