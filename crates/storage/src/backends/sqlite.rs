//! Embedded SQL backend, built on `rusqlite`. `rusqlite` is synchronous, so
//! every operation runs inside `spawn_blocking` to keep it off the async
//! executor (see `DESIGN.md` for why `rusqlite` over `sqlx`).

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::Value;

use crate::backend::{resolve_range, StorageBackend};
use crate::error::{StorageError, StorageResult};
use crate::pattern::glob_to_regex;

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub struct SqliteBackend {
    conn: Arc<StdMutex<Connection>>,
}

impl SqliteBackend {
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(StdMutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(StdMutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS t (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires INTEGER NULL
            );
            CREATE INDEX IF NOT EXISTS idx_t_expires ON t(expires) WHERE expires IS NOT NULL;
            CREATE TABLE IF NOT EXISTS list_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL,
                item TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_list_key_created ON list_items(key, created_at);
            CREATE TABLE IF NOT EXISTS counters (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    async fn with_conn<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|p| p.into_inner());
            f(&guard)
        })
        .await
        .map_err(|e| StorageError::Other(format!("blocking task panicked: {e}")))?
    }

    /// Prunes expired rows from `t`. Run on `close`.
    fn cleanup_expired(conn: &Connection) -> StorageResult<()> {
        conn.execute(
            "DELETE FROM t WHERE expires IS NOT NULL AND expires < ?1",
            [now_secs()],
        )?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn backend_type(&self) -> &'static str {
        "sqlite"
    }

    async fn connect(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> StorageResult<()> {
        self.with_conn(|conn| Self::cleanup_expired(conn)).await
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let row: Option<(String, Option<i64>)> = conn
                .query_row(
                    "SELECT value, expires FROM t WHERE key = ?1",
                    [&key],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .ok();
            let Some((value, expires)) = row else {
                return Ok(None);
            };
            if let Some(exp) = expires {
                if now_secs() > exp {
                    conn.execute("DELETE FROM t WHERE key = ?1", [&key])?;
                    return Ok(None);
                }
            }
            match serde_json::from_str(&value) {
                Ok(v) => Ok(Some(v)),
                Err(e) => {
                    log::warn!("corrupted storage value for key {key}: {e}");
                    Ok(None)
                }
            }
        })
        .await
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> StorageResult<()> {
        let key = key.to_string();
        let json = serde_json::to_string(&value)?;
        let expires = ttl.map(|d| now_secs() + d.as_secs() as i64);
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO t (key, value, expires) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires = excluded.expires",
                rusqlite::params![key, json, expires],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let n = conn.execute("DELETE FROM t WHERE key = ?1", [&key])?;
            Ok(n > 0)
        })
        .await
    }

    async fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn keys(&self, pattern: &str) -> StorageResult<Vec<String>> {
        let re = glob_to_regex(pattern)?;
        let now = now_secs();
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT key FROM t WHERE expires IS NULL OR expires >= ?1")?;
            let rows = stmt.query_map([now], |r| r.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                let key = row?;
                if re.is_match(&key) {
                    out.push(key);
                }
            }
            Ok(out)
        })
        .await
    }

    async fn lpush(&self, key: &str, value: Value) -> StorageResult<usize> {
        let key = key.to_string();
        let json = serde_json::to_string(&value)?;
        let created_at = now_secs();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO list_items (key, item, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![key, json, created_at],
            )?;
            let len: i64 =
                conn.query_row("SELECT COUNT(*) FROM list_items WHERE key = ?1", [&key], |r| {
                    r.get(0)
                })?;
            Ok(len as usize)
        })
        .await
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StorageResult<Vec<Value>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT item FROM list_items WHERE key = ?1 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt.query_map([&key], |r| r.get::<_, String>(0))?;
            let items: Vec<Value> = rows
                .filter_map(|r| r.ok())
                .filter_map(|s| serde_json::from_str(&s).ok())
                .collect();
            let (s, e) = resolve_range(items.len(), start, stop);
            Ok(items[s..e].to_vec())
        })
        .await
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> StorageResult<()> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, item FROM list_items WHERE key = ?1 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt.query_map([&key], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))?;
            let all: Vec<(i64, String)> = rows.filter_map(|r| r.ok()).collect();
            let (s, e) = resolve_range(all.len(), start, stop);
            let keep: std::collections::HashSet<i64> =
                all[s..e].iter().map(|(id, _)| *id).collect();
            for (id, _) in &all {
                if !keep.contains(id) {
                    conn.execute("DELETE FROM list_items WHERE id = ?1", [id])?;
                }
            }
            Ok(())
        })
        .await
    }

    async fn llen(&self, key: &str) -> StorageResult<usize> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let len: i64 =
                conn.query_row("SELECT COUNT(*) FROM list_items WHERE key = ?1", [&key], |r| {
                    r.get(0)
                })?;
            Ok(len as usize)
        })
        .await
    }

    async fn incr(&self, key: &str, by: i64) -> StorageResult<i64> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO counters (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = value + excluded.value",
                rusqlite::params![key, by],
            )?;
            let value: i64 =
                conn.query_row("SELECT value FROM counters WHERE key = ?1", [&key], |r| {
                    r.get(0)
                })?;
            Ok(value)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.set("k", serde_json::json!({"n": 1}), None).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(serde_json::json!({"n": 1})));
    }

    #[tokio::test]
    async fn set_then_get_round_trips_after_restart_via_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");
        {
            let backend = SqliteBackend::open(&path).unwrap();
            backend.set("k", serde_json::json!({"n": 1}), None).await.unwrap();
            backend.disconnect().await.unwrap();
        }
        let backend2 = SqliteBackend::open(&path).unwrap();
        assert_eq!(backend2.get("k").await.unwrap(), Some(serde_json::json!({"n": 1})));
    }

    #[tokio::test]
    async fn ttl_expiry_scenario() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .set("k", serde_json::json!({"n": 1}), Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(serde_json::json!({"n": 1})));
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incr_accumulates() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        assert_eq!(backend.incr("c", 1).await.unwrap(), 1);
        assert_eq!(backend.incr("c", 2).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn lrange_returns_chronological_order() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.lpush("l", serde_json::json!(1)).await.unwrap();
        backend.lpush("l", serde_json::json!(2)).await.unwrap();
        let range = backend.lrange("l", 0, -1).await.unwrap();
        assert_eq!(range, vec![serde_json::json!(1), serde_json::json!(2)]);
    }
}
