//! Storage backend contract shared by the memory, file, and embedded-SQL
//! implementations.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageResult;

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Human-readable identifier, e.g. `"memory"`, `"file"`, `"sqlite"`.
    fn backend_type(&self) -> &'static str;

    async fn connect(&self) -> StorageResult<()>;
    async fn disconnect(&self) -> StorageResult<()>;
    fn is_connected(&self) -> bool;

    async fn get(&self, key: &str) -> StorageResult<Option<Value>>;
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> StorageResult<()>;
    async fn delete(&self, key: &str) -> StorageResult<bool>;
    async fn has(&self, key: &str) -> StorageResult<bool>;

    async fn mget(&self, keys: &[String]) -> StorageResult<Vec<Option<Value>>> {
        let mut out = Vec::with_capacity(keys.len());
        for k in keys {
            out.push(self.get(k).await?);
        }
        Ok(out)
    }

    async fn mset(&self, entries: Vec<(String, Value, Option<Duration>)>) -> StorageResult<()> {
        for (k, v, ttl) in entries {
            self.set(&k, v, ttl).await?;
        }
        Ok(())
    }

    /// Anchored glob match over live (non-expired) keys.
    async fn keys(&self, pattern: &str) -> StorageResult<Vec<String>>;

    /// Deletes every live key matching `pattern`; returns the count removed.
    async fn delete_pattern(&self, pattern: &str) -> StorageResult<usize> {
        let matched = self.keys(pattern).await?;
        let mut count = 0;
        for k in matched {
            if self.delete(&k).await? {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn lpush(&self, key: &str, value: Value) -> StorageResult<usize>;
    /// Inclusive chronological range read; negative indices count from the end.
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StorageResult<Vec<Value>>;
    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> StorageResult<()>;
    async fn llen(&self, key: &str) -> StorageResult<usize>;

    /// Atomic (within this process) increment; returns the new value.
    async fn incr(&self, key: &str, by: i64) -> StorageResult<i64>;
}

/// Resolves a half-open Python-style slice range (supporting negative
/// indices) against a collection of length `len`, clamped to bounds.
pub(crate) fn resolve_range(len: usize, start: isize, stop: isize) -> (usize, usize) {
    let resolve = |idx: isize| -> isize {
        if idx < 0 {
            (len as isize + idx).max(0)
        } else {
            idx
        }
    };
    let s = resolve(start).min(len as isize) as usize;
    let e = resolve(stop).min(len as isize - 1).max(-1);
    if e < 0 || s as isize > e {
        (0, 0)
    } else {
        (s, e as usize + 1)
    }
}
