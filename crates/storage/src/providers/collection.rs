use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::StorageBackend;
use crate::error::StorageResult;

/// Collection provider: a single named, append-only ordered sequence.
/// `namespace` is the collection's key on the backend (e.g.
/// `messages:<sessionId>`); chronological order is preserved end to end.
///
/// Uses the backend's native `lpush`/`lrange` list ops directly — every
/// backend in this workspace implements them, so a `get('items')`/
/// `set('items', …)` fallback for backends without list support is
/// unneeded here.
pub struct CollectionProvider {
    backend: Arc<dyn StorageBackend>,
    key: String,
}

impl CollectionProvider {
    pub fn new(backend: Arc<dyn StorageBackend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            key: namespace.into(),
        }
    }

    pub async fn add<T: Serialize>(&self, value: &T) -> StorageResult<()> {
        let json = serde_json::to_value(value)?;
        self.backend.lpush(&self.key, json).await?;
        Ok(())
    }

    pub async fn get_all<T: DeserializeOwned>(&self) -> StorageResult<Vec<T>> {
        let raw = self.backend.lrange(&self.key, 0, -1).await?;
        Ok(raw
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect())
    }

    pub async fn find<T: DeserializeOwned>(
        &self,
        predicate: impl Fn(&T) -> bool,
    ) -> StorageResult<Vec<T>> {
        Ok(self
            .get_all::<T>()
            .await?
            .into_iter()
            .filter(predicate)
            .collect())
    }

    /// Rewrites the collection keeping only entries for which `predicate`
    /// returns `false`. Returns the number of entries removed.
    pub async fn remove<T: Serialize + DeserializeOwned>(
        &self,
        predicate: impl Fn(&T) -> bool,
    ) -> StorageResult<usize> {
        let all: Vec<T> = self.get_all().await?;
        let before = all.len();
        let kept: Vec<T> = all.into_iter().filter(|v| !predicate(v)).collect();
        let removed = before - kept.len();
        self.replace_all(&kept).await?;
        Ok(removed)
    }

    pub async fn count(&self) -> StorageResult<usize> {
        self.backend.llen(&self.key).await
    }

    pub async fn clear(&self) -> StorageResult<()> {
        self.backend.delete(&self.key).await?;
        Ok(())
    }

    pub async fn close(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn replace_all<T: Serialize>(&self, values: &[T]) -> StorageResult<()> {
        self.clear().await?;
        for v in values {
            self.add(v).await?;
        }
        Ok(())
    }
}
