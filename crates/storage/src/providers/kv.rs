use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::StorageBackend;
use crate::error::StorageResult;

/// Key/value provider: `get/set(ttl?)/has/delete/keys/clear`.
///
/// Every key is namespaced as `"{namespace}:{key}"` on the underlying
/// backend so that providers created from the same backend for different
/// purposes never collide.
pub struct KeyValueProvider {
    backend: Arc<dyn StorageBackend>,
    namespace: String,
}

impl KeyValueProvider {
    pub fn new(backend: Arc<dyn StorageBackend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        let Some(value) = self.backend.get(&self.namespaced(key)).await? else {
            return Ok(None);
        };
        Ok(serde_json::from_value(value).ok())
    }

    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> StorageResult<()> {
        let json = serde_json::to_value(value)?;
        self.backend.set(&self.namespaced(key), json, ttl).await
    }

    pub async fn has(&self, key: &str) -> StorageResult<bool> {
        self.backend.has(&self.namespaced(key)).await
    }

    pub async fn delete(&self, key: &str) -> StorageResult<bool> {
        self.backend.delete(&self.namespaced(key)).await
    }

    pub async fn keys(&self) -> StorageResult<Vec<String>> {
        let prefix = format!("{}:", self.namespace);
        let matched = self.backend.keys(&format!("{prefix}*")).await?;
        Ok(matched
            .into_iter()
            .map(|k| k.trim_start_matches(&prefix).to_string())
            .collect())
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
