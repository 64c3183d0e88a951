//! Purpose-keyed storage factory.
//!
//! Resolves a purpose key (`"history"`, `"sessions"`, `"userInfo"`,
//! `"allowedTools"`, …) to a configured backend: exact key →
//! `custom.<key>` → `default`. A single `Factory` covers both the
//! single-store and split history/session/userInfo configuration shapes.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::backend::StorageBackend;
use crate::backends::{FileBackend, MemoryBackend, SqliteBackend};
use crate::context::StorageContext;
use crate::error::{StorageError, StorageResult};
use crate::providers::{CollectionProvider, KeyValueProvider, SessionProvider};

/// One entry of the abstract config shape:
/// `{ default, history?, sessions?, userInfo?, allowedTools?, custom? }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    Memory {
        #[serde(default)]
        max_size: Option<usize>,
    },
    File,
    Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactoryConfig {
    pub default: Option<ProviderConfig>,
    pub history: Option<ProviderConfig>,
    pub sessions: Option<ProviderConfig>,
    pub user_info: Option<ProviderConfig>,
    pub allowed_tools: Option<ProviderConfig>,
    pub custom: HashMap<String, ProviderConfig>,
}

/// Builds and memoizes typed providers per purpose, backed by a
/// [`StorageContext`]. Resolution order for a purpose key: exact key →
/// `custom.<key>` → `default`; a missing default is a configuration error.
pub struct Factory {
    ctx: StorageContext,
    config: FactoryConfig,
    backends: RwLock<HashMap<String, Arc<dyn StorageBackend>>>,
}

impl Factory {
    pub fn new(ctx: StorageContext, config: FactoryConfig) -> Self {
        Self {
            ctx,
            config,
            backends: RwLock::new(HashMap::new()),
        }
    }

    fn resolve_config(&self, purpose: &str) -> StorageResult<&ProviderConfig> {
        let named = match purpose {
            "history" => self.config.history.as_ref(),
            "sessions" => self.config.sessions.as_ref(),
            "userInfo" => self.config.user_info.as_ref(),
            "allowedTools" => self.config.allowed_tools.as_ref(),
            _ => None,
        };
        named
            .or_else(|| self.config.custom.get(purpose))
            .or(self.config.default.as_ref())
            .ok_or_else(|| {
                StorageError::Configuration(format!(
                    "no storage configuration for purpose `{purpose}` and no default configured"
                ))
            })
    }

    async fn backend_for(&self, purpose: &str) -> StorageResult<Arc<dyn StorageBackend>> {
        if let Some(backend) = self.backends.read().await.get(purpose) {
            return Ok(Arc::clone(backend));
        }

        let cfg = self.resolve_config(purpose)?.clone();
        let backend = self.build_backend(purpose, &cfg).await?;
        self.backends
            .write()
            .await
            .insert(purpose.to_string(), Arc::clone(&backend));
        Ok(backend)
    }

    async fn build_backend(
        &self,
        purpose: &str,
        cfg: &ProviderConfig,
    ) -> StorageResult<Arc<dyn StorageBackend>> {
        let backend: Arc<dyn StorageBackend> = match cfg {
            ProviderConfig::Memory { max_size } => Arc::new(MemoryBackend::new(*max_size)),
            ProviderConfig::File => {
                let root = self.ctx.sub_path(purpose);
                Arc::new(FileBackend::new(root))
            }
            ProviderConfig::Sqlite => {
                let path = self.ctx.sub_path("sqlite").join(format!("{purpose}.db"));
                match SqliteBackend::open(&path) {
                    Ok(b) => Arc::new(b),
                    Err(e) => {
                        log::warn!(
                            "storage: sqlite backend for `{purpose}` failed to connect ({e}); \
                             falling back to memory backend"
                        );
                        Arc::new(MemoryBackend::new(None))
                    }
                }
            }
        };
        backend.connect().await?;
        Ok(backend)
    }

    pub async fn key_value(&self, purpose: &str) -> StorageResult<KeyValueProvider> {
        Ok(KeyValueProvider::new(self.backend_for(purpose).await?, purpose))
    }

    pub async fn collection(&self, purpose: &str, name: &str) -> StorageResult<CollectionProvider> {
        Ok(CollectionProvider::new(self.backend_for(purpose).await?, name))
    }

    pub async fn session(&self, purpose: &str) -> StorageResult<SessionProvider> {
        Ok(SessionProvider::new(self.backend_for(purpose).await?, purpose))
    }

    pub fn context(&self) -> &StorageContext {
        &self.ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StorageContextOptions;

    fn memory_ctx() -> StorageContext {
        let dir = tempfile::tempdir().unwrap();
        StorageContext::resolve(StorageContextOptions {
            custom_root: Some(dir.path().to_path_buf()),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn resolves_named_purpose_before_default() {
        let factory = Factory::new(
            memory_ctx(),
            FactoryConfig {
                default: Some(ProviderConfig::Memory { max_size: None }),
                sessions: Some(ProviderConfig::Memory { max_size: Some(1) }),
                ..Default::default()
            },
        );
        let sessions = factory.key_value("sessions").await.unwrap();
        sessions.set("a", &1i64, None).await.unwrap();
        let err = sessions.set("b", &2i64, None).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn falls_back_to_default_when_purpose_unconfigured() {
        let factory = Factory::new(
            memory_ctx(),
            FactoryConfig {
                default: Some(ProviderConfig::Memory { max_size: None }),
                ..Default::default()
            },
        );
        let history = factory.key_value("history").await.unwrap();
        history.set("a", &1i64, None).await.unwrap();
        assert_eq!(history.get::<i64>("a").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn missing_default_is_configuration_error() {
        let factory = Factory::new(memory_ctx(), FactoryConfig::default());
        let err = factory.key_value("history").await;
        assert!(matches!(err, Err(StorageError::Configuration(_))));
    }

    #[tokio::test]
    async fn providers_are_memoized_per_purpose() {
        let factory = Factory::new(
            memory_ctx(),
            FactoryConfig {
                default: Some(ProviderConfig::Memory { max_size: None }),
                ..Default::default()
            },
        );
        let a = factory.key_value("history").await.unwrap();
        a.set("k", &1i64, None).await.unwrap();
        let b = factory.key_value("history").await.unwrap();
        assert_eq!(b.get::<i64>("k").await.unwrap(), Some(1));
    }
}
