//! Pluggable key/value, collection, and session-with-TTL storage.
//!
//! Three layers, leaves first: [`backend`] defines the common backend
//! contract implemented by [`backends::MemoryBackend`],
//! [`backends::FileBackend`], and [`backends::SqliteBackend`];
//! [`providers`] wraps a backend in the three typed views callers actually
//! use; [`factory`] routes a purpose key (`"history"`, `"sessions"`, …) to a
//! configured provider.

pub mod backend;
pub mod backends;
pub mod context;
pub mod error;
pub mod factory;
pub mod pattern;
pub mod providers;

pub use backend::StorageBackend;
pub use context::{StorageContext, StorageContextOptions};
pub use error::{StorageError, StorageResult};
pub use factory::{Factory, FactoryConfig, ProviderConfig};
pub use providers::{CollectionProvider, KeyValueProvider, SessionProvider};
