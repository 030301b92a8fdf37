//! Key-value store adapters.
//!
//! A [`KeyValueStore`] holds opaque byte payloads under string keys with a
//! TTL. The orchestrator never sees backend details: every failure comes back
//! as a [`CacheError`] and is treated as a miss.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use estimo_core::{CacheBackendKind, CacheError, CacheSettings, EstimoResult};

pub mod lmdb;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use lmdb::{LmdbStore, LmdbStoreError};
pub use memory::InMemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, CacheError>;

/// Pluggable cache backend.
///
/// Implementations must be safe for concurrent use from many request tasks
/// and must never return a value whose TTL has elapsed.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    /// Fetch a live value.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Store a value that expires after `ttl`, replacing any previous value.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()>;

    /// Remove a value. Returns `true` if a live value was removed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Check whether a live value exists.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Number of live keys.
    async fn key_count(&self) -> StoreResult<u64>;

    /// Every live key, used to rebuild the dependency index after a restart.
    async fn live_keys(&self) -> StoreResult<Vec<String>>;

    /// Drop expired entries and return their keys.
    ///
    /// Backends that expire entries on their own return an empty list.
    async fn purge_expired(&self) -> StoreResult<Vec<String>>;

    /// Remove every key starting with `prefix`. Returns the number removed.
    async fn delete_prefix(&self, prefix: &str) -> StoreResult<u64>;
}

/// Open the store selected by `settings.backend`.
pub async fn open_store(settings: &CacheSettings) -> EstimoResult<Arc<dyn KeyValueStore>> {
    settings.validate()?;

    match &settings.backend {
        CacheBackendKind::Memory => Ok(Arc::new(InMemoryStore::new())),
        CacheBackendKind::Lmdb { path, max_size_mb } => {
            let store = LmdbStore::new(path, *max_size_mb).map_err(CacheError::from)?;
            Ok(Arc::new(store))
        }
        #[cfg(feature = "redis")]
        CacheBackendKind::Redis { url, prefix } => {
            let store = RedisStore::connect(url, prefix.clone()).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        CacheBackendKind::Redis { .. } => Err(estimo_core::ConfigError::BackendNotSupported {
            backend: "redis (build with the `redis` feature)".to_string(),
        }
        .into()),
    }
}
