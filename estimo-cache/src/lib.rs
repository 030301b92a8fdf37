//! Estimo Cache - Tenant-aware read-through cache
//!
//! HTTP handlers wrap their SQL reads in [`TenantCache::get_or_set`] and
//! mutating handlers call [`TenantCache::invalidate`] with the tags their
//! write touched.
//!
//! # Tenant Isolation
//!
//! Every operation takes a [`TenantId`](estimo_core::TenantId). Keys and tags
//! are scoped with [`TenantScopedKey`] and [`TenantScopedTag`], which cannot
//! be built without one, so two tenants can never read or invalidate each
//! other's entries.
//!
//! # Example
//!
//! ```ignore
//! let cache = TenantCache::open(&CacheSettings::from_env()?).await?;
//!
//! let materials = cache
//!     .get_or_set(&tenant, "materials:list", CacheOptions::new().depends_on("materials"), || {
//!         db.list_materials(&tenant)
//!     })
//!     .await?;
//!
//! // after a write
//! cache.invalidate(&tenant, "materials").await;
//! ```

pub mod cache;
pub mod entry;
pub mod index;
pub mod invalidation;
pub mod jobs;
pub mod key;
pub mod options;
pub mod read;
pub mod sql;
pub mod stats;
pub mod store;

pub use cache::{SweepOutcome, TenantCache};
pub use entry::CacheEntry;
pub use index::DependencyIndex;
pub use invalidation::InvalidationReport;
pub use key::{tenant_prefix, TenantScopedKey, TenantScopedTag};
pub use options::CacheOptions;
pub use read::CacheRead;
pub use sql::{CachedQuery, SqlExecutor, SqlParam, SqlRow};
pub use stats::{CacheStats, StatsCollector};
pub use store::{open_store, InMemoryStore, KeyValueStore, LmdbStore, LmdbStoreError, StoreResult};

#[cfg(feature = "redis")]
pub use store::RedisStore;
