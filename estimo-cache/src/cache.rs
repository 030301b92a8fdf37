//! Tenant-aware read-through cache.
//!
//! [`TenantCache`] sits between HTTP handlers and their SQL queries. A lookup
//! that hits returns the stored value; a miss runs the caller's producer,
//! stores the result under the tenant-scoped key and registers it under each
//! dependency tag so a later write can invalidate it.
//!
//! # Failure model
//!
//! The cache fails open. A store that is down, or a payload that no longer
//! decodes, counts as a miss and the producer runs. A failed write still
//! returns the fresh value. Only the producer's own error reaches the caller.
//!
//! # Consistency
//!
//! There is no single-flight: concurrent misses on one key may each run the
//! producer. A populate racing an invalidation of the same tag can leave a
//! stale entry alive until its TTL expires.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use estimo_core::{CacheError, CacheSettings, EstimoResult, TenantId};
use serde::{de::DeserializeOwned, Serialize};

use crate::entry::CacheEntry;
use crate::index::DependencyIndex;
use crate::key::{TenantScopedKey, TenantScopedTag};
use crate::options::CacheOptions;
use crate::read::CacheRead;
use crate::stats::{CacheStats, StatsCollector};
use crate::store::{open_store, KeyValueStore};

/// Outcome of one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Keys the store dropped because their TTL elapsed.
    pub purged: u64,
    /// Index entries whose key was no longer in the store.
    pub pruned: u64,
    pub errors: u64,
}

/// Read-through cache shared by every request of the process.
pub struct TenantCache {
    pub(crate) store: Arc<dyn KeyValueStore>,
    pub(crate) index: DependencyIndex,
    pub(crate) stats: StatsCollector,
    enabled: AtomicBool,
    default_ttl: Duration,
}

impl TenantCache {
    /// Build a cache over an already opened store.
    pub fn new(store: Arc<dyn KeyValueStore>, settings: &CacheSettings) -> Self {
        Self {
            store,
            index: DependencyIndex::new(),
            stats: StatsCollector::new(),
            enabled: AtomicBool::new(settings.enabled),
            default_ttl: settings.default_ttl,
        }
    }

    /// Open the configured store and build a cache over it.
    pub async fn open(settings: &CacheSettings) -> EstimoResult<Self> {
        let store = open_store(settings).await?;
        let cache = Self::new(store, settings);

        // Persistent backends come back with entries this index never saw.
        let indexed = match cache.rebuild_index().await {
            Ok(indexed) => indexed,
            Err(e) => {
                tracing::warn!(error = %e, "Index rebuild failed, entries index on first hit");
                0
            }
        };

        tracing::info!(
            backend = cache.backend_name(),
            enabled = settings.enabled,
            default_ttl_secs = settings.default_ttl.as_secs(),
            indexed,
            "Cache opened"
        );
        Ok(cache)
    }

    /// Index the dependency tags of every live entry already in the store.
    ///
    /// Returns the number of keys that were indexed.
    pub async fn rebuild_index(&self) -> Result<usize, CacheError> {
        let now = chrono::Utc::now();
        let mut indexed = 0;

        for key in self.store.live_keys().await? {
            let Some(bytes) = self.store.get(&key).await? else {
                continue;
            };
            match CacheEntry::decode(&bytes) {
                Ok(entry) if entry.is_expired_at(now) => {}
                Ok(entry) => {
                    if self.index.sync_tags(&key, &entry.dependencies) {
                        indexed += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping undecodable entry in index rebuild");
                }
            }
        }

        Ok(indexed)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Flip the kill switch at runtime.
    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.enabled.swap(enabled, Ordering::Relaxed);
        if previous != enabled {
            tracing::info!(enabled, "Cache kill switch toggled");
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    pub fn index(&self) -> &DependencyIndex {
        &self.index
    }

    /// Return the cached value for `key`, or run `producer` and cache its
    /// result.
    ///
    /// When the cache is disabled the producer runs on every call and the
    /// store is never touched.
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        tenant_id: &TenantId,
        key: &str,
        options: CacheOptions,
        producer: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.get_or_set_read(tenant_id, key, options, producer)
            .await
            .map(CacheRead::into_value)
    }

    /// Like [`get_or_set`](Self::get_or_set) but reports whether the value
    /// came from the cache and how old it is.
    pub async fn get_or_set_read<T, E, F, Fut>(
        &self,
        tenant_id: &TenantId,
        key: &str,
        options: CacheOptions,
        producer: F,
    ) -> Result<CacheRead<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.read_through(tenant_id, key, options, producer)
            .await
            .map(|(read, _)| read)
    }

    /// Read-through that also reports whether the value is now in the store:
    /// always on a hit, and on a miss only if the write succeeded.
    pub(crate) async fn read_through<T, E, F, Fut>(
        &self,
        tenant_id: &TenantId,
        key: &str,
        options: CacheOptions,
        producer: F,
    ) -> Result<(CacheRead<T>, bool), E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.is_enabled() {
            return producer()
                .await
                .map(|value| (CacheRead::from_producer(value), false));
        }

        let started = Instant::now();
        let encoded = TenantScopedKey::new(tenant_id, key).encode();

        if let Some(read) = self.lookup::<T>(&encoded).await {
            self.stats.record_hit();
            self.stats.record_latency(started.elapsed());
            tracing::debug!(tenant = %tenant_id, key, "Cache hit");
            return Ok((read, true));
        }

        self.stats.record_miss();
        tracing::debug!(tenant = %tenant_id, key, "Cache miss");

        let value = match producer().await {
            Ok(value) => value,
            Err(e) => {
                self.stats.record_latency(started.elapsed());
                return Err(e);
            }
        };

        let stored = self.store_entry(tenant_id, &encoded, &value, &options).await;
        self.stats.record_latency(started.elapsed());

        Ok((CacheRead::from_producer(value), stored))
    }

    /// Read a cached value without populating on miss.
    pub async fn get<T: DeserializeOwned>(&self, tenant_id: &TenantId, key: &str) -> Option<T> {
        if !self.is_enabled() {
            return None;
        }

        let started = Instant::now();
        let encoded = TenantScopedKey::new(tenant_id, key).encode();
        let read = self.lookup::<T>(&encoded).await;

        match read {
            Some(_) => self.stats.record_hit(),
            None => self.stats.record_miss(),
        }
        self.stats.record_latency(started.elapsed());

        read.map(CacheRead::into_value)
    }

    /// Store a value directly. Returns `true` if it was persisted.
    pub async fn set<T: Serialize>(
        &self,
        tenant_id: &TenantId,
        key: &str,
        value: &T,
        options: CacheOptions,
    ) -> bool {
        if !self.is_enabled() {
            return false;
        }

        let started = Instant::now();
        let encoded = TenantScopedKey::new(tenant_id, key).encode();
        let stored = self.store_entry(tenant_id, &encoded, value, &options).await;
        self.stats.record_latency(started.elapsed());
        stored
    }

    /// Remove one entry and its index links.
    ///
    /// Runs even while the cache is disabled so that data changed during an
    /// outage does not come back when the switch is flipped on.
    pub async fn delete(&self, tenant_id: &TenantId, key: &str) -> Result<bool, CacheError> {
        let started = Instant::now();
        let encoded = TenantScopedKey::new(tenant_id, key).encode();

        let result = self.store.delete(&encoded).await;
        self.stats.record_latency(started.elapsed());

        match result {
            Ok(removed) => {
                self.index.remove_key(&encoded);
                Ok(removed)
            }
            Err(e) => {
                self.stats.record_error();
                tracing::warn!(tenant = %tenant_id, key, error = %e, "Cache delete failed");
                Err(e)
            }
        }
    }

    /// Check for a live entry. Always `false` while disabled.
    pub async fn exists(&self, tenant_id: &TenantId, key: &str) -> Result<bool, CacheError> {
        if !self.is_enabled() {
            return Ok(false);
        }

        let started = Instant::now();
        let encoded = TenantScopedKey::new(tenant_id, key).encode();
        let result = self.store.exists(&encoded).await;
        self.stats.record_latency(started.elapsed());

        result.map_err(|e| {
            self.stats.record_error();
            e
        })
    }

    /// Current counters plus the number of live keys.
    ///
    /// Falls back to the index's key count when the store cannot be asked.
    pub async fn stats(&self) -> CacheStats {
        let total_keys = match self.store.key_count().await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(error = %e, "Store key count unavailable, using index");
                self.index.key_count() as u64
            }
        };
        self.stats.snapshot(total_keys)
    }

    /// Drop expired entries and prune index links to keys the store no
    /// longer holds.
    pub async fn sweep_once(&self) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();

        match self.store.purge_expired().await {
            Ok(purged) => {
                for key in &purged {
                    self.index.remove_key(key);
                }
                outcome.purged = purged.len() as u64;
            }
            Err(e) => {
                outcome.errors += 1;
                tracing::warn!(error = %e, "Cache purge failed");
            }
        }

        for key in self.index.indexed_keys() {
            match self.store.exists(&key).await {
                Ok(true) => {}
                Ok(false) => {
                    if self.index.remove_key(&key) {
                        outcome.pruned += 1;
                    }
                }
                Err(e) => {
                    outcome.errors += 1;
                    tracing::warn!(error = %e, "Index reconciliation stopped");
                    break;
                }
            }
        }

        outcome
    }

    /// Fetch and decode an entry. Any failure is logged and reads as absent.
    async fn lookup<T: DeserializeOwned>(&self, encoded: &str) -> Option<CacheRead<T>> {
        let bytes = match self.store.get(encoded).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                self.stats.record_error();
                tracing::warn!(key = encoded, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        let decoded = CacheEntry::decode(&bytes).and_then(|entry| {
            let value = entry.value_as::<T>()?;
            Ok((entry, value))
        });

        match decoded {
            Ok((entry, _)) if entry.is_expired_at(chrono::Utc::now()) => None,
            Ok((entry, value)) => {
                // Entries written before a restart, or by another process,
                // are indexed the first time they are read.
                self.index.sync_tags(encoded, &entry.dependencies);
                Some(CacheRead::from_cache(value, entry.cached_at))
            }
            Err(e) => {
                self.stats.record_error();
                tracing::warn!(key = encoded, error = %e, "Undecodable cache entry, treating as miss");
                None
            }
        }
    }

    /// Persist `value` and index its dependencies. Returns `true` on success.
    async fn store_entry<T: Serialize>(
        &self,
        tenant_id: &TenantId,
        encoded: &str,
        value: &T,
        options: &CacheOptions,
    ) -> bool {
        let ttl = options.effective_ttl(self.default_ttl);
        if ttl.is_zero() {
            tracing::debug!(key = encoded, "Zero TTL, value not cached");
            return false;
        }

        let tags: BTreeSet<String> = options
            .dependencies
            .iter()
            .map(|tag| TenantScopedTag::new(tenant_id, tag.as_str()).encode())
            .collect();

        let bytes = CacheEntry::new(value, ttl, tags.clone(), options.metadata.clone())
            .and_then(|entry| entry.encode());
        let bytes = match bytes {
            Ok(bytes) => bytes,
            Err(e) => {
                self.stats.record_error();
                tracing::warn!(key = encoded, error = %e, "Value not serializable, not cached");
                return false;
            }
        };

        if let Err(e) = self.store.set(encoded, &bytes, ttl).await {
            self.stats.record_error();
            tracing::warn!(key = encoded, error = %e, "Cache write failed");
            return false;
        }

        self.index.replace_tags(encoded, &tags);
        self.stats.record_set();
        true
    }
}
