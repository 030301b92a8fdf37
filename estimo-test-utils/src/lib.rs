//! Estimo Test Utilities
//!
//! Shared test infrastructure for the Estimo workspace:
//! - A fault-injecting store for fail-open tests
//! - Counting producers
//! - Proptest generators for tenants, keys and tags
//! - Fixtures for common cache setups

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
pub use estimo_cache::{
    CacheOptions, InMemoryStore, InvalidationReport, KeyValueStore, StoreResult, TenantCache,
};
pub use estimo_core::{CacheError, CacheSettings, TenantId};

// ============================================================================
// FAULT INJECTION
// ============================================================================

/// In-memory store whose operations can be told to fail.
///
/// Failures come back as `CacheError::BackendUnavailable`, the same as a
/// dropped Redis connection. Every call is counted, including failed ones.
#[derive(Default)]
pub struct FaultyStore {
    inner: InMemoryStore,
    fail_get: AtomicBool,
    fail_set: AtomicBool,
    fail_delete: AtomicBool,
    fail_exists: AtomicBool,
    fail_key_count: AtomicBool,
    failing_delete_keys: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_get(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn fail_set(&self, fail: bool) {
        self.fail_set.store(fail, Ordering::SeqCst);
    }

    pub fn fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub fn fail_exists(&self, fail: bool) {
        self.fail_exists.store(fail, Ordering::SeqCst);
    }

    pub fn fail_key_count(&self, fail: bool) {
        self.fail_key_count.store(fail, Ordering::SeqCst);
    }

    /// Make `delete` fail for one encoded key only.
    pub fn fail_delete_of(&self, encoded_key: impl Into<String>) {
        self.lock_failing().insert(encoded_key.into());
    }

    pub fn clear_delete_failures(&self) {
        self.fail_delete(false);
        self.lock_failing().clear();
    }

    /// Fail every operation, as if the backend went away.
    pub fn go_down(&self) {
        for flag in [
            &self.fail_get,
            &self.fail_set,
            &self.fail_delete,
            &self.fail_exists,
            &self.fail_key_count,
        ] {
            flag.store(true, Ordering::SeqCst);
        }
    }

    /// Total store calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lock_failing(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.failing_delete_keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self, flag: &AtomicBool, op: &str) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if flag.load(Ordering::SeqCst) {
            return Err(CacheError::unavailable(
                "faulty",
                format!("injected {} failure", op),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FaultyStore {
    fn backend_name(&self) -> &'static str {
        "faulty"
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.check(&self.fail_get, "get")?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        self.check(&self.fail_set, "set")?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.check(&self.fail_delete, "delete")?;
        if self.lock_failing().contains(key) {
            return Err(CacheError::unavailable(
                "faulty",
                format!("injected delete failure for {}", key),
            ));
        }
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.check(&self.fail_exists, "exists")?;
        self.inner.exists(key).await
    }

    async fn key_count(&self) -> StoreResult<u64> {
        self.check(&self.fail_key_count, "key_count")?;
        self.inner.key_count().await
    }

    async fn live_keys(&self) -> StoreResult<Vec<String>> {
        self.check(&self.fail_key_count, "live_keys")?;
        self.inner.live_keys().await
    }

    async fn purge_expired(&self) -> StoreResult<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.purge_expired().await
    }

    async fn delete_prefix(&self, prefix: &str) -> StoreResult<u64> {
        self.check(&self.fail_delete, "delete_prefix")?;
        self.inner.delete_prefix(prefix).await
    }
}

// ============================================================================
// PRODUCERS
// ============================================================================

/// Producer stand-in that counts how often the cache called it.
#[derive(Debug, Default)]
pub struct CountingProducer {
    calls: AtomicUsize,
}

impl CountingProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Succeed with `value`.
    pub async fn ok<T>(&self, value: T) -> Result<T, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }

    /// Fail with `message`.
    pub async fn fail<T>(&self, message: &str) -> Result<T, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(message.to_string())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for tenants, keys and tags.

    use super::*;
    use proptest::prelude::*;

    /// Generate a valid tenant id.
    pub fn arb_tenant_id() -> impl Strategy<Value = TenantId> {
        "[A-Za-z0-9][A-Za-z0-9._-]{0,31}"
            .prop_map(|s| TenantId::new(s).expect("strategy only yields valid ids"))
    }

    /// Generate a cache key, separators included.
    pub fn arb_cache_key() -> impl Strategy<Value = String> {
        "[a-z]{1,10}(:[a-z0-9=]{1,8}){0,3}"
    }

    /// Generate a dependency tag.
    pub fn arb_tag() -> impl Strategy<Value = String> {
        "[a-z]{1,10}(:[0-9]{1,4})?"
    }

    /// Generate a small set of dependency tags.
    pub fn arb_tags() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec(arb_tag(), 0..4)
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built caches and tenants.

    use super::*;

    /// Parse a tenant id known to be valid.
    pub fn tenant(id: &str) -> TenantId {
        TenantId::new(id).expect("fixture tenant id must be valid")
    }

    /// A tenant id no other test uses.
    pub fn unique_tenant() -> TenantId {
        tenant(&format!("t-{}", uuid::Uuid::now_v7().simple()))
    }

    /// An enabled cache over a fresh in-memory store.
    pub fn memory_cache() -> TenantCache {
        TenantCache::new(Arc::new(InMemoryStore::new()), &CacheSettings::default())
    }

    /// A cache over a [`FaultyStore`], returning both.
    pub fn faulty_cache() -> (TenantCache, Arc<FaultyStore>) {
        let store = Arc::new(FaultyStore::new());
        let cache = TenantCache::new(store.clone(), &CacheSettings::default());
        (cache, store)
    }

    /// The options a materials list handler uses.
    pub fn materials_options() -> CacheOptions {
        CacheOptions::new()
            .with_ttl(Duration::from_secs(300))
            .depends_on("materials")
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for cache-specific results.

    use super::*;

    /// Assert that an invalidation removed `deleted` entries without failures.
    #[track_caller]
    pub fn assert_clean_invalidation(report: &InvalidationReport, deleted: usize) {
        assert!(report.is_complete(), "Expected no failed deletes, got: {:?}", report);
        assert_eq!(report.deleted, deleted, "Wrong number of deleted entries: {:?}", report);
    }

    /// Assert that two floats are equal up to rounding.
    #[track_caller]
    pub fn assert_rate(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "Expected rate {}, got {}",
            expected,
            actual
        );
    }
}
