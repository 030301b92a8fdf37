//! Dependency-tagged invalidation.
//!
//! Mutating handlers name the tags their write affects; every entry that was
//! populated with one of those tags is deleted. Invalidation never fails the
//! request: what could not be deleted is reported and stays indexed so the
//! next invalidation of the same tag retries it.

use estimo_core::{CacheError, TenantId};
use serde::Serialize;

use crate::cache::TenantCache;
use crate::key::{tenant_prefix, TenantScopedTag};

/// What an invalidation did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    /// Keys indexed under the tag(s) when the call started.
    pub keys_found: usize,
    pub deleted: usize,
    /// Indexed keys whose entry had already expired or been removed.
    pub already_gone: usize,
    pub failed: usize,
}

impl InvalidationReport {
    /// `true` when no delete failed.
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }

    fn merge(&mut self, other: InvalidationReport) {
        self.keys_found += other.keys_found;
        self.deleted += other.deleted;
        self.already_gone += other.already_gone;
        self.failed += other.failed;
    }
}

impl TenantCache {
    /// Delete every entry of `tenant_id` that depends on `tag`.
    ///
    /// Calling it again for the same tag is a no-op. Runs even while the
    /// cache is disabled.
    pub async fn invalidate(&self, tenant_id: &TenantId, tag: &str) -> InvalidationReport {
        let scoped = TenantScopedTag::new(tenant_id, tag).encode();
        let keys = self.index.keys_for_tag(&scoped);

        let mut report = InvalidationReport {
            keys_found: keys.len(),
            ..Default::default()
        };

        for key in keys {
            match self.store.delete(&key).await {
                Ok(removed) => {
                    if removed {
                        report.deleted += 1;
                    } else {
                        report.already_gone += 1;
                    }
                    // Also drops the key from its other tags and prunes the
                    // tag once it is empty.
                    self.index.remove_key(&key);
                }
                Err(e) => {
                    report.failed += 1;
                    self.stats.record_error();
                    tracing::warn!(
                        tenant = %tenant_id,
                        tag,
                        key = %key,
                        error = %e,
                        "Failed to delete cache entry during invalidation"
                    );
                }
            }
        }

        if report.keys_found > 0 {
            tracing::debug!(
                tenant = %tenant_id,
                tag,
                deleted = report.deleted,
                already_gone = report.already_gone,
                failed = report.failed,
                "Tag invalidated"
            );
        }

        report
    }

    /// Invalidate several tags and sum the reports.
    pub async fn invalidate_many<I, S>(&self, tenant_id: &TenantId, tags: I) -> InvalidationReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut total = InvalidationReport::default();
        for tag in tags {
            total.merge(self.invalidate(tenant_id, tag.as_ref()).await);
        }
        total
    }

    /// Remove every entry of one tenant, tagged or not.
    ///
    /// Returns the number of entries the store removed. On failure the index
    /// is left untouched.
    pub async fn invalidate_tenant(&self, tenant_id: &TenantId) -> Result<u64, CacheError> {
        let prefix = tenant_prefix(tenant_id);

        let deleted = self.store.delete_prefix(&prefix).await.map_err(|e| {
            self.stats.record_error();
            tracing::warn!(tenant = %tenant_id, error = %e, "Tenant invalidation failed");
            e
        })?;
        let unindexed = self.index.remove_keys_with_prefix(&prefix);

        tracing::info!(
            tenant = %tenant_id,
            deleted,
            unindexed,
            "Tenant cache invalidated"
        );

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CacheOptions;
    use crate::store::InMemoryStore;
    use estimo_core::CacheSettings;
    use std::sync::Arc;

    fn tenant(id: &str) -> TenantId {
        TenantId::new(id).expect("valid tenant id")
    }

    fn memory_cache() -> TenantCache {
        TenantCache::new(Arc::new(InMemoryStore::new()), &CacheSettings::default())
    }

    async fn put(cache: &TenantCache, tenant_id: &TenantId, key: &str, tags: &[&str]) {
        let options = CacheOptions::new().with_dependencies(tags.iter().copied());
        assert!(cache.set(tenant_id, key, &key.len(), options).await);
    }

    #[tokio::test]
    async fn test_invalidate_removes_only_tagged_keys() {
        let cache = memory_cache();
        let acme = tenant("acme");
        put(&cache, &acme, "materials:list", &["materials"]).await;
        put(&cache, &acme, "materials:7", &["materials", "material:7"]).await;
        put(&cache, &acme, "projects:list", &["projects"]).await;

        let report = cache.invalidate(&acme, "materials").await;

        assert_eq!(report.keys_found, 2);
        assert_eq!(report.deleted, 2);
        assert!(report.is_complete());
        assert!(!cache.exists(&acme, "materials:list").await.expect("exists"));
        assert!(!cache.exists(&acme, "materials:7").await.expect("exists"));
        assert!(cache.exists(&acme, "projects:list").await.expect("exists"));
        // the key's other tag went away with it
        assert!(cache.index().keys_for_tag("acme:material:7").is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_is_idempotent() {
        let cache = memory_cache();
        let acme = tenant("acme");
        put(&cache, &acme, "k", &["t"]).await;

        let first = cache.invalidate(&acme, "t").await;
        let second = cache.invalidate(&acme, "t").await;

        assert_eq!(first.deleted, 1);
        assert_eq!(second, InvalidationReport::default());
        assert_eq!(cache.index().tag_count(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_unknown_tag() {
        let cache = memory_cache();
        let report = cache.invalidate(&tenant("acme"), "never-used").await;
        assert_eq!(report, InvalidationReport::default());
    }

    #[tokio::test]
    async fn test_invalidate_is_tenant_scoped() {
        let cache = memory_cache();
        let acme = tenant("acme");
        let globex = tenant("globex");
        put(&cache, &acme, "materials:list", &["materials"]).await;
        put(&cache, &globex, "materials:list", &["materials"]).await;

        cache.invalidate(&acme, "materials").await;

        assert!(!cache.exists(&acme, "materials:list").await.expect("exists"));
        assert!(cache.exists(&globex, "materials:list").await.expect("exists"));
    }

    #[tokio::test]
    async fn test_invalidate_many() {
        let cache = memory_cache();
        let acme = tenant("acme");
        put(&cache, &acme, "a", &["x", "y"]).await;
        put(&cache, &acme, "b", &["y"]).await;
        put(&cache, &acme, "c", &["z"]).await;

        let report = cache.invalidate_many(&acme, ["x", "y"]).await;

        // "a" is gone after "x", so "y" only finds "b"
        assert_eq!(report.keys_found, 2);
        assert_eq!(report.deleted, 2);
        assert!(cache.exists(&acme, "c").await.expect("exists"));
    }

    #[tokio::test]
    async fn test_invalidate_tenant() {
        let cache = memory_cache();
        let acme = tenant("acme");
        let acme2 = tenant("acme2");
        put(&cache, &acme, "a", &["x"]).await;
        put(&cache, &acme, "b", &[]).await;
        put(&cache, &acme2, "a", &["x"]).await;

        let deleted = cache.invalidate_tenant(&acme).await.expect("invalidate");

        assert_eq!(deleted, 2);
        assert!(cache.index().keys_for_tag("acme:x").is_empty());
        assert_eq!(cache.index().keys_for_tag("acme2:x").len(), 1);
        assert!(cache.exists(&acme2, "a").await.expect("exists"));
    }

    #[tokio::test]
    async fn test_invalidate_while_disabled() {
        let cache = memory_cache();
        let acme = tenant("acme");
        put(&cache, &acme, "k", &["t"]).await;

        cache.set_enabled(false);
        assert_eq!(cache.invalidate(&acme, "t").await.deleted, 1);
        cache.set_enabled(true);

        assert_eq!(cache.get::<usize>(&acme, "k").await, None);
    }
}
