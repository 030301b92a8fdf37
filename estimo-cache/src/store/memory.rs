//! In-memory store backed by a sharded concurrent map.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::{KeyValueStore, StoreResult};

/// Far-future fallback when `now + ttl` overflows.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

struct StoredValue {
    data: Vec<u8>,
    expires_at: Instant,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Process-local store with per-entry deadlines.
///
/// Expired entries are invisible to reads and removed lazily, either on the
/// next access or by [`KeyValueStore::purge_expired`]. Deadlines use
/// `tokio::time::Instant`, so paused-clock tests can advance past a TTL.
#[derive(Default)]
pub struct InMemoryStore {
    entries: DashMap<String, StoredValue>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn raw_len(&self) -> usize {
        self.entries.len()
    }

    fn deadline(ttl: Duration) -> Instant {
        let now = Instant::now();
        now.checked_add(ttl)
            .or_else(|| now.checked_add(MAX_TTL))
            .unwrap_or(now)
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let now = Instant::now();

        match self.entries.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.data.clone())),
            Some(_) => {}
        }

        // The read guard is released here; removing under it would deadlock the shard.
        self.entries.remove_if(key, |_, value| value.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        self.entries.insert(
            key.to_string(),
            StoredValue {
                data: value.to_vec(),
                expires_at: Self::deadline(ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .map(|(_, value)| !value.is_expired(now))
            .unwrap_or(false))
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .map(|entry| !entry.is_expired(now))
            .unwrap_or(false))
    }

    async fn key_count(&self) -> StoreResult<u64> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count() as u64)
    }

    async fn live_keys(&self) -> StoreResult<Vec<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn purge_expired(&self) -> StoreResult<Vec<String>> {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        let mut purged = Vec::with_capacity(expired.len());
        for key in expired {
            if self
                .entries
                .remove_if(&key, |_, value| value.is_expired(now))
                .is_some()
            {
                purged.push(key);
            }
        }

        Ok(purged)
    }

    async fn delete_prefix(&self, prefix: &str) -> StoreResult<u64> {
        let matching: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();

        let mut deleted = 0u64;
        for key in matching {
            if self.entries.remove(&key).is_some() {
                deleted += 1;
            }
        }

        Ok(deleted)
    }
}
