//! Stored entry envelope.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use estimo_core::CacheError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// What the store holds for one cache key.
///
/// The payload is kept as a JSON value so that a single envelope type serves
/// every caller type; it is converted to `T` only on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CacheEntry {
    /// Wrap `value` for storage with the given TTL, starting now.
    pub fn new<T: Serialize>(
        value: &T,
        ttl: Duration,
        dependencies: BTreeSet<String>,
        metadata: BTreeMap<String, String>,
    ) -> Result<Self, CacheError> {
        let value = serde_json::to_value(value).map_err(CacheError::serialization)?;
        let cached_at = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| cached_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Ok(Self {
            value,
            cached_at,
            expires_at,
            dependencies,
            metadata,
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(self).map_err(CacheError::serialization)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CacheError> {
        serde_json::from_slice(bytes).map_err(CacheError::serialization)
    }

    /// Convert the payload to the caller's type.
    pub fn value_as<T: DeserializeOwned>(&self) -> Result<T, CacheError> {
        serde_json::from_value(self.value.clone()).map_err(CacheError::serialization)
    }
}
