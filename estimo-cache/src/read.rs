//! Result of a read-through lookup.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// A value returned by the cache together with where it came from.
///
/// Handlers that only need the value call [`CacheRead::into_value`]; those
/// that surface freshness (e.g. an `Age` header) use [`CacheRead::staleness`].
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    /// When the value was stored, or produced for a miss.
    cached_at: DateTime<Utc>,
    hit: bool,
}

impl<T> CacheRead<T> {
    /// A value served from the store.
    pub fn from_cache(value: T, cached_at: DateTime<Utc>) -> Self {
        Self {
            value,
            cached_at,
            hit: true,
        }
    }

    /// A value freshly computed by the producer.
    pub fn from_producer(value: T) -> Self {
        Self {
            value,
            cached_at: Utc::now(),
            hit: false,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }

    pub fn was_cache_hit(&self) -> bool {
        self.hit
    }

    pub fn was_cache_miss(&self) -> bool {
        !self.hit
    }

    /// Time since the value was stored. Zero for a fresh miss.
    pub fn staleness(&self) -> Duration {
        (Utc::now() - self.cached_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            cached_at: self.cached_at,
            hit: self.hit,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cache() {
        let cached_at = Utc::now();
        let read = CacheRead::from_cache(vec![1, 2, 3], cached_at);

        assert!(read.was_cache_hit());
        assert!(!read.was_cache_miss());
        assert_eq!(read.value(), &vec![1, 2, 3]);
        assert_eq!(read.cached_at(), cached_at);
    }

    #[test]
    fn test_from_producer() {
        let read = CacheRead::from_producer(42i32);
        assert!(read.was_cache_miss());
        assert!(read.staleness() < Duration::from_secs(1));
        assert_eq!(read.into_value(), 42);
    }

    #[test]
    fn test_staleness() {
        let past = Utc::now() - chrono::Duration::seconds(5);
        let read = CacheRead::from_cache("materials", past);

        let staleness = read.staleness();
        assert!(staleness >= Duration::from_secs(4));
        assert!(staleness <= Duration::from_secs(10));
    }

    #[test]
    fn test_future_cached_at_is_not_negative() {
        let future = Utc::now() + chrono::Duration::seconds(30);
        let read = CacheRead::from_cache((), future);
        assert_eq!(read.staleness(), Duration::ZERO);
    }

    #[test]
    fn test_map_keeps_origin() {
        let read = CacheRead::from_cache(42i32, Utc::now()).map(|v| v.to_string());
        assert!(read.was_cache_hit());
        assert_eq!(read.into_value(), "42");
    }
}
