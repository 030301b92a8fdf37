//! Redis-backed store.
//!
//! Requires the `redis` feature. Expiry is delegated to Redis via `SETEX`, so
//! [`KeyValueStore::purge_expired`] has nothing to do here.
//!
//! The dependency index stays in the process. It is rebuilt from the key
//! space when the cache opens and extended on every hit, but an invalidation
//! only reaches keys this process knows about. Run a single writer per
//! prefix, or give each node its own prefix.

use std::time::Duration;

use ::redis::aio::MultiplexedConnection;
use ::redis::{AsyncCommands, Client};
use async_trait::async_trait;
use estimo_core::CacheError;

use super::{KeyValueStore, StoreResult};

const BACKEND: &str = "redis";

fn redis_err(op: &str, e: ::redis::RedisError) -> CacheError {
    CacheError::unavailable(BACKEND, format!("{} failed: {}", op, e))
}

/// Escape glob metacharacters so a literal prefix can be used with `KEYS`.
fn escape_glob(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Whole seconds for `SETEX`, rounded up and never zero.
fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

/// Redis store sharing one multiplexed connection.
pub struct RedisStore {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisStore {
    /// Connect to `url`. Every key is stored under `prefix`.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> StoreResult<Self> {
        let client = Client::open(url).map_err(|e| redis_err("client open", e))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| redis_err("connect", e))?;

        let prefix = prefix.into();
        tracing::info!(prefix = %prefix, "Connected to Redis cache store");

        Ok(Self { conn, prefix })
    }

    fn prefixed_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn pattern(&self, key_prefix: &str) -> String {
        format!("{}*", escape_glob(&self.prefixed_key(key_prefix)))
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        conn.get(self.prefixed_key(key))
            .await
            .map_err(|e| redis_err("GET", e))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(self.prefixed_key(key), value, ttl_secs(ttl))
            .await
            .map_err(|e| redis_err("SETEX", e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = conn
            .del(self.prefixed_key(key))
            .await
            .map_err(|e| redis_err("DEL", e))?;
        Ok(deleted > 0)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        conn.exists(self.prefixed_key(key))
            .await
            .map_err(|e| redis_err("EXISTS", e))
    }

    async fn key_count(&self) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn
            .keys(self.pattern(""))
            .await
            .map_err(|e| redis_err("KEYS", e))?;
        Ok(keys.len() as u64)
    }

    async fn live_keys(&self) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn
            .keys(self.pattern(""))
            .await
            .map_err(|e| redis_err("KEYS", e))?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(self.prefix.as_str()).map(str::to_string))
            .collect())
    }

    async fn purge_expired(&self) -> StoreResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn delete_prefix(&self, prefix: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn
            .keys(self.pattern(prefix))
            .await
            .map_err(|e| redis_err("KEYS", e))?;

        if keys.is_empty() {
            return Ok(0);
        }

        let deleted: i64 = conn.del(&keys).await.map_err(|e| redis_err("DEL", e))?;
        Ok(deleted.max(0) as u64)
    }
}
