//! LMDB-backed store.
//!
//! Uses heed (Rust bindings for LMDB) for a memory-mapped store that survives
//! process restarts, so a single-node deployment keeps its warm cache.
//!
//! # Layout
//!
//! Each value is `[expires_at: i64 millis LE][payload]`. Deadlines use the
//! wall clock since they must outlive the process. An entry past its deadline
//! reads as absent and is removed by [`KeyValueStore::purge_expired`].
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. Reads use read transactions, writes and
//! purges use a single write transaction each.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use estimo_core::CacheError;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};

use super::{KeyValueStore, StoreResult};

const HEADER_LEN: usize = 8;

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored bytes are shorter than the expiry header.
    #[error("Corrupt entry for key '{key}': {len} bytes")]
    CorruptEntry { key: String, len: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for CacheError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::CorruptEntry { .. } => CacheError::serialization(e),
            other => CacheError::unavailable("lmdb", other),
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

/// LMDB store with wall-clock TTLs.
pub struct LmdbStore {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LmdbStore {
    /// Open (or create) a store under `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the LMDB
    /// environment or database cannot be opened.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        let map_size = max_size_mb.checked_mul(1024 * 1024).ok_or_else(|| {
            LmdbStoreError::EnvOpen(format!("map size of {} MB overflows", max_size_mb))
        })?;

        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self { env, db })
    }

    fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn encode_value(value: &[u8], ttl: Duration) -> Vec<u8> {
        let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = Self::now_millis().saturating_add(ttl_millis);

        let mut bytes = Vec::with_capacity(HEADER_LEN + value.len());
        bytes.extend_from_slice(&expires_at.to_le_bytes());
        bytes.extend_from_slice(value);
        bytes
    }

    /// Split a stored value into its deadline and payload.
    fn decode_value<'a>(key: &str, bytes: &'a [u8]) -> Result<(i64, &'a [u8]), LmdbStoreError> {
        if bytes.len() < HEADER_LEN {
            return Err(LmdbStoreError::CorruptEntry {
                key: key.to_string(),
                len: bytes.len(),
            });
        }
        let (header, payload) = bytes.split_at(HEADER_LEN);
        let mut deadline = [0u8; HEADER_LEN];
        deadline.copy_from_slice(header);
        Ok((i64::from_le_bytes(deadline), payload))
    }

    fn is_live(&self, txn: &RoTxn<'_>, key: &str, now: i64) -> Result<bool, LmdbStoreError> {
        match self.db.get(txn, key.as_bytes()).map_err(txn_err)? {
            Some(bytes) => {
                let (expires_at, _) = Self::decode_value(key, bytes)?;
                Ok(now < expires_at)
            }
            None => Ok(false),
        }
    }

    /// Collect keys whose entry satisfies `filter`.
    fn collect_keys<F>(&self, mut filter: F) -> Result<Vec<String>, LmdbStoreError>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let iter = self.db.iter(&rtxn).map_err(txn_err)?;

        let mut keys = Vec::new();
        for result in iter {
            let (key, value) = result.map_err(txn_err)?;
            if filter(key, value) {
                keys.push(String::from_utf8_lossy(key).into_owned());
            }
        }

        Ok(keys)
    }

    fn delete_keys(&self, keys: &[String]) -> Result<u64, LmdbStoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let mut deleted = 0u64;
        for key in keys {
            if self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)? {
                deleted += 1;
            }
        }

        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }
}

#[async_trait]
impl KeyValueStore for LmdbStore {
    fn backend_name(&self) -> &'static str {
        "lmdb"
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;

        match self.db.get(&rtxn, key.as_bytes()).map_err(txn_err)? {
            Some(bytes) => {
                let (expires_at, payload) = Self::decode_value(key, bytes)?;
                if Self::now_millis() >= expires_at {
                    return Ok(None);
                }
                Ok(Some(payload.to_vec()))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        let bytes = Self::encode_value(value, ttl);

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), &bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let now = Self::now_millis();
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        // A corrupt entry is still removed, it just does not count as live.
        let was_live = self.is_live(&wtxn, key, now).unwrap_or(false);
        let deleted = self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        Ok(deleted && was_live)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        Ok(self.is_live(&rtxn, key, Self::now_millis())?)
    }

    async fn key_count(&self) -> StoreResult<u64> {
        Ok(self.live_keys().await?.len() as u64)
    }

    async fn live_keys(&self) -> StoreResult<Vec<String>> {
        let now = Self::now_millis();
        let live = self.collect_keys(|key, value| {
            let key = String::from_utf8_lossy(key);
            matches!(Self::decode_value(&key, value), Ok((expires_at, _)) if now < expires_at)
        })?;
        Ok(live)
    }

    async fn purge_expired(&self) -> StoreResult<Vec<String>> {
        let now = Self::now_millis();
        // Corrupt entries can never be read back, so they go too.
        let expired = self.collect_keys(|key, value| {
            let key = String::from_utf8_lossy(key);
            match Self::decode_value(&key, value) {
                Ok((expires_at, _)) => now >= expires_at,
                Err(_) => true,
            }
        })?;

        if !expired.is_empty() {
            self.delete_keys(&expired)?;
        }

        Ok(expired)
    }

    async fn delete_prefix(&self, prefix: &str) -> StoreResult<u64> {
        let prefix = prefix.as_bytes();
        let matching = self.collect_keys(|key, _| key.starts_with(prefix))?;
        Ok(self.delete_keys(&matching)?)
    }
}
