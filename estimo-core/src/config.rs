//! Cache configuration
//!
//! Settings are loaded from `ESTIMO_CACHE_*` environment variables with
//! development-friendly defaults, then checked with [`CacheSettings::validate`].

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default TTL applied when a caller does not pick one (5 minutes).
pub const DEFAULT_TTL_SECS: u64 = 300;

/// Default interval of the expiry sweep job.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Default interval at which hot keys are re-warmed.
pub const DEFAULT_WARM_INTERVAL_SECS: u64 = 600;

/// Default LMDB map size.
pub const DEFAULT_LMDB_MAX_SIZE_MB: usize = 256;

/// Largest accepted LMDB map size (1 TiB).
pub const MAX_LMDB_SIZE_MB: usize = 1 << 20;

/// Default key prefix for shared Redis instances.
pub const DEFAULT_REDIS_PREFIX: &str = "estimo:cache:";

/// Which key-value backend holds cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheBackendKind {
    /// Process-local concurrent map.
    Memory,
    /// Memory-mapped LMDB file store.
    Lmdb { path: PathBuf, max_size_mb: usize },
    /// Remote Redis server.
    Redis { url: String, prefix: String },
}

impl CacheBackendKind {
    /// Short name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Lmdb { .. } => "lmdb",
            Self::Redis { .. } => "redis",
        }
    }
}

/// Configuration for the tenant cache and its housekeeping jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Global kill switch. When false every read goes straight to the producer.
    pub enabled: bool,
    /// TTL used when a caller does not specify one.
    pub default_ttl: Duration,
    /// Backend holding the entries.
    pub backend: CacheBackendKind,
    /// How often expired entries are swept out of the store and index.
    pub sweep_interval: Duration,
    /// How often registered hot keys are re-warmed.
    pub warm_interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            backend: CacheBackendKind::Memory,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            warm_interval: Duration::from_secs(DEFAULT_WARM_INTERVAL_SECS),
        }
    }
}

impl CacheSettings {
    /// Create settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable caching.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the backend.
    pub fn with_backend(mut self, backend: CacheBackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Set the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the warm interval.
    pub fn with_warm_interval(mut self, interval: Duration) -> Self {
        self.warm_interval = interval;
        self
    }

    /// Create settings from environment variables.
    ///
    /// Environment variables:
    /// - `ESTIMO_CACHE_ENABLED`: "true" or "false" (default: true)
    /// - `ESTIMO_CACHE_DEFAULT_TTL_SECS`: default TTL (default: 300)
    /// - `ESTIMO_CACHE_BACKEND`: "memory", "lmdb" or "redis" (default: memory)
    /// - `ESTIMO_CACHE_LMDB_PATH`: LMDB directory (required for lmdb)
    /// - `ESTIMO_CACHE_LMDB_MAX_SIZE_MB`: LMDB map size (default: 256)
    /// - `ESTIMO_CACHE_REDIS_URL`: Redis URL (required for redis)
    /// - `ESTIMO_CACHE_REDIS_PREFIX`: key prefix (default: "estimo:cache:")
    /// - `ESTIMO_CACHE_SWEEP_INTERVAL_SECS`: sweep interval (default: 60)
    /// - `ESTIMO_CACHE_WARM_INTERVAL_SECS`: warm interval (default: 600)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let enabled = lookup("ESTIMO_CACHE_ENABLED")
            .map(|s| s.trim().to_lowercase() != "false")
            .unwrap_or(true);

        let default_ttl = Duration::from_secs(parse_or(
            &lookup,
            "ESTIMO_CACHE_DEFAULT_TTL_SECS",
            DEFAULT_TTL_SECS,
        )?);

        let sweep_interval = Duration::from_secs(parse_or(
            &lookup,
            "ESTIMO_CACHE_SWEEP_INTERVAL_SECS",
            DEFAULT_SWEEP_INTERVAL_SECS,
        )?);

        let warm_interval = Duration::from_secs(parse_or(
            &lookup,
            "ESTIMO_CACHE_WARM_INTERVAL_SECS",
            DEFAULT_WARM_INTERVAL_SECS,
        )?);

        let backend_name = lookup("ESTIMO_CACHE_BACKEND")
            .map(|s| s.trim().to_lowercase())
            .unwrap_or_else(|| "memory".to_string());

        let backend = match backend_name.as_str() {
            "memory" => CacheBackendKind::Memory,
            "lmdb" => {
                let path = lookup("ESTIMO_CACHE_LMDB_PATH").ok_or_else(|| {
                    ConfigError::MissingField {
                        field: "ESTIMO_CACHE_LMDB_PATH".to_string(),
                    }
                })?;
                CacheBackendKind::Lmdb {
                    path: PathBuf::from(path),
                    max_size_mb: parse_or(
                        &lookup,
                        "ESTIMO_CACHE_LMDB_MAX_SIZE_MB",
                        DEFAULT_LMDB_MAX_SIZE_MB,
                    )?,
                }
            }
            "redis" => {
                let url = lookup("ESTIMO_CACHE_REDIS_URL").ok_or_else(|| {
                    ConfigError::MissingField {
                        field: "ESTIMO_CACHE_REDIS_URL".to_string(),
                    }
                })?;
                CacheBackendKind::Redis {
                    url,
                    prefix: lookup("ESTIMO_CACHE_REDIS_PREFIX")
                        .unwrap_or_else(|| DEFAULT_REDIS_PREFIX.to_string()),
                }
            }
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "ESTIMO_CACHE_BACKEND".to_string(),
                    value: other.to_string(),
                    reason: "expected memory, lmdb or redis".to_string(),
                })
            }
        };

        let settings = Self {
            enabled,
            default_ttl,
            backend,
            sweep_interval,
            warm_interval,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Check settings for values the cache cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "default_ttl".to_string(),
                value: "0".to_string(),
                reason: "default TTL must be positive".to_string(),
            });
        }

        if self.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "sweep_interval".to_string(),
                value: "0".to_string(),
                reason: "sweep interval must be positive".to_string(),
            });
        }

        if self.warm_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "warm_interval".to_string(),
                value: "0".to_string(),
                reason: "warm interval must be positive".to_string(),
            });
        }

        match &self.backend {
            CacheBackendKind::Memory => {}
            CacheBackendKind::Lmdb { path, max_size_mb } => {
                if path.as_os_str().is_empty() {
                    return Err(ConfigError::MissingField {
                        field: "lmdb path".to_string(),
                    });
                }
                if *max_size_mb == 0 {
                    return Err(ConfigError::InvalidValue {
                        field: "lmdb max_size_mb".to_string(),
                        value: "0".to_string(),
                        reason: "map size must be positive".to_string(),
                    });
                }
                if *max_size_mb > MAX_LMDB_SIZE_MB {
                    return Err(ConfigError::InvalidValue {
                        field: "lmdb max_size_mb".to_string(),
                        value: max_size_mb.to_string(),
                        reason: format!("map size must be at most {} MB", MAX_LMDB_SIZE_MB),
                    });
                }
            }
            CacheBackendKind::Redis { url, .. } => {
                if !(url.starts_with("redis://") || url.starts_with("rediss://")) {
                    return Err(ConfigError::InvalidValue {
                        field: "redis url".to_string(),
                        value: url.clone(),
                        reason: "must start with redis:// or rediss://".to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            field: name.to_string(),
            value: raw.clone(),
            reason: "not a valid number".to_string(),
        }),
    }
}
