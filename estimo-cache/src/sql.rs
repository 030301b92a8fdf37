//! Cached SQL queries.
//!
//! Handlers describe a parameterized query once with [`CachedQuery`] and run
//! it through the cache. The database driver stays outside this crate behind
//! [`SqlExecutor`].

use std::time::Duration;

use async_trait::async_trait;
use estimo_core::TenantId;
use serde::{Deserialize, Serialize};

use crate::cache::TenantCache;
use crate::options::CacheOptions;

/// One result row as a JSON object keyed by column name.
pub type SqlRow = serde_json::Map<String, serde_json::Value>;

/// A bind parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for SqlParam {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Runs parameterized SQL. Implemented by the application's database layer.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    type Error: Send;

    async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<SqlRow>, Self::Error>;
}

/// A read query whose rows are cached per tenant.
///
/// ```ignore
/// let rows = CachedQuery::new("materials:list", "SELECT * FROM materials WHERE tenant_id = $1")
///     .bind(tenant.as_str())
///     .depends_on("materials")
///     .ttl(Duration::from_secs(300))
///     .fetch_all(&cache, &tenant, &executor)
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct CachedQuery {
    key: String,
    sql: String,
    params: Vec<SqlParam>,
    options: CacheOptions,
}

impl CachedQuery {
    pub fn new(key: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            sql: sql.into(),
            params: Vec::new(),
            options: CacheOptions::new(),
        }
    }

    pub fn bind(mut self, param: impl Into<SqlParam>) -> Self {
        self.params.push(param.into());
        self
    }

    pub fn depends_on(mut self, tag: impl Into<String>) -> Self {
        self.options = self.options.depends_on(tag);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.options = self.options.with_ttl(ttl);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }

    /// Return cached rows, or run the query and cache them.
    pub async fn fetch_all<X: SqlExecutor>(
        &self,
        cache: &TenantCache,
        tenant_id: &TenantId,
        executor: &X,
    ) -> Result<Vec<SqlRow>, X::Error> {
        cache
            .get_or_set(tenant_id, &self.key, self.options.clone(), || {
                executor.query(&self.sql, &self.params)
            })
            .await
    }
}
