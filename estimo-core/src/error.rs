//! Error types for Estimo operations

use thiserror::Error;

/// Cache layer errors.
///
/// None of these ever reach an HTTP caller: the cache fails open and
/// recomputes instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend {backend} unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Cache serialization failed: {reason}")]
    Serialization { reason: String },
}

impl CacheError {
    /// Shorthand for a backend transport failure.
    pub fn unavailable(backend: impl Into<String>, reason: impl ToString) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for an encode/decode failure.
    pub fn serialization(reason: impl ToString) -> Self {
        Self::Serialization {
            reason: reason.to_string(),
        }
    }

    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }
}

/// Input validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid tenant id {value:?}: {reason}")]
    InvalidTenantId { value: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Cache backend not supported: {backend}")]
    BackendNotSupported { backend: String },
}

/// Master error type for all Estimo errors.
#[derive(Debug, Clone, Error)]
pub enum EstimoError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for Estimo operations.
pub type EstimoResult<T> = Result<T, EstimoError>;
