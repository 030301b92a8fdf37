//! Estimo Core - Shared Types
//!
//! Identity, error and configuration types used by every Estimo crate.
//! This crate contains no I/O.

pub mod config;
pub mod error;
pub mod identity;

pub use config::{CacheBackendKind, CacheSettings};
pub use error::{CacheError, ConfigError, EstimoError, EstimoResult, ValidationError};
pub use identity::{TenantId, TENANT_ID_MAX_LEN};
