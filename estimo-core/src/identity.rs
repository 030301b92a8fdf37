//! Identity types for Estimo tenants

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Maximum length of a tenant identifier, in bytes.
pub const TENANT_ID_MAX_LEN: usize = 128;

/// Identifier of the tenant (construction company) a request acts for.
///
/// Tenant ids are restricted to ASCII alphanumerics, `-`, `_` and `.` so
/// they can be composed into cache keys with `:` as an unambiguous
/// separator. The only way to obtain a `TenantId` is through validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Validate and wrap a tenant identifier.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();

        if value.is_empty() {
            return Err(ValidationError::InvalidTenantId {
                value,
                reason: "must not be empty".to_string(),
            });
        }

        if value.len() > TENANT_ID_MAX_LEN {
            return Err(ValidationError::InvalidTenantId {
                reason: format!("must be at most {} bytes", TENANT_ID_MAX_LEN),
                value,
            });
        }

        if let Some(bad) = value.chars().find(|c| !is_tenant_char(*c)) {
            return Err(ValidationError::InvalidTenantId {
                reason: format!("character {:?} is not allowed", bad),
                value,
            });
        }

        Ok(Self(value))
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_tenant_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for TenantId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_tenant_ids() {
        for id in ["acme", "acme-builders", "tenant_42", "eu.acme", "0"] {
            let tenant = TenantId::new(id).expect("tenant id should be valid");
            assert_eq!(tenant.as_str(), id);
            assert_eq!(tenant.to_string(), id);
        }
    }

    #[test]
    fn test_empty_tenant_id_rejected() {
        let err = TenantId::new("").unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn test_separator_rejected() {
        let err = TenantId::new("acme:other").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidTenantId { .. }));
        assert!(err.to_string().contains("':'"));
    }

    #[test]
    fn test_whitespace_and_unicode_rejected() {
        assert!(TenantId::new("acme builders").is_err());
        assert!(TenantId::new("bau-müller").is_err());
    }

    #[test]
    fn test_too_long_rejected() {
        let long = "a".repeat(TENANT_ID_MAX_LEN + 1);
        assert!(TenantId::new(long).is_err());
        assert!(TenantId::new("a".repeat(TENANT_ID_MAX_LEN)).is_ok());
    }

    #[test]
    fn test_from_str() {
        let tenant: TenantId = "acme".parse().expect("parse should succeed");
        assert_eq!(tenant.as_str(), "acme");
        assert!("a/b".parse::<TenantId>().is_err());
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Every accepted tenant id is free of the key separator.
        #[test]
        fn prop_accepted_ids_never_contain_separator(value in "\\PC{0,40}") {
            if let Ok(tenant) = TenantId::new(value) {
                prop_assert!(!tenant.as_str().contains(':'));
                prop_assert!(!tenant.as_str().is_empty());
            }
        }

        #[test]
        fn prop_valid_charset_accepted(value in "[A-Za-z0-9._-]{1,128}") {
            prop_assert!(TenantId::new(value).is_ok());
        }
    }
}
