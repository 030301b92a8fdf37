//! Tenant-scoped cache keys and dependency tags.
//!
//! Neither type can be built without a [`TenantId`], so every entry and every
//! index tag the cache touches carries its tenant. Because tenant ids never
//! contain `:`, the encoding `"{tenant}:{name}"` is injective and
//! [`tenant_prefix`] is a prefix of exactly one tenant's keys.

use std::fmt;

use estimo_core::TenantId;

/// Separator between the tenant id and the caller's key or tag.
pub const SEPARATOR: char = ':';

/// A cache key that is scoped to a specific tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantScopedKey {
    inner: Scoped,
}

/// A dependency tag that is scoped to a specific tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantScopedTag {
    inner: Scoped,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Scoped {
    tenant_id: TenantId,
    name: String,
}

impl Scoped {
    fn encode(&self) -> String {
        let mut out = String::with_capacity(self.tenant_id.as_str().len() + 1 + self.name.len());
        out.push_str(self.tenant_id.as_str());
        out.push(SEPARATOR);
        out.push_str(&self.name);
        out
    }

    fn decode(encoded: &str) -> Option<Self> {
        let (tenant, name) = encoded.split_once(SEPARATOR)?;
        let tenant_id = TenantId::new(tenant).ok()?;
        Some(Self {
            tenant_id,
            name: name.to_string(),
        })
    }
}

impl TenantScopedKey {
    /// Scope `key` to `tenant_id`. Any key text is accepted.
    pub fn new(tenant_id: &TenantId, key: impl Into<String>) -> Self {
        Self {
            inner: Scoped {
                tenant_id: tenant_id.clone(),
                name: key.into(),
            },
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.inner.tenant_id
    }

    /// The caller's key without the tenant part.
    pub fn key(&self) -> &str {
        &self.inner.name
    }

    /// Encode to the string used as the store key.
    pub fn encode(&self) -> String {
        self.inner.encode()
    }

    /// Decode a store key. Returns `None` when there is no separator or the
    /// tenant part is not a valid tenant id.
    pub fn decode(encoded: &str) -> Option<Self> {
        Scoped::decode(encoded).map(|inner| Self { inner })
    }
}

impl TenantScopedTag {
    /// Scope `tag` to `tenant_id`.
    pub fn new(tenant_id: &TenantId, tag: impl Into<String>) -> Self {
        Self {
            inner: Scoped {
                tenant_id: tenant_id.clone(),
                name: tag.into(),
            },
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.inner.tenant_id
    }

    pub fn tag(&self) -> &str {
        &self.inner.name
    }

    pub fn encode(&self) -> String {
        self.inner.encode()
    }

    pub fn decode(encoded: &str) -> Option<Self> {
        Scoped::decode(encoded).map(|inner| Self { inner })
    }
}

impl fmt::Display for TenantScopedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.inner.tenant_id, SEPARATOR, self.inner.name)
    }
}

impl fmt::Display for TenantScopedTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.inner.tenant_id, SEPARATOR, self.inner.name)
    }
}

/// Prefix shared by every encoded key and tag of `tenant_id`.
pub fn tenant_prefix(tenant_id: &TenantId) -> String {
    format!("{}{}", tenant_id, SEPARATOR)
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn tenant_strategy() -> impl Strategy<Value = TenantId> {
        "[A-Za-z0-9._-]{1,24}".prop_map(|s| TenantId::new(s).expect("charset is valid"))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn prop_encode_decode_roundtrip(tenant in tenant_strategy(), key in "\\PC{0,64}") {
            let scoped = TenantScopedKey::new(&tenant, key);
            let decoded = TenantScopedKey::decode(&scoped.encode());
            prop_assert_eq!(Some(scoped), decoded);
        }

        /// Different (tenant, key) pairs never share an encoding.
        #[test]
        fn prop_encoding_is_injective(
            t1 in tenant_strategy(),
            t2 in tenant_strategy(),
            k1 in "[a-z:]{0,12}",
            k2 in "[a-z:]{0,12}",
        ) {
            let a = TenantScopedKey::new(&t1, k1);
            let b = TenantScopedKey::new(&t2, k2);
            if a == b {
                prop_assert_eq!(a.encode(), b.encode());
            } else {
                prop_assert_ne!(a.encode(), b.encode());
            }
        }

        #[test]
        fn prop_tenant_prefix_is_prefix(tenant in tenant_strategy(), key in "\\PC{0,32}") {
            let encoded = TenantScopedKey::new(&tenant, key).encode();
            prop_assert!(encoded.starts_with(&tenant_prefix(&tenant)));
        }

        /// A tenant's prefix never matches another tenant's keys.
        #[test]
        fn prop_prefix_does_not_leak(
            t1 in tenant_strategy(),
            t2 in tenant_strategy(),
            key in "\\PC{0,32}",
        ) {
            prop_assume!(t1 != t2);
            let encoded = TenantScopedKey::new(&t2, key).encode();
            prop_assert!(!encoded.starts_with(&tenant_prefix(&t1)));
        }
    }
}
