//! Fuzz target for tenant-scoped key decoding.
//!
//! Any string that decodes must re-encode to itself, and the decoded key must
//! sit under its tenant's prefix.
//!
//! Run with: cargo +nightly fuzz run key_decode_fuzz -- -max_total_time=60

#![no_main]

use estimo_cache::{tenant_prefix, TenantScopedKey, TenantScopedTag};
use estimo_core::TenantId;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    // Validation must never panic.
    let _ = TenantId::new(input);

    if let Some(key) = TenantScopedKey::decode(input) {
        assert_eq!(key.encode(), input, "decode/encode must be lossless");
        assert!(input.starts_with(&tenant_prefix(key.tenant_id())));
        assert!(!key.tenant_id().as_str().contains(':'));
    }

    if let Some(tag) = TenantScopedTag::decode(input) {
        assert_eq!(tag.encode(), input);
    }
});
