//! Fuzz target for stored envelope decoding.
//!
//! Bytes read back from a backend are untrusted. Decoding must return an
//! error rather than panic, and anything that decodes must encode again.
//!
//! Run with: cargo +nightly fuzz run entry_decode_fuzz -- -max_total_time=60

#![no_main]

use estimo_cache::CacheEntry;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(entry) = CacheEntry::decode(data) {
        let bytes = entry.encode().expect("a decoded entry re-encodes");
        let again = CacheEntry::decode(&bytes).expect("re-encoded entry decodes");
        assert_eq!(again.dependencies, entry.dependencies);
        assert_eq!(again.expires_at, entry.expires_at);
    }
});
