//! Fuzz test for cache envelope decoding
//!
//! Arbitrary bytes read back from a backend must decode to a TimedValue or a
//! `MalformedEnvelope` error, never a panic. Decoded values must re-encode.
//!
//! Run with: cargo +nightly fuzz run envelope_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use serde_json::Value;
use tiercache_core::{CacheError, TimedValue};

fuzz_target!(|data: &[u8]| {
    let Ok(blob) = std::str::from_utf8(data) else {
        return;
    };

    match TimedValue::<Value>::deserialize(blob) {
        Ok(value) => {
            let now = value.created();
            let _ = value.freshness(now);
            let _ = value.cache_control(now);

            let encoded = value.serialize().expect("decoded envelope re-encodes");
            let again = TimedValue::<Value>::deserialize(&encoded).expect("re-encoded envelope decodes");
            assert_eq!(again.stale_ttl().is_some(), value.stale_ttl().is_some());
            assert_eq!(again.expire_ttl().is_some(), value.expire_ttl().is_some());
        }
        Err(CacheError::MalformedEnvelope { .. }) => {}
        Err(other) => panic!("unexpected decode error: {}", other),
    }
});
