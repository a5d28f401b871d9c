//! Fuzz target for the durable queue record codec.
//!
//! Decoding must never panic, and anything that decodes must re-encode to
//! the same bytes.

#![no_main]

use kv_proxy::connector::record;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(entry) = record::decode(data) {
        let encoded = record::encode(&entry).expect("decoded key always fits");
        assert_eq!(encoded, data);
    }
});
