//! Fuzz target for compare-and-put entry decoding.
//!
//! Arbitrary caller payloads must be rejected cleanly, never panic.

#![no_main]

use kv_proxy::model::CasLog;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(log) = CasLog::decode(data) {
        // Re-serializing a decoded entry yields an entry that decodes the same.
        let again = serde_json::to_vec(&log).unwrap();
        assert_eq!(CasLog::decode(&again).unwrap(), log);
    }
});
