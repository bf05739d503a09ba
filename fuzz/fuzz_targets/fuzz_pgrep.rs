//! Fuzz target for `pgrep -P` output parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pq_core::collect::grammars::parse_pgrep;

fuzz_target!(|data: &str| {
    if let Ok(pids) = parse_pgrep(data) {
        assert!(pids.iter().all(|&p| p > 0));
    }
});
