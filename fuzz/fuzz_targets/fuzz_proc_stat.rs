//! Fuzz target for /proc/[pid]/stat parsing.
//!
//! A successfully parsed record must echo back the comm between the first
//! `(` and the last `)`.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pq_core::collect::grammars::parse_stat_record;

fuzz_target!(|data: &str| {
    if let Ok(record) = parse_stat_record(data) {
        assert!(data.contains(&format!("({})", record.comm)));
    }
});
