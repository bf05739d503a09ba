//! Fuzz target for `lsof -F` field output parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pq_core::collect::grammars::{parse_lsof_cwd, LsofCwd};

fuzz_target!(|data: &str| {
    if let Ok(Some(LsofCwd::Path(path))) = parse_lsof_cwd(data) {
        assert!(!path.is_empty());
    }
});
