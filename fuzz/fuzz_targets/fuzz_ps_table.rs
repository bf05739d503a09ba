//! Fuzz target for `ps -A -o pid= -o ppid= -o stat=` parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pq_core::collect::grammars::parse_ps_table;
use pq_core::collect::relations::relations_from_ps_text;

fuzz_target!(|data: &str| {
    if let Ok(table) = parse_ps_table(data) {
        assert!(table.rows.iter().all(|r| r.pid != r.ppid));
    }
    let _ = relations_from_ps_text(data);
});
