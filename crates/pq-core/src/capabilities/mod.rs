//! System capability detection.
//!
//! This module checks, once per process lifetime, which introspection
//! backends this host offers:
//! - Platform information (OS, kernel release, architecture)
//! - Kernel data sources (procfs, native process API)
//! - Diagnostic tools (ps, pgrep, lsof) and whether they actually work
//!
//! The snapshot is immutable after detection and shared by reference between
//! concurrent queries.

mod detect;

use std::sync::OnceLock;

pub use detect::{
    detect_capabilities, Capabilities, DataSourceCapabilities, DetectionError, PlatformInfo,
    ToolCapabilities, ToolCapability, LIVE_RUNSTATES,
};

static CAPABILITIES: OnceLock<Capabilities> = OnceLock::new();

/// The host's capabilities, detected on first use.
pub fn get_capabilities() -> &'static Capabilities {
    CAPABILITIES.get_or_init(detect_capabilities)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_capabilities_is_computed_once() {
        let a = get_capabilities();
        let b = get_capabilities();
        assert!(std::ptr::eq(a, b));
        assert_eq!(a.detected_at, b.detected_at);
    }
}
