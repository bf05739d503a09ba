//! procquery core library
//!
//! This library answers two questions about a live process:
//! - Does it currently have at least one live child?
//! - What is its current working directory?
//!
//! Around those queries it provides:
//! - Capability detection, run once per process lifetime
//! - A bounded runner for short-lived diagnostic commands
//! - Strict grammars for what `ps`, `pgrep`, `lsof` and `/proc` emit
//! - Environment-driven configuration and structured logging
//! - Exit codes for the CLI
//!
//! The binary entry point is in `main.rs`.

pub mod capabilities;
pub mod collect;
pub mod config;
pub mod exit_codes;
pub mod logging;
pub mod query;

// Re-export test utilities for integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_log;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::QueryConfig;
pub use query::{has_subprocesses, working_directory, CwdStrategy, Introspector, SubprocessStrategy};
