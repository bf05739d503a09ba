//! Exit codes for the pq-core CLI.
//!
//! Exit codes communicate the answer without requiring output parsing.
//!
//! Exit code ranges:
//! - 0-1: Answers (`children` maps its boolean onto 0/1)
//! - 10-19: Caller or environment problems (recoverable by user action)
//! - 20-29: Internal errors and tooling failures

use pq_common::{ErrorKind, QueryError};

/// Exit codes for pq-core operations.
///
/// These codes are a stable contract for scripts. Changes require a major
/// version bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    // ========================================================================
    // Answers (0-1)
    // ========================================================================
    /// Success, or "yes" for a boolean query
    Ok = 0,

    /// The boolean query answered "no"
    False = 1,

    // ========================================================================
    // User / Environment Errors (10-19)
    // ========================================================================
    /// Invalid arguments
    ArgsError = 10,

    /// No usable backend (e.g., lsof missing and /proc not mounted)
    CapabilityError = 11,

    /// Permission denied inspecting the target
    PermissionError = 12,

    /// Target process does not exist
    NotFoundError = 13,

    /// Working directory was deleted
    UnavailableError = 14,

    // ========================================================================
    // Internal Errors (20-29)
    // ========================================================================
    /// Internal error or unparseable tool output
    InternalError = 20,

    /// I/O error
    IoError = 21,

    /// Diagnostic timed out
    TimeoutError = 22,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Check if this exit code carries an answer (codes 0-1).
    pub fn is_answer(self) -> bool {
        (self as i32) < 10
    }

    /// Check if this exit code is a user/environment error (codes 10-19).
    pub fn is_user_error(self) -> bool {
        let code = self as i32;
        (10..20).contains(&code)
    }

    /// Check if this exit code is an internal error (codes 20-29).
    pub fn is_internal_error(self) -> bool {
        (self as i32) >= 20
    }

    /// Get the code name as a string constant (for JSON output).
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Ok => "OK",
            ExitCode::False => "OK_FALSE",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::CapabilityError => "ERR_CAPABILITY",
            ExitCode::PermissionError => "ERR_PERMISSION",
            ExitCode::NotFoundError => "ERR_NOT_FOUND",
            ExitCode::UnavailableError => "ERR_UNAVAILABLE",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
            ExitCode::TimeoutError => "ERR_TIMEOUT",
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl From<&QueryError> for ExitCode {
    fn from(err: &QueryError) -> Self {
        match err.kind() {
            ErrorKind::NotFound => ExitCode::NotFoundError,
            ErrorKind::PermissionDenied => ExitCode::PermissionError,
            ErrorKind::BackendUnavailable => ExitCode::CapabilityError,
            ErrorKind::ParseError => ExitCode::InternalError,
            ErrorKind::Timeout => ExitCode::TimeoutError,
            ErrorKind::Unavailable => ExitCode::UnavailableError,
            ErrorKind::InvalidHandle => ExitCode::ArgsError,
        }
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_ranges() {
        assert!(ExitCode::False.is_answer());
        assert!(ExitCode::NotFoundError.is_user_error());
        assert!(!ExitCode::TimeoutError.is_user_error());
        assert!(ExitCode::TimeoutError.is_internal_error());
    }

    #[test]
    fn test_from_query_error() {
        assert_eq!(
            ExitCode::from(&QueryError::not_found(3u32)),
            ExitCode::NotFoundError
        );
        assert_eq!(
            ExitCode::from(&QueryError::backend_unavailable("lsof", "missing")),
            ExitCode::CapabilityError
        );
        assert_eq!(
            ExitCode::from(&QueryError::Timeout {
                backend: "ps".to_string(),
                after: Duration::from_secs(1)
            })
            .as_i32(),
            22
        );
        assert_eq!(
            ExitCode::from(&QueryError::InvalidHandle(0)),
            ExitCode::ArgsError
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(ExitCode::NotFoundError.to_string(), "ERR_NOT_FOUND (13)");
    }
}
