//! Error types for procquery.
//!
//! Every query returns a typed failure instead of a silent default. Errors
//! carry:
//! - A stable numeric code for machine parsing
//! - A kind that drives the strategy fallback policy
//! - A category for grouping
//! - A remediation hint for humans
//!
//! # Fallback policy
//!
//! `BackendUnavailable` and `ParseError` describe a tooling limitation, so an
//! orchestrator may try the next strategy. Every other kind describes the
//! queried process's actual state and is returned to the caller as-is.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for query operations.
pub type QueryResult<T> = std::result::Result<T, QueryError>;

/// Coarse kind of a query failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    BackendUnavailable,
    ParseError,
    Timeout,
    Unavailable,
    InvalidHandle,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::InvalidHandle => "invalid_handle",
        };
        write!(f, "{}", s)
    }
}

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The target process (missing, inaccessible, odd state).
    Target,
    /// Diagnostic tooling or platform feature problems.
    Backend,
    /// Caller supplied a bad argument.
    Input,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Target => write!(f, "target"),
            ErrorCategory::Backend => write!(f, "backend"),
            ErrorCategory::Input => write!(f, "input"),
        }
    }
}

/// Unified error type for process queries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("process {pid} not found")]
    NotFound { pid: u32 },

    #[error("permission denied inspecting process {pid}: {detail}")]
    PermissionDenied { pid: u32, detail: String },

    #[error("backend {backend} unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("failed to parse {backend} output: {message}")]
    ParseError { backend: String, message: String },

    #[error("{backend} timed out after {after:?}")]
    Timeout { backend: String, after: Duration },

    #[error("working directory of process {pid} unavailable: {reason}")]
    Unavailable { pid: u32, reason: String },

    #[error("invalid process handle: {0}")]
    InvalidHandle(i64),
}

impl QueryError {
    pub fn not_found(pid: impl Into<u32>) -> Self {
        QueryError::NotFound { pid: pid.into() }
    }

    pub fn permission_denied(pid: impl Into<u32>, detail: impl Into<String>) -> Self {
        QueryError::PermissionDenied {
            pid: pid.into(),
            detail: detail.into(),
        }
    }

    pub fn unavailable(pid: impl Into<u32>, reason: impl Into<String>) -> Self {
        QueryError::Unavailable {
            pid: pid.into(),
            reason: reason.into(),
        }
    }

    pub fn backend_unavailable(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        QueryError::BackendUnavailable {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    pub fn parse(backend: impl Into<String>, message: impl Into<String>) -> Self {
        QueryError::ParseError {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// The coarse kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::NotFound { .. } => ErrorKind::NotFound,
            QueryError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            QueryError::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            QueryError::ParseError { .. } => ErrorKind::ParseError,
            QueryError::Timeout { .. } => ErrorKind::Timeout,
            QueryError::Unavailable { .. } => ErrorKind::Unavailable,
            QueryError::InvalidHandle(_) => ErrorKind::InvalidHandle,
        }
    }

    /// Whether an orchestrator may advance to the next strategy.
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::BackendUnavailable | ErrorKind::ParseError
        )
    }

    /// Stable error code.
    ///
    /// - 20-29: target errors
    /// - 30-39: backend errors
    /// - 40-49: input errors
    pub fn code(&self) -> u32 {
        match self {
            QueryError::NotFound { .. } => 21,
            QueryError::PermissionDenied { .. } => 22,
            QueryError::Unavailable { .. } => 23,
            QueryError::BackendUnavailable { .. } => 30,
            QueryError::ParseError { .. } => 31,
            QueryError::Timeout { .. } => 32,
            QueryError::InvalidHandle(_) => 40,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            QueryError::NotFound { .. }
            | QueryError::PermissionDenied { .. }
            | QueryError::Unavailable { .. } => ErrorCategory::Target,

            QueryError::BackendUnavailable { .. }
            | QueryError::ParseError { .. }
            | QueryError::Timeout { .. } => ErrorCategory::Backend,

            QueryError::InvalidHandle(_) => ErrorCategory::Input,
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            QueryError::NotFound { .. } => "The process exited or the pid was never valid",
            QueryError::PermissionDenied { .. } => {
                "Run as the process owner or with elevated privileges"
            }
            QueryError::BackendUnavailable { .. } => {
                "Install ps/pgrep/lsof or run on a host with /proc mounted"
            }
            QueryError::ParseError { .. } => {
                "The diagnostic tool produced unexpected output; try another strategy"
            }
            QueryError::Timeout { .. } => "Raise --timeout-ms or PQ_TOOL_TIMEOUT_MS",
            QueryError::Unavailable { .. } => {
                "The directory was removed while the process still uses it"
            }
            QueryError::InvalidHandle(_) => "Process ids are positive integers",
        }
    }

    /// Structured form for JSON output.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code(),
            "kind": self.kind(),
            "category": self.category(),
            "message": self.to_string(),
            "fallback_eligible": self.is_fallback_eligible(),
            "remediation": self.remediation(),
        })
    }
}
