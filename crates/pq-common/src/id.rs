//! Process identity types.
//!
//! A handle is only ever constructed from a positive integer. Handles are
//! recycled by the OS, so nothing in the workspace caches per-handle state.

use crate::error::QueryError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Process ID wrapper with display formatting.
///
/// The field is private: every handle outside this crate comes from
/// [`ProcessId::new`], `TryFrom<u32>`, `FromStr`, or deserialization, all of
/// which reject zero and values a signed `pid_t` cannot hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "i64")]
pub struct ProcessId(pub(crate) u32);

impl ProcessId {
    /// Validate a raw handle.
    ///
    /// Zero, negative values, and values past `i32::MAX` (the largest pid any
    /// Unix kernel hands out) are rejected.
    pub fn new(raw: i64) -> Result<Self, QueryError> {
        if raw <= 0 || raw > i64::from(i32::MAX) {
            return Err(QueryError::InvalidHandle(raw));
        }
        Ok(ProcessId(raw as u32))
    }

    /// The handle of the calling process.
    pub fn current() -> Self {
        ProcessId(std::process::id())
    }

    /// The handle as an unsigned pid.
    pub fn get(self) -> u32 {
        self.0
    }

    /// Raw value for libc calls. Always positive.
    pub fn as_raw(self) -> i32 {
        self.0 as i32
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for ProcessId {
    type Error = QueryError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        ProcessId::new(i64::from(raw))
    }
}

impl TryFrom<i64> for ProcessId {
    type Error = QueryError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        ProcessId::new(raw)
    }
}

impl From<ProcessId> for u32 {
    fn from(pid: ProcessId) -> Self {
        pid.0
    }
}

impl FromStr for ProcessId {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: i64 = s
            .trim()
            .parse()
            .map_err(|_| QueryError::InvalidHandle(0))?;
        ProcessId::new(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_accepts_positive() {
        assert_eq!(ProcessId::new(1).unwrap(), ProcessId(1));
        assert_eq!(ProcessId::new(4_194_304).unwrap(), ProcessId(4_194_304));
    }

    #[test]
    fn test_new_rejects_zero_and_negative() {
        assert!(matches!(
            ProcessId::new(0),
            Err(QueryError::InvalidHandle(0))
        ));
        assert!(matches!(
            ProcessId::new(-42),
            Err(QueryError::InvalidHandle(-42))
        ));
    }

    #[test]
    fn test_new_rejects_overflow() {
        assert!(ProcessId::new(i64::from(i32::MAX) + 1).is_err());
    }

    #[test]
    fn test_from_str() {
        assert_eq!(" 123 ".parse::<ProcessId>().unwrap(), ProcessId(123));
        assert!("abc".parse::<ProcessId>().is_err());
        assert!("-1".parse::<ProcessId>().is_err());
    }

    #[test]
    fn test_current_is_positive() {
        assert!(ProcessId::current().0 > 0);
    }

    #[test]
    fn test_try_from_u32_rejects_zero_and_wrapping() {
        assert_eq!(ProcessId::try_from(77u32).unwrap().get(), 77);
        assert!(matches!(
            ProcessId::try_from(0u32),
            Err(QueryError::InvalidHandle(0))
        ));
        // Would become -1 as a pid_t, which kill() reads as "every process"
        assert!(ProcessId::try_from(u32::MAX).is_err());
        assert!(ProcessId::try_from(i32::MAX as u32 + 1).is_err());
    }

    #[test]
    fn test_as_raw_is_positive() {
        let pid = ProcessId::new(i64::from(i32::MAX)).unwrap();
        assert_eq!(pid.as_raw(), i32::MAX);
    }

    #[test]
    fn test_serde_transparent() {
        let json = serde_json::to_string(&ProcessId(77)).unwrap();
        assert_eq!(json, "77");
        let back: ProcessId = serde_json::from_str("77").unwrap();
        assert_eq!(back, ProcessId(77));
    }

    #[test]
    fn test_deserialize_validates() {
        assert!(serde_json::from_str::<ProcessId>("0").is_err());
        assert!(serde_json::from_str::<ProcessId>("-3").is_err());
        assert!(serde_json::from_str::<ProcessId>("4294967295").is_err());
    }
}
