//! Query configuration.
//!
//! There are no configuration files. Values are layered, lowest precedence
//! first: built-in defaults, environment (`PQ_TOOL_TIMEOUT_MS`,
//! `PQ_MAX_OUTPUT_BYTES`, `PQ_PROC_ROOT`), then CLI flags applied by the
//! caller through the `with_*` setters.

use crate::collect::tool_runner::{ToolRunner, ToolRunnerBuilder, DEFAULT_MAX_OUTPUT_BYTES};
use crate::collect::DIAGNOSTIC_TOOLS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default per-diagnostic timeout.
pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 5_000;

/// Default pseudo-filesystem mount point.
pub const DEFAULT_PROC_ROOT: &str = "/proc";

pub const ENV_TOOL_TIMEOUT_MS: &str = "PQ_TOOL_TIMEOUT_MS";
pub const ENV_MAX_OUTPUT_BYTES: &str = "PQ_MAX_OUTPUT_BYTES";
pub const ENV_PROC_ROOT: &str = "PQ_PROC_ROOT";

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {var}={value:?}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Settings shared by every query an `Introspector` runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Upper bound on one diagnostic's runtime.
    #[serde(rename = "tool_timeout_ms", with = "duration_ms")]
    pub tool_timeout: Duration,

    /// Cap on captured bytes per output stream.
    pub max_output_bytes: usize,

    /// Where the process pseudo-filesystem is mounted.
    pub proc_root: PathBuf,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            tool_timeout: Duration::from_millis(DEFAULT_TOOL_TIMEOUT_MS),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            proc_root: PathBuf::from(DEFAULT_PROC_ROOT),
        }
    }
}

impl QueryConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with variables from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_TOOL_TIMEOUT_MS) {
            let ms = parse_positive(ENV_TOOL_TIMEOUT_MS, &raw)?;
            config.tool_timeout = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup(ENV_MAX_OUTPUT_BYTES) {
            config.max_output_bytes = parse_positive(ENV_MAX_OUTPUT_BYTES, &raw)? as usize;
        }
        if let Some(raw) = lookup(ENV_PROC_ROOT) {
            let path = PathBuf::from(raw.trim());
            if !path.is_absolute() {
                return Err(ConfigError::InvalidValue {
                    var: ENV_PROC_ROOT,
                    value: raw,
                    reason: "must be an absolute path".to_string(),
                });
            }
            config.proc_root = path;
        }

        Ok(config)
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    pub fn with_proc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.proc_root = root.into();
        self
    }

    /// Whether `proc_root` is the host's real mount point.
    pub fn uses_default_proc_root(&self) -> bool {
        self.proc_root == Path::new(DEFAULT_PROC_ROOT)
    }

    /// A runner restricted to the diagnostics the queries use.
    pub fn tool_runner(&self) -> ToolRunner {
        ToolRunnerBuilder::new()
            .timeout(self.tool_timeout)
            .max_output(self.max_output_bytes)
            .allow_commands(DIAGNOSTIC_TOOLS.iter().copied())
            .build()
    }
}

fn parse_positive(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue {
            var,
            value: raw.to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        Ok(v) => Ok(v),
        Err(e) => Err(ConfigError::InvalidValue {
            var,
            value: raw.to_string(),
            reason: e.to_string(),
        }),
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
