//! Event vocabulary.
//!
//! Event names are used as the tracing target, so a JSONL consumer can filter
//! on `event` without parsing messages.

/// Part of an invocation an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Startup and configuration.
    Init,
    /// Relation listing.
    Enumerate,
    /// Subprocess detection.
    Detect,
    /// Working directory resolution.
    Resolve,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Enumerate => "enumerate",
            Stage::Detect => "detect",
            Stage::Resolve => "resolve",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub mod event_names {
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_FINISHED: &str = "run.finished";

    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_ERROR: &str = "config.error";

    // Strategy orchestration inside one query
    pub const STRATEGY_SKIPPED: &str = "strategy.skipped";
    pub const STRATEGY_FALLBACK: &str = "strategy.fallback";
    pub const STRATEGY_ANSWERED: &str = "strategy.answered";
    pub const STRATEGY_EXHAUSTED: &str = "strategy.exhausted";

    pub const QUERY_FINISHED: &str = "query.finished";
    pub const QUERY_FAILED: &str = "query.failed";
}

/// Correlation IDs shared by every event of one invocation.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub run_id: String,
    pub host_id: String,
}

impl LogContext {
    pub fn new(run_id: impl Into<String>, host_id: impl Into<String>) -> Self {
        LogContext {
            run_id: run_id.into(),
            host_id: host_id.into(),
        }
    }
}
