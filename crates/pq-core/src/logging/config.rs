//! Logging configuration.
//!
//! Precedence, highest first: CLI flags (`-v`/`-q`, `--log-format`), then
//! `PQ_LOG` / `PQ_LOG_FORMAT`, then `RUST_LOG` directives, then warn-level
//! human output.

use clap::ValueEnum;
use tracing_subscriber::filter::LevelFilter;

/// Line format on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Console lines for people.
    #[default]
    Human,
    /// One JSON object per event.
    Jsonl,
}

/// Level for a `-v` count: 0 keeps the default, 1 is info, 2 debug, 3+ trace.
pub fn level_for_verbosity(verbose: u8) -> Option<LevelFilter> {
    match verbose {
        0 => None,
        1 => Some(LevelFilter::INFO),
        2 => Some(LevelFilter::DEBUG),
        _ => Some(LevelFilter::TRACE),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: LevelFilter,
    /// Raw `RUST_LOG` directives, used only when no level was chosen
    /// explicitly.
    pub directives: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            format: LogFormat::Human,
            level: LevelFilter::WARN,
            directives: None,
        }
    }
}

impl LogConfig {
    pub fn from_env(cli_level: Option<LevelFilter>, cli_format: Option<LogFormat>) -> Self {
        Self::from_lookup(|key| std::env::var(key).ok(), cli_level, cli_format)
    }

    /// [`LogConfig::from_env`] over an injectable variable source.
    ///
    /// Unparseable values are ignored.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        cli_level: Option<LevelFilter>,
        cli_format: Option<LogFormat>,
    ) -> Self {
        let level = cli_level.or_else(|| lookup("PQ_LOG").and_then(|v| v.trim().parse().ok()));
        let directives = match level {
            Some(_) => None,
            None => lookup("RUST_LOG").filter(|v| !v.trim().is_empty()),
        };
        let format = cli_format.or_else(|| {
            lookup("PQ_LOG_FORMAT").and_then(|v| <LogFormat as ValueEnum>::from_str(v.trim(), true).ok())
        });

        LogConfig {
            format: format.unwrap_or_default(),
            level: level.unwrap_or(LevelFilter::WARN),
            directives,
        }
    }

    pub fn with_level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self.directives = None;
        self
    }
}
