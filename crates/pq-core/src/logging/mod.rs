//! Structured logging for pq-core.
//!
//! Every line goes to stderr; stdout carries only command payloads. The CLI
//! opens a root span holding the invocation's `run_id` and `host_id`, and
//! queries open `detect`/`resolve` spans below it, so each event can be tied
//! back to its invocation and handle.

pub mod config;
pub mod events;
pub mod layer;

pub use config::{level_for_verbosity, LogConfig, LogFormat};
pub use events::{event_names, LogContext, Stage};
pub use layer::JsonlLayer;

use std::io::IsTerminal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. A second call is a no-op.
pub fn init_logging(config: &LogConfig) {
    let filter = match &config.directives {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::default().add_directive(config.level.into()),
    };
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        LogFormat::Human => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_ansi(std::io::stderr().is_terminal()),
            )
            .try_init(),
        LogFormat::Jsonl => registry.with(JsonlLayer::stderr()).try_init(),
    };

    if result.is_err() {
        tracing::debug!("logging already initialized");
    }
}

/// `run-` followed by 12 hex digits of a fresh v4 uuid.
pub fn generate_run_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("run-{}", &hex[..12])
}

/// Stable per-host tag: the start of `/etc/machine-id`, else a hash of the
/// hostname.
pub fn get_host_id() -> String {
    let machine_id = std::fs::read_to_string("/etc/machine-id").ok();
    match machine_id.as_deref().map(str::trim) {
        Some(id) if id.len() >= 8 && id.is_ascii() => format!("host-{}", &id[..8]),
        _ => format!("host-{:08x}", hostname_hash()),
    }
}

fn hostname_hash() -> u32 {
    use std::hash::{DefaultHasher, Hash, Hasher};

    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = if rc == 0 { &buf[..end] } else { &[][..] };

    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish() as u32
}

/// Emit a named event carrying the invocation's correlation IDs.
///
/// ```ignore
/// log_event!(ctx, WARN, event_names::QUERY_FAILED, Stage::Detect, "query failed",
///     pid = 1234, kind = "not_found");
/// ```
#[macro_export]
macro_rules! log_event {
    ($ctx:expr, $level:ident, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::event!(
            target: $event,
            tracing::Level::$level,
            run_id = %$ctx.run_id,
            host_id = %$ctx.host_id,
            stage = %$stage,
            $($key = $val,)*
            message = $msg
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_generate_run_id() {
        let id1 = generate_run_id();
        let id2 = generate_run_id();

        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 16);
        assert!(id1.strip_prefix("run-").unwrap().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_get_host_id_is_stable() {
        let host_id = get_host_id();
        assert!(host_id.starts_with("host-"));
        assert_eq!(host_id.len(), 13);
        assert_eq!(host_id, get_host_id());
    }

    #[test]
    fn test_init_logging_twice_is_harmless() {
        let config = LogConfig::default().with_level(LevelFilter::OFF);
        init_logging(&config);
        init_logging(&config);
    }
}
