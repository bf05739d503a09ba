//! JSONL output layer.
//!
//! Writes one JSON object per event. Correlation fields (`run_id`, `host_id`,
//! `stage`, `pid`, `strategy`) are lifted to the top level, taken from the
//! event itself or else from the innermost enclosing span that carries them.
//! Every other event field lands under `fields`.

use std::io::{self, Write};
use std::sync::Mutex;

use chrono::Utc;
use serde_json::{Map, Number, Value};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const CORRELATION: [&str; 5] = ["run_id", "host_id", "stage", "pid", "strategy"];

/// Field values collected from an event or span.
#[derive(Debug, Default)]
struct Fields(Map<String, Value>);

impl Fields {
    fn put(&mut self, field: &Field, value: Value) {
        self.0.insert(field.name().to_string(), value);
    }

    /// Take the correlation fields out, normalized.
    fn take_correlation(&mut self) -> Map<String, Value> {
        let mut out = Map::new();
        for key in CORRELATION {
            if let Some(value) = self.0.remove(key) {
                out.insert(key.to_string(), normalize(key, value));
            }
        }
        out
    }
}

/// `%pid` is recorded as text; emit it as a number.
fn normalize(key: &str, value: Value) -> Value {
    match (key, &value) {
        ("pid", Value::String(s)) => s.parse::<u64>().map(Value::from).unwrap_or(value),
        _ => value,
    }
}

impl Visit for Fields {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, Value::String(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::Bool(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = Number::from_f64(value) {
            self.put(field, Value::Number(n));
        }
    }
}

/// Correlation fields of one span, stored in its extensions.
struct SpanCorrelation(Map<String, Value>);

/// Tracing layer writing JSONL, to stderr unless built with [`JsonlLayer::new`].
pub struct JsonlLayer<W = io::Stderr> {
    writer: Mutex<W>,
}

impl JsonlLayer<io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

impl<W: Write> JsonlLayer<W> {
    pub fn new(writer: W) -> Self {
        JsonlLayer {
            writer: Mutex::new(writer),
        }
    }
}

impl<S, W> Layer<S> for JsonlLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: Write + 'static,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut fields = Fields::default();
        attrs.record(&mut fields);
        let correlation = fields.take_correlation();
        if correlation.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanCorrelation(correlation));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let meta = event.metadata();
        let mut line = Map::new();
        line.insert("ts".into(), Value::String(Utc::now().to_rfc3339()));
        line.insert(
            "level".into(),
            Value::String(meta.level().to_string().to_ascii_lowercase()),
        );
        line.insert("event".into(), Value::String(meta.target().to_string()));

        // Root first, so inner spans overwrite outer ones
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                if let Some(SpanCorrelation(found)) = span.extensions().get::<SpanCorrelation>() {
                    line.extend(found.clone());
                }
            }
        }

        let mut fields = Fields::default();
        event.record(&mut fields);
        line.extend(fields.take_correlation());
        if let Some(message) = fields.0.remove("message") {
            line.insert("message".into(), message);
        }
        if !fields.0.is_empty() {
            line.insert("fields".into(), Value::Object(fields.0));
        }

        let Ok(json) = serde_json::to_string(&line) else {
            return;
        };
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{}", json);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(f: impl FnOnce()) -> Vec<Value> {
        let buffer = Buffer::default();
        let subscriber = tracing_subscriber::registry().with(JsonlLayer::new(buffer.clone()));
        tracing::subscriber::with_default(subscriber, f);

        let bytes = buffer.0.lock().unwrap();
        String::from_utf8_lossy(&bytes)
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_event_line_shape() {
        let events = capture(|| {
            tracing::warn!(target: "strategy.fallback", count = 42, active = true, message = "hi");
        });
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["level"], "warn");
        assert_eq!(events[0]["event"], "strategy.fallback");
        assert_eq!(events[0]["message"], "hi");
        assert!(events[0]["ts"].is_string());
        assert_eq!(events[0]["fields"]["count"], 42);
        assert_eq!(events[0]["fields"]["active"], true);
    }

    #[test]
    fn test_innermost_span_wins() {
        let events = capture(|| {
            let run = tracing::info_span!("run", run_id = "run-abc", stage = "init");
            let _run = run.enter();
            let query = tracing::debug_span!("query", stage = "detect", pid = 4242u32);
            let _query = query.enter();
            tracing::error!(target: "strategy.answered", strategy = "procfs", "inside");
        });
        assert_eq!(events[0]["run_id"], "run-abc");
        assert_eq!(events[0]["stage"], "detect");
        assert_eq!(events[0]["pid"], 4242);
        assert_eq!(events[0]["strategy"], "procfs");
        assert_eq!(events[0]["message"], "inside");
        assert!(events[0].get("fields").is_none());
    }

    #[test]
    fn test_display_pid_becomes_number() {
        let events = capture(|| {
            let span = tracing::info_span!("query", pid = %crate::test_utils::pid(77));
            let _g = span.enter();
            tracing::info!(target: "query.finished", "x");
        });
        assert_eq!(events[0]["pid"], 77);
    }
}
