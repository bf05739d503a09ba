//! Structured test logging.
//!
//! Live tests spawn real processes and race with the OS, so each one leaves a
//! JSONL trail in `target/test-logs/pq-core-tests-<pid>.jsonl` describing
//! which handles it created and what every strategy answered.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const LOG_DIR_NAME: &str = "test-logs";

/// One line of the test trail.
#[derive(Debug, Serialize)]
pub struct TestLogEntry<'a> {
    pub ts: String,
    pub level: &'a str,
    pub msg: &'a str,
    pub file: &'a str,
    pub line: u32,
    pub pid: u32,
    pub test: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Where this test binary's trail is written.
pub fn log_file_path() -> PathBuf {
    let target = match std::env::var("CARGO_TARGET_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => Path::new(env!("CARGO_MANIFEST_DIR")).join("../../target"),
    };
    target
        .join(LOG_DIR_NAME)
        .join(format!("pq-core-tests-{}.jsonl", std::process::id()))
}

fn append_line(line: &str) {
    let path = log_file_path();
    if let Some(parent) = path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            eprintln!("test_log: cannot create {}: {}", parent.display(), err);
            return;
        }
    }

    let result = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut file| writeln!(file, "{}", line));
    if let Err(err) = result {
        eprintln!("test_log: cannot write {}: {}", path.display(), err);
    }
}

/// Emit one structured entry.
///
/// The test name is taken from the libtest thread name unless a `test`
/// field is supplied. Fields that clash with the fixed keys get an `extra_`
/// prefix.
pub fn log_event(level: &str, msg: &str, file: &str, line: u32, fields: &[(&str, Value)]) {
    const FIXED: [&str; 7] = ["ts", "level", "msg", "file", "line", "pid", "test"];

    let mut test = std::thread::current()
        .name()
        .unwrap_or("unnamed")
        .to_string();
    let mut extra = Map::new();
    for (key, value) in fields {
        if *key == "test" {
            if let Value::String(name) = value {
                test = name.clone();
                continue;
            }
        }
        if FIXED.contains(key) {
            extra.insert(format!("extra_{}", key), value.clone());
        } else {
            extra.insert((*key).to_string(), value.clone());
        }
    }

    let entry = TestLogEntry {
        ts: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        level,
        msg,
        file,
        line,
        pid: std::process::id(),
        test,
        fields: extra,
    };

    match serde_json::to_string(&entry) {
        Ok(line) => append_line(&line),
        Err(err) => eprintln!("test_log: cannot serialize entry: {}", err),
    }
}

/// Log a structured test event.
///
/// ```ignore
/// test_log!(INFO, "spawned child", pid = child.pid().get(), dir = dir.display().to_string());
/// test_log!("free-form {}", 42);
/// ```
#[macro_export]
macro_rules! test_log {
    ($level:ident, $msg:expr $(, $key:ident = $val:expr )* $(,)?) => {{
        let fields = vec![
            $(
                (stringify!($key), serde_json::json!($val)),
            )*
        ];
        let msg_string = $msg.to_string();
        $crate::test_log::log_event(stringify!($level), &msg_string, file!(), line!(), &fields);
    }};
    ($($arg:tt)+) => {{
        $crate::test_log!(INFO, format!($($arg)+));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries() -> Vec<Value> {
        fs::read_to_string(log_file_path())
            .unwrap_or_default()
            .lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }

    #[test]
    fn test_log_event_is_written() {
        crate::test_log!(INFO, "strategy answered", strategy = "procfs", answer = true);

        let found = entries().into_iter().any(|e| {
            e["msg"] == "strategy answered"
                && e["strategy"] == "procfs"
                && e["answer"] == true
                && e["test"]
                    .as_str()
                    .is_some_and(|t| t.ends_with("test_log_event_is_written"))
        });
        assert!(found, "expected structured log entry not found");
    }

    #[test]
    fn test_clashing_field_is_prefixed() {
        log_event(
            "WARN",
            "clash",
            "test_log.rs",
            1,
            &[
                ("test", Value::String("clash-test".to_string())),
                ("pid", Value::from(7)),
            ],
        );

        let found = entries()
            .into_iter()
            .any(|e| e["test"] == "clash-test" && e["extra_pid"] == 7);
        assert!(found);
    }
}
