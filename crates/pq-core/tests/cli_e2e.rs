//! End-to-end tests for the pq-core binary.
//!
//! These run the real binary against real processes and check payloads and
//! exit codes.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

/// Get a Command for the pq-core binary.
fn pq_core() -> Command {
    let mut cmd = Command::cargo_bin("pq-core").expect("pq-core binary should exist");
    cmd.env_remove("PQ_TOOL_TIMEOUT_MS")
        .env_remove("PQ_MAX_OUTPUT_BYTES")
        .env_remove("PQ_PROC_ROOT")
        .env_remove("RUST_LOG")
        .env("PQ_LOG", "off");
    cmd
}

fn json_stdout(cmd: &mut Command) -> (Value, i32) {
    let output = cmd.output().expect("run pq-core");
    let value = serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({}): {}",
            e,
            String::from_utf8_lossy(&output.stdout)
        )
    });
    (value, output.status.code().unwrap_or(-1))
}

const MISSING_PID: &str = "2147483000";

// ============================================================================
// Argument Errors
// ============================================================================

mod args {
    use super::*;

    #[test]
    fn unknown_command_is_args_error() {
        pq_core()
            .arg("nonexistent-command")
            .assert()
            .code(10)
            .stderr(predicate::str::contains("error"));
    }

    #[test]
    fn zero_pid_is_args_error() {
        pq_core().args(["children", "0"]).assert().code(10);
    }

    #[test]
    fn non_numeric_pid_is_args_error() {
        pq_core().args(["cwd", "init"]).assert().code(10);
    }

    #[test]
    fn unknown_strategy_is_args_error() {
        pq_core()
            .args(["children", "1", "--strategy", "telepathy"])
            .assert()
            .code(10);
    }

    #[test]
    fn strategy_conflicts_with_all() {
        pq_core()
            .args(["cwd", "1", "--strategy", "lsof", "--all"])
            .assert()
            .code(10);
    }

    #[test]
    fn invalid_environment_is_args_error() {
        pq_core()
            .env("PQ_TOOL_TIMEOUT_MS", "soon")
            .args(["children", "1"])
            .assert()
            .code(10)
            .stderr(predicate::str::contains("PQ_TOOL_TIMEOUT_MS"));
    }

    #[test]
    fn help_exits_zero() {
        pq_core()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("children"));
    }
}

// ============================================================================
// Informational Commands
// ============================================================================

#[test]
fn version_json() {
    let (v, code) = json_stdout(pq_core().arg("version"));
    assert_eq!(code, 0);
    assert_eq!(v["pq_core_version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn capabilities_json_includes_config() {
    let (v, code) = json_stdout(pq_core().args(["--timeout-ms", "750", "capabilities"]));
    assert_eq!(code, 0);
    assert_eq!(v["config"]["tool_timeout_ms"], 750);
    assert!(v["capabilities"]["tools"]["ps"].is_object());
    assert!(v["subprocess_order"].is_array());
}

#[test]
fn capabilities_summary() {
    pq_core()
        .args(["-f", "summary", "capabilities"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Platform:"));
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn missing_process_is_not_found() {
    let (v, code) = json_stdout(pq_core().args(["children", MISSING_PID]));
    assert_eq!(code, 13);
    assert_eq!(v["status"], "error");
    assert_eq!(v["error"]["kind"], "not_found");
}

#[test]
fn missing_process_cwd_is_not_found() {
    let (v, code) = json_stdout(pq_core().args(["cwd", MISSING_PID]));
    assert_eq!(code, 13);
    assert_eq!(v["error"]["kind"], "not_found");
}

#[cfg(target_os = "linux")]
#[test]
fn test_process_has_the_cli_as_child() {
    let me = std::process::id().to_string();
    let (v, code) = json_stdout(pq_core().args(["children", &me]));
    assert_eq!(code, 0);
    assert_eq!(v["has_subprocesses"], true);
}

#[cfg(target_os = "linux")]
#[test]
fn childless_process_exits_one() {
    let mut sleeper = std::process::Command::new("sleep")
        .arg("30")
        .spawn()
        .expect("spawn sleep");
    let pid = sleeper.id().to_string();

    let (v, code) = json_stdout(pq_core().args(["children", &pid, "--strategy", "procfs"]));
    let _ = sleeper.kill();
    let _ = sleeper.wait();

    assert_eq!(code, 1);
    assert_eq!(v["has_subprocesses"], false);
    assert_eq!(v["strategy"], "procfs");
}

#[cfg(target_os = "linux")]
#[test]
fn cwd_summary_prints_canonical_path() {
    let me = std::process::id().to_string();
    let expected = std::fs::canonicalize(std::env::current_dir().unwrap()).unwrap();
    pq_core()
        .args(["-f", "summary", "cwd", &me])
        .assert()
        .success()
        .stdout(predicate::str::diff(format!("{}\n", expected.display())));
}

#[cfg(target_os = "linux")]
#[test]
fn all_strategies_agree_for_self() {
    let me = std::process::id().to_string();
    let (v, code) = json_stdout(pq_core().args(["children", &me, "--all"]));
    assert_eq!(code, 0);
    assert_eq!(v["agree"], true);
    let results = v["results"].as_array().unwrap();
    assert_eq!(results.len(), 4);
    assert!(results
        .iter()
        .any(|r| r["strategy"] == "procfs" && r["value"] == true));
}

#[cfg(target_os = "linux")]
#[test]
fn relations_from_procfs() {
    let (v, code) = json_stdout(pq_core().args(["relations", "--source", "procfs"]));
    assert_eq!(code, 0);
    assert!(v["count"].as_u64().unwrap() > 1);
}

#[test]
fn jsonl_logs_go_to_stderr() {
    let output = pq_core()
        .env("PQ_LOG", "info")
        .args(["--log-format", "jsonl", "version"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(stdout["pq_core_version"].is_string());

    let stderr = String::from_utf8_lossy(&output.stderr);
    let started = stderr
        .lines()
        .filter_map(|l| serde_json::from_str::<Value>(l).ok())
        .find(|e| e["event"] == "run.started")
        .expect("run.started event on stderr");
    assert!(started["run_id"].as_str().unwrap().starts_with("run-"));
}
