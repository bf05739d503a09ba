//! Process data collection.
//!
//! This module provides the backends the queries are built on:
//! - Tool runner for short-lived diagnostic commands (ps, pgrep, lsof)
//! - Output grammars decoding what those tools print
//! - Relation enumeration from `ps`, the native API, or `/proc`
//!
//! Nothing here caches per-process state; every call is a fresh capture.

pub mod grammars;
#[cfg(target_os = "macos")]
mod native;
pub mod relations;
pub mod tool_runner;

pub use grammars::{GrammarError, LsofCwd, PsRow, PsTable, StatRecord};
pub use relations::{list_relations, RelationSource};
pub use tool_runner::{
    diagnostic_pids_since, ToolConfig, ToolError, ToolOutput, ToolRunner, ToolRunnerBuilder,
    DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_TIMEOUT,
};

use pq_common::{ProcessId, QueryError, QueryResult};
use std::fs;
use std::path::Path;
use tracing::trace;

/// Diagnostics the query runner is allowed to launch.
pub const DIAGNOSTIC_TOOLS: &[&str] = &["ps", "pgrep", "lsof"];

/// Map a runner failure onto the public error model.
///
/// Anything that stops the tool from producing output is a tooling problem
/// the next strategy may route around; only a timeout is reported as such.
pub fn tool_error_to_query(backend: &str, err: ToolError) -> QueryError {
    match err {
        ToolError::Timeout(after) => QueryError::Timeout {
            backend: backend.to_string(),
            after,
        },
        ToolError::CommandNotFound(_) => {
            QueryError::backend_unavailable(backend, "not installed or not on PATH")
        }
        ToolError::NotAllowed(cmd) => {
            QueryError::backend_unavailable(backend, format!("{cmd} is not allowlisted"))
        }
        ToolError::InvalidPath(msg) | ToolError::SpawnFailed(msg) => {
            QueryError::backend_unavailable(backend, msg)
        }
        ToolError::Io(e) => QueryError::backend_unavailable(backend, e.to_string()),
    }
}

/// Check that `pid` names a live (or unreaped) process with `kill(pid, 0)`.
///
/// `EPERM` means the process exists but belongs to someone else, which still
/// counts as existing. A non-positive raw value would address a process
/// group, so it is refused before reaching `kill`.
pub fn ensure_exists(pid: ProcessId) -> QueryResult<()> {
    let raw = pid.as_raw();
    if raw <= 0 {
        return Err(QueryError::InvalidHandle(i64::from(raw)));
    }
    let rc = unsafe { libc::kill(raw, 0) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EPERM) => Ok(()),
        Some(libc::ESRCH) => Err(QueryError::not_found(pid)),
        _ => Err(QueryError::backend_unavailable(
            "kill",
            format!("existence check failed: {err}"),
        )),
    }
}

/// Check that `pid` names a live process, treating an unreaped zombie as gone.
///
/// `kill(pid, 0)` succeeds for zombies, so the run state is read back from
/// `<proc_root>/<pid>/stat`, or from `ps` where there is no procfs. When
/// neither can tell, the process is taken as live.
pub fn ensure_live(runner: &ToolRunner, proc_root: &Path, pid: ProcessId) -> QueryResult<()> {
    ensure_exists(pid)?;
    match run_state(runner, proc_root, pid)? {
        Some('Z') => {
            trace!(pid = %pid, "target is a zombie");
            Err(QueryError::not_found(pid))
        }
        Some(_) => Ok(()),
        None => {
            trace!(pid = %pid, "run state unknown, taking process as live");
            Ok(())
        }
    }
}

/// First letter of the process's run state (`R`, `S`, `Z`, ...).
///
/// `Ok(None)` when no backend could report it. `NotFound` when the backend
/// saw the process disappear.
pub fn run_state(runner: &ToolRunner, proc_root: &Path, pid: ProcessId) -> QueryResult<Option<char>> {
    let stat = proc_root.join(pid.to_string()).join("stat");
    match fs::read_to_string(&stat) {
        Ok(content) => {
            if let Ok(record) = grammars::parse_stat_record(&content) {
                return Ok(Some(record.state));
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && proc_root.join("self").exists() => {
            return Err(QueryError::not_found(pid));
        }
        Err(_) => {}
    }

    let pid_arg = pid.to_string();
    let output = match runner.run_tool("ps", &["-o", "stat=", "-p", &pid_arg], None) {
        Ok(output) => output,
        Err(e) => {
            trace!(error = %e, "ps unavailable for run state");
            return Ok(None);
        }
    };
    let stdout = output.stdout_str();
    match (output.exit_code, stdout.trim().chars().next()) {
        (Some(0), Some(state)) => Ok(Some(state)),
        (Some(1), None) => Err(QueryError::not_found(pid)),
        _ => Ok(None),
    }
}
