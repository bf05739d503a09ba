//! Test utilities for pq-core.
//!
//! This module provides test infrastructure including:
//! - Result assertions
//! - Fixture loading helpers
//! - A process harness for live ("nomock") tests that kills and reaps
//!   everything it spawned when the handle drops

use crate::capabilities::Capabilities;
use crate::query::{CwdStrategy, SubprocessStrategy};
use pq_common::{ErrorKind, ProcessId, QueryResult};
use std::fmt::{Debug, Display};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

// ============================================================================
// Macros
// ============================================================================

/// Assert that a Result is Ok and return the value.
#[macro_export]
macro_rules! assert_ok {
    ($expr:expr) => {
        match $expr {
            Ok(val) => val,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($expr:expr, $msg:expr) => {
        match $expr {
            Ok(val) => val,
            Err(e) => panic!("{}: {:?}", $msg, e),
        }
    };
}

/// Assert that a Result is Err and return the error.
#[macro_export]
macro_rules! assert_err {
    ($expr:expr) => {
        match $expr {
            Ok(val) => panic!("Expected Err, got Ok: {:?}", val),
            Err(e) => e,
        }
    };
    ($expr:expr, $msg:expr) => {
        match $expr {
            Ok(val) => panic!("{}: got Ok({:?})", $msg, val),
            Err(e) => e,
        }
    };
}

// ============================================================================
// Handles
// ============================================================================

/// A handle for table-driven tests. Panics on an invalid pid.
pub fn pid(raw: u32) -> ProcessId {
    match ProcessId::try_from(raw) {
        Ok(pid) => pid,
        Err(e) => panic!("bad test pid {}: {}", raw, e),
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Fixture directory relative to crate root.
pub const FIXTURES_DIR: &str = "tests/fixtures";

/// Get the path to a test fixture file.
pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join(FIXTURES_DIR)
        .join(name)
}

/// Load a fixture file as a string.
pub fn load_fixture(name: &str) -> std::io::Result<String> {
    std::fs::read_to_string(fixture_path(name))
}

// ============================================================================
// Strategy reports
// ============================================================================

/// Whether the backend behind `strategy` exists on this host, working or not.
pub fn subprocess_backend_present(caps: &Capabilities, strategy: SubprocessStrategy) -> bool {
    match strategy {
        SubprocessStrategy::Generic => caps.tools.ps.available,
        SubprocessStrategy::ProcessGroup => caps.tools.pgrep.available,
        SubprocessStrategy::Native => caps.data_sources.native_api,
        SubprocessStrategy::ProcFs => caps.data_sources.procfs,
    }
}

/// Whether the backend behind `strategy` exists on this host, working or not.
pub fn cwd_backend_present(caps: &Capabilities, strategy: CwdStrategy) -> bool {
    match strategy {
        CwdStrategy::Lsof => caps.tools.lsof.available,
        CwdStrategy::ProcFs => caps.data_sources.procfs,
        CwdStrategy::Generic => true,
    }
}

/// Keep the strategies that answered, logging every result.
///
/// `BackendUnavailable` is accepted only from a strategy whose backend is
/// absent; a present backend that fails that way panics.
pub fn answered<S: Copy + Display, T: Debug>(
    label: &str,
    report: Vec<(S, QueryResult<T>)>,
    present: impl Fn(S) -> bool,
) -> Vec<(S, QueryResult<T>)> {
    let mut kept = Vec::with_capacity(report.len());
    for (strategy, result) in report {
        crate::test_log!(
            INFO,
            label,
            strategy = strategy.to_string(),
            result = format!("{:?}", result)
        );
        match &result {
            Err(e) if e.kind() == ErrorKind::BackendUnavailable => assert!(
                !present(strategy),
                "{label}: {strategy} is installed but reported unavailable: {e}"
            ),
            _ => kept.push((strategy, result)),
        }
    }
    kept
}

// ============================================================================
// Polling
// ============================================================================

/// Poll `cond` every 20ms until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    loop {
        if cond() {
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

// ============================================================================
// Process Harness (no-mock integration tests)
// ============================================================================

/// Spawns real processes for live tests.
#[derive(Debug, Default)]
pub struct ProcessHarness;

impl ProcessHarness {
    /// Return true if `sh` and `sleep` can be spawned here.
    pub fn is_available() -> bool {
        Command::new("sh")
            .args(["-c", "command -v sleep >/dev/null"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// A childless `sleep` in the caller's working directory.
    pub fn spawn_sleep(&self, seconds: u64) -> std::io::Result<ProcessHandle> {
        ProcessHandle::spawn(
            Command::new("sleep").arg(seconds.max(1).to_string()),
            false,
        )
    }

    /// A childless `sleep` whose working directory is `dir`.
    pub fn spawn_in_dir(&self, dir: &Path, seconds: u64) -> std::io::Result<ProcessHandle> {
        ProcessHandle::spawn(
            Command::new("sleep")
                .arg(seconds.max(1).to_string())
                .current_dir(dir),
            false,
        )
    }

    /// A shell that has exactly one `sleep` child.
    ///
    /// Both run in a new process group so the whole group can be killed on
    /// drop. Wait for the child with [`ProcessHandle::wait_for_child`] before
    /// asserting on it.
    pub fn spawn_with_child(&self, seconds: u64) -> std::io::Result<ProcessHandle> {
        let script = format!("sleep {} & wait", seconds.max(1));
        ProcessHandle::spawn(Command::new("sh").args(["-c", &script]), true)
    }

    /// Like [`spawn_with_child`](Self::spawn_with_child), but once the child
    /// is gone the shell replaces itself with a childless `sleep`.
    pub fn spawn_with_child_then_exec(&self, seconds: u64) -> std::io::Result<ProcessHandle> {
        let s = seconds.max(1);
        let script = format!("sleep {s} & wait; exec sleep {s}");
        ProcessHandle::spawn(Command::new("sh").args(["-c", &script]), true)
    }

    /// A `true` that exits at once and stays a zombie until the handle drops.
    pub fn spawn_exiting(&self) -> std::io::Result<ProcessHandle> {
        ProcessHandle::spawn(&mut Command::new("true"), false)
    }

    /// A process whose only child exits after a second and is never reaped.
    pub fn spawn_with_zombie(&self, seconds: u64) -> std::io::Result<ProcessHandle> {
        let script = format!("sleep 1 & exec sleep {}", seconds.max(2));
        ProcessHandle::spawn(Command::new("sh").args(["-c", &script]), true)
    }
}

/// Handle to a spawned process. Dropping it kills and reaps the process.
pub struct ProcessHandle {
    pid: ProcessId,
    group: bool,
    child: Mutex<Child>,
}

impl ProcessHandle {
    fn spawn(cmd: &mut Command, new_group: bool) -> std::io::Result<Self> {
        use std::os::unix::process::CommandExt;

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if new_group {
            cmd.process_group(0);
        }

        let mut child = cmd.spawn()?;
        let pid = match ProcessId::try_from(child.id()) {
            Ok(pid) => pid,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()));
            }
        };
        Ok(Self {
            pid,
            group: new_group,
            child: Mutex::new(child),
        })
    }

    /// Return the handle of this process.
    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Check if the process is still running (and not yet reaped).
    pub fn is_running(&self) -> bool {
        let Ok(mut child) = self.child.lock() else {
            return false;
        };
        matches!(child.try_wait(), Ok(None))
    }

    /// Wait until the process has a child visible through `/proc` or `pgrep`.
    pub fn wait_for_child(&self, timeout: Duration) -> bool {
        #[cfg(target_os = "linux")]
        {
            wait_until(timeout, || {
                crate::collect::relations::relations_from_procfs(Path::new("/proc"))
                    .map(|table| table.has_children(self.pid))
                    .unwrap_or(false)
            })
        }
        #[cfg(not(target_os = "linux"))]
        {
            let pid = self.pid.to_string();
            wait_until(timeout, || {
                Command::new("pgrep")
                    .args(["-P", &pid])
                    .stdout(Stdio::null())
                    .status()
                    .map(|s| s.success())
                    .unwrap_or(false)
            })
        }
    }

    /// Kill the process (and its group if it leads one) and reap it.
    pub fn kill_and_reap(&self) {
        if self.group {
            unsafe {
                libc::kill(-self.pid.as_raw(), libc::SIGKILL);
            }
        }
        if let Ok(mut child) = self.child.lock() {
            if let Ok(Some(_)) = child.try_wait() {
                return;
            }
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.kill_and_reap();
    }
}

// ============================================================================
// Tests
// ============================================================================
