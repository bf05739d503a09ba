//! Runner for the read-only diagnostics (`ps`, `pgrep`, `lsof`).
//!
//! Each run gets a deadline, a per-stream output cap, and a scrubbed
//! environment (`LC_ALL=C`) so the grammars see stable output. A run that
//! overstays its deadline gets SIGTERM, then SIGKILL after a grace period,
//! and is always reaped before the call returns.
//!
//! Every diagnostic is a child of the calling process for as long as it runs.
//! The runner records the pid of each one it spawns so the relation backends
//! can leave them out of the caller's children; see [`diagnostic_pids_since`].

use std::collections::HashSet;
use std::io::{self, Read};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};

/// Default upper bound on one run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default cap per output stream (10 MiB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Time between SIGTERM and SIGKILL.
const TERM_GRACE: Duration = Duration::from_millis(500);

/// Pause between polls when neither pipe had data.
const IDLE_POLL: Duration = Duration::from_millis(5);

/// How long a reaped diagnostic's pid is remembered.
const SPAWN_MEMORY: Duration = Duration::from_secs(60);

/// Errors that stop a diagnostic from producing output.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("command failed to spawn: {0}")]
    SpawnFailed(String),

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid command path: {0}")]
    InvalidPath(String),

    #[error("command not in allowlist: {0}")]
    NotAllowed(String),
}

/// What a finished diagnostic printed.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub command: String,
    pub args: Vec<String>,
    /// Pid the diagnostic ran under. It was a child of this process.
    pub pid: u32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` when the tool was ended by a signal.
    pub exit_code: Option<i32>,
    /// At least one stream hit the output cap.
    pub truncated: bool,
    pub duration: Duration,
}

impl ToolOutput {
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// First stderr line, trimmed, for error messages.
    pub fn stderr_head(&self) -> String {
        self.stderr_str()
            .lines()
            .next()
            .unwrap_or("")
            .trim()
            .to_string()
    }
}

/// Runner settings.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub default_timeout: Duration,
    pub max_output_bytes: usize,
    /// Commands that may run. Empty allows any command.
    pub allowed_commands: HashSet<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            allowed_commands: HashSet::new(),
        }
    }
}

/// Holds configuration only; each run owns its child, pipes and buffers.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    config: ToolConfig,
}

impl ToolRunner {
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ToolConfig::default())
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    /// Run `cmd` with `args` and capture what it prints.
    ///
    /// A non-zero exit is not an error here; callers decide what each exit
    /// status means for their tool. `timeout` overrides the configured one.
    #[instrument(skip(self, args), fields(cmd = %cmd))]
    pub fn run_tool(
        &self,
        cmd: &str,
        args: &[&str],
        timeout: Option<Duration>,
    ) -> Result<ToolOutput, ToolError> {
        self.check_allowed(cmd)?;
        let timeout = timeout.unwrap_or(self.config.default_timeout);
        debug!(?args, timeout_ms = timeout.as_millis() as u64, "running diagnostic");

        let started = Instant::now();
        let mut child = scrubbed_command(cmd, args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => ToolError::CommandNotFound(cmd.to_string()),
                _ => ToolError::SpawnFailed(e.to_string()),
            })?;

        let pid = child.id();
        let _spawned = SpawnRecord::register(pid);
        let collected = supervise(&mut child, timeout, self.config.max_output_bytes);
        let duration = started.elapsed();

        match collected {
            Ok((capture, exit_code)) => {
                debug!(
                    pid,
                    exit_code = ?exit_code,
                    duration_ms = duration.as_millis() as u64,
                    truncated = capture.truncated,
                    "diagnostic finished"
                );
                Ok(ToolOutput {
                    command: cmd.to_string(),
                    args: args.iter().map(|a| a.to_string()).collect(),
                    pid,
                    stdout: capture.stdout,
                    stderr: capture.stderr,
                    exit_code,
                    truncated: capture.truncated,
                    duration,
                })
            }
            Err(e) => {
                warn!(pid, error = %e, "diagnostic failed");
                Err(e)
            }
        }
    }

    fn check_allowed(&self, cmd: &str) -> Result<(), ToolError> {
        if cmd.is_empty() || cmd.contains(['|', '&', ';', '$', '`', '\n', '\r', ' ']) {
            return Err(ToolError::InvalidPath(format!(
                "command contains shell metacharacters: {:?}",
                cmd
            )));
        }

        let allowed = &self.config.allowed_commands;
        if !allowed.is_empty() {
            let base = Path::new(cmd)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(cmd);
            if !allowed.contains(cmd) && !allowed.contains(base) {
                return Err(ToolError::NotAllowed(cmd.to_string()));
            }
        }

        if cmd.starts_with('/') && !Path::new(cmd).exists() {
            return Err(ToolError::CommandNotFound(cmd.to_string()));
        }
        Ok(())
    }
}

/// Builder for a [`ToolRunner`].
#[derive(Debug, Default)]
pub struct ToolRunnerBuilder {
    config: ToolConfig,
}

impl ToolRunnerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = timeout;
        self
    }

    pub fn max_output(mut self, max_bytes: usize) -> Self {
        self.config.max_output_bytes = max_bytes;
        self
    }

    /// Restrict the runner to these commands.
    pub fn allow_commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config
            .allowed_commands
            .extend(commands.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> ToolRunner {
        ToolRunner::new(self.config)
    }
}

// ---------------------------------------------------------------------------
// Spawned diagnostic pids
// ---------------------------------------------------------------------------

struct SpawnEntry {
    pid: u32,
    reaped_at: Option<Instant>,
}

static SPAWNED: Mutex<Vec<SpawnEntry>> = Mutex::new(Vec::new());

fn spawned() -> std::sync::MutexGuard<'static, Vec<SpawnEntry>> {
    SPAWNED.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Marks the diagnostic reaped when dropped. Every path out of `run_tool`
/// reaps the child before this drops.
struct SpawnRecord {
    pid: u32,
}

impl SpawnRecord {
    fn register(pid: u32) -> Self {
        let mut entries = spawned();
        entries.retain(|e| match e.reaped_at {
            Some(at) => at.elapsed() < SPAWN_MEMORY,
            None => true,
        });
        entries.push(SpawnEntry {
            pid,
            reaped_at: None,
        });
        SpawnRecord { pid }
    }
}

impl Drop for SpawnRecord {
    fn drop(&mut self) {
        let now = Instant::now();
        for entry in spawned().iter_mut() {
            if entry.pid == self.pid && entry.reaped_at.is_none() {
                entry.reaped_at = Some(now);
            }
        }
    }
}

/// Pids of diagnostics this process ran at any point after `since`.
///
/// A snapshot captured after `since` may list any of them as a child of this
/// process, including ones started by other threads.
pub fn diagnostic_pids_since(since: Instant) -> HashSet<u32> {
    spawned()
        .iter()
        .filter(|e| e.reaped_at.map_or(true, |at| at >= since))
        .map(|e| e.pid)
        .collect()
}

// ---------------------------------------------------------------------------
// Child supervision
// ---------------------------------------------------------------------------

fn scrubbed_command(cmd: &str, args: &[&str]) -> Command {
    let mut command = Command::new(cmd);
    command.args(args).env_clear();
    if let Some(path) = std::env::var_os("PATH") {
        command.env("PATH", path);
    }
    command.env("LC_ALL", "C").env("LANG", "C");
    command
}

/// Bytes captured from one run.
struct Capture {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl Capture {
    fn new(limit: usize) -> Self {
        Self {
            stdout: Vec::with_capacity(limit.min(64 * 1024)),
            stderr: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Read whatever is ready on both pipes. Returns true if anything arrived.
    fn pump(&mut self, out: &mut Option<ChildStdout>, err: &mut Option<ChildStderr>) -> bool {
        let mut got = false;
        if let Some(pipe) = out.as_mut() {
            got |= drain_ready(pipe, &mut self.stdout, self.limit, &mut self.truncated);
        }
        if let Some(pipe) = err.as_mut() {
            got |= drain_ready(pipe, &mut self.stderr, self.limit, &mut self.truncated);
        }
        got
    }
}

/// Read from a non-blocking pipe until it has nothing more to give.
///
/// Bytes past `limit` are read and discarded so the child never blocks on a
/// full pipe.
fn drain_ready<R: Read>(
    pipe: &mut R,
    buf: &mut Vec<u8>,
    limit: usize,
    truncated: &mut bool,
) -> bool {
    let mut chunk = [0u8; 8192];
    let mut got = false;
    loop {
        match pipe.read(&mut chunk) {
            Ok(0) => return got,
            Ok(n) => {
                got = true;
                let room = limit.saturating_sub(buf.len());
                buf.extend_from_slice(&chunk[..n.min(room)]);
                if n > room {
                    *truncated = true;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => return got,
        }
    }
}

fn set_nonblocking(fd: i32) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 || unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Supervise `child` until it exits or `timeout` passes.
fn supervise(
    child: &mut Child,
    timeout: Duration,
    limit: usize,
) -> Result<(Capture, Option<i32>), ToolError> {
    let mut out = child.stdout.take();
    let mut err = child.stderr.take();
    let nonblocking = [
        out.as_ref().map(|p| p.as_raw_fd()),
        err.as_ref().map(|p| p.as_raw_fd()),
    ]
    .into_iter()
    .flatten()
    .try_for_each(set_nonblocking);
    if let Err(e) = nonblocking {
        terminate(child);
        return Err(ToolError::Io(e));
    }

    let deadline = Instant::now() + timeout;
    let mut capture = Capture::new(limit);

    loop {
        let got = capture.pump(&mut out, &mut err);

        match child.try_wait() {
            Ok(Some(status)) => {
                // Whatever the child wrote before exiting is already buffered.
                // A grandchild holding the pipe open must not stall us.
                capture.pump(&mut out, &mut err);
                trace!(exit_code = ?status.code(), "child exited");
                return Ok((capture, status.code()));
            }
            Ok(None) => {}
            Err(e) => {
                terminate(child);
                return Err(ToolError::Io(e));
            }
        }

        if Instant::now() >= deadline {
            warn!(pid = child.id(), "deadline passed, terminating");
            terminate(child);
            return Err(ToolError::Timeout(timeout));
        }
        if !got {
            thread::sleep(IDLE_POLL);
        }
    }
}

/// SIGTERM, wait up to [`TERM_GRACE`], then SIGKILL. Always reaps.
fn terminate(child: &mut Child) {
    let pid = child.id() as libc::pid_t;
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }

    let give_up = Instant::now() + TERM_GRACE;
    while Instant::now() < give_up {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => thread::sleep(Duration::from_millis(10)),
            Err(_) => break,
        }
    }

    debug!(pid, "still running after SIGTERM, killing");
    let _ = child.kill();
    let _ = child.wait();
}
