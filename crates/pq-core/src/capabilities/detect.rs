//! Capability detection implementation.

use crate::collect::tool_runner::{ToolError, ToolOutput, ToolRunner, ToolRunnerBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Default timeout for each tool check during detection.
const TOOL_CHECK_TIMEOUT_MS: u64 = 5000;

/// Run states passed to `pgrep -r`: every state except `Z`.
pub const LIVE_RUNSTATES: &str = "D,R,S,T,t,W,X,P,I";

/// Errors during capability detection.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("{0} not found on PATH")]
    NotOnPath(String),

    #[error("{tool} check failed: {reason}")]
    CheckFailed { tool: String, reason: String },

    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// Complete system capabilities snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Platform information.
    pub platform: PlatformInfo,

    /// Kernel-provided data sources.
    pub data_sources: DataSourceCapabilities,

    /// Diagnostic tool availability.
    pub tools: ToolCapabilities,

    /// `pgrep` accepts `-r` and can exclude zombies itself.
    pub pgrep_runstates: bool,

    /// Timestamp when capabilities were detected.
    pub detected_at: String,
}

impl Capabilities {
    /// Get a summary of available capabilities.
    pub fn summary(&self) -> String {
        format!(
            "Platform: {} {} | Sources: procfs={} native={} | Tools: {}/{}",
            self.platform.os,
            self.platform.kernel_release.as_deref().unwrap_or("unknown"),
            self.data_sources.procfs,
            self.data_sources.native_api,
            self.tools.available_count(),
            self.tools.total_count(),
        )
    }

    /// A snapshot with nothing available, for tests that exercise fallback.
    pub fn none() -> Self {
        Self {
            platform: detect_platform(),
            data_sources: DataSourceCapabilities {
                procfs: false,
                native_api: false,
            },
            tools: ToolCapabilities {
                ps: ToolCapability::unavailable(),
                pgrep: ToolCapability::unavailable(),
                lsof: ToolCapability::unavailable(),
            },
            pgrep_runstates: false,
            detected_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Platform information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    /// Operating system (linux, macos, freebsd).
    pub os: String,

    /// Kernel release string (e.g., "6.1.0-25-generic").
    pub kernel_release: Option<String>,

    /// Machine architecture.
    pub arch: String,
}

/// Data source availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceCapabilities {
    /// /proc filesystem with per-process stat and cwd entries.
    pub procfs: bool,

    /// Native process-table API (libproc).
    pub native_api: bool,
}

/// Single tool capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCapability {
    /// Whether tool is on PATH.
    pub available: bool,

    /// Path to the tool.
    pub path: Option<String>,

    /// Whether tool works (tested with a real query against this process).
    pub works: bool,

    /// Error message if tool doesn't work.
    pub error: Option<String>,
}

impl ToolCapability {
    /// Create a capability for an unavailable tool.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            path: None,
            works: false,
            error: None,
        }
    }

    /// Create a capability for an available but non-working tool.
    pub fn available_broken(path: String, error: String) -> Self {
        Self {
            available: true,
            path: Some(path),
            works: false,
            error: Some(error),
        }
    }

    /// Create a capability for a working tool.
    pub fn working(path: String) -> Self {
        Self {
            available: true,
            path: Some(path),
            works: true,
            error: None,
        }
    }

    /// Whether a strategy depending on this tool should be attempted.
    pub fn usable(&self) -> bool {
        self.available && self.works
    }
}

/// Tool capabilities for the diagnostics the queries use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCapabilities {
    /// ps command.
    pub ps: ToolCapability,

    /// pgrep command.
    pub pgrep: ToolCapability,

    /// lsof command.
    pub lsof: ToolCapability,
}

impl ToolCapabilities {
    /// Number of working tools.
    pub fn available_count(&self) -> usize {
        [&self.ps, &self.pgrep, &self.lsof]
            .iter()
            .filter(|t| t.usable())
            .count()
    }

    /// Total number of tracked tools.
    pub fn total_count(&self) -> usize {
        3
    }
}

/// Detect all system capabilities.
pub fn detect_capabilities() -> Capabilities {
    info!("detecting system capabilities");

    let runner = ToolRunnerBuilder::new()
        .timeout(Duration::from_millis(TOOL_CHECK_TIMEOUT_MS))
        .max_output(64 * 1024)
        .allow_commands(crate::collect::DIAGNOSTIC_TOOLS.iter().copied())
        .build();

    let platform = detect_platform();
    let data_sources = detect_data_sources(Path::new("/proc"));
    let tools = detect_tools(&runner);
    let pgrep_runstates = tools.pgrep.usable() && detect_pgrep_runstates(&runner);

    let caps = Capabilities {
        platform,
        data_sources,
        tools,
        pgrep_runstates,
        detected_at: chrono::Utc::now().to_rfc3339(),
    };

    info!(summary = %caps.summary(), "capability detection complete");
    caps
}

/// Detect platform information.
fn detect_platform() -> PlatformInfo {
    debug!("detecting platform");

    PlatformInfo {
        os: detect_os(),
        kernel_release: detect_kernel_release(),
        arch: std::env::consts::ARCH.to_string(),
    }
}

/// Detect operating system.
fn detect_os() -> String {
    #[cfg(target_os = "linux")]
    {
        "linux".to_string()
    }
    #[cfg(target_os = "macos")]
    {
        "macos".to_string()
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        std::env::consts::OS.to_string()
    }
}

/// Detect kernel release.
fn detect_kernel_release() -> Option<String> {
    let mut uname = std::mem::MaybeUninit::<libc::utsname>::uninit();
    let result = unsafe { libc::uname(uname.as_mut_ptr()) };
    if result == 0 {
        let uname = unsafe { uname.assume_init() };
        let release = unsafe {
            std::ffi::CStr::from_ptr(uname.release.as_ptr())
                .to_string_lossy()
                .to_string()
        };
        return Some(release);
    }
    None
}

/// Detect data sources.
fn detect_data_sources(proc_root: &Path) -> DataSourceCapabilities {
    debug!("detecting data sources");

    let procfs = proc_root.join("self").join("stat").exists();
    let native_api = cfg!(target_os = "macos");

    trace!(procfs, native_api, "data sources");
    DataSourceCapabilities { procfs, native_api }
}

/// Detect tool availability.
fn detect_tools(runner: &ToolRunner) -> ToolCapabilities {
    debug!("detecting tools");

    let me = std::process::id().to_string();

    ToolCapabilities {
        ps: check_tool(runner, "ps", &["-o", "pid=", "-p", &me], |out| {
            out.success() && out.stdout_str().trim() == me
        }),
        pgrep: check_tool(runner, "pgrep", &["-P", &me], |out| {
            matches!(out.exit_code, Some(0) | Some(1))
        }),
        lsof: check_tool(
            runner,
            "lsof",
            &["-a", "-p", &me, "-d", "cwd", "-Ffn"],
            |out| out.success() && out.stdout_str().lines().any(|l| l == "fcwd"),
        ),
    }
}

/// Locate a tool, then run a real query and check the result.
fn check_tool(
    runner: &ToolRunner,
    name: &str,
    args: &[&str],
    check: impl Fn(&ToolOutput) -> bool,
) -> ToolCapability {
    trace!(tool = name, "checking tool");

    let path = match find_on_path(name) {
        Some(path) => path.display().to_string(),
        None => {
            trace!(tool = name, "not found");
            return ToolCapability::unavailable();
        }
    };

    match run_check(runner, name, args, check) {
        Ok(()) => {
            trace!(tool = name, path = %path, "tool works");
            ToolCapability::working(path)
        }
        Err(e) => {
            warn!(tool = name, error = %e, "tool check failed");
            ToolCapability::available_broken(path, e.to_string())
        }
    }
}

fn run_check(
    runner: &ToolRunner,
    name: &str,
    args: &[&str],
    check: impl Fn(&ToolOutput) -> bool,
) -> Result<(), DetectionError> {
    let output = runner.run_tool(name, args, None).map_err(|e| match e {
        ToolError::CommandNotFound(cmd) => DetectionError::NotOnPath(cmd),
        other => DetectionError::Tool(other),
    })?;

    if check(&output) {
        Ok(())
    } else {
        Err(DetectionError::CheckFailed {
            tool: name.to_string(),
            reason: format!("exit {:?}: {}", output.exit_code, output.stderr_head()),
        })
    }
}

/// Check whether `pgrep -r` is understood. procps exits 2 on an unknown option.
fn detect_pgrep_runstates(runner: &ToolRunner) -> bool {
    let me = std::process::id().to_string();
    match runner.run_tool("pgrep", &["-r", LIVE_RUNSTATES, "-P", &me], None) {
        Ok(out) => {
            let supported = matches!(out.exit_code, Some(0) | Some(1));
            trace!(supported, "pgrep runstates check");
            supported
        }
        Err(e) => {
            trace!(error = %e, "pgrep runstates check failed");
            false
        }
    }
}

/// Locate an executable on PATH.
fn find_on_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
