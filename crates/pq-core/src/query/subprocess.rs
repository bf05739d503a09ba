//! Subprocess detection strategies.

use crate::capabilities::LIVE_RUNSTATES;
use crate::collect::grammars;
use crate::collect::relations::{self, RelationSource};
use crate::collect::tool_runner::{diagnostic_pids_since, ToolOutput, ToolRunner};
use crate::collect::{ensure_live, run_state, tool_error_to_query};
use clap::ValueEnum;
use pq_common::{ErrorKind, ProcessId, QueryError, QueryResult, RelationTable};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::trace;

/// Ways of answering "does this process have a child".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SubprocessStrategy {
    /// Full `ps` table, membership among parents.
    Generic,
    /// `pgrep -P <pid>`.
    ProcessGroup,
    /// Platform process API.
    Native,
    /// `/proc` walk.
    #[value(name = "procfs")]
    #[serde(rename = "procfs")]
    ProcFs,
}

impl SubprocessStrategy {
    pub const ALL: [SubprocessStrategy; 4] = [
        SubprocessStrategy::Generic,
        SubprocessStrategy::ProcessGroup,
        SubprocessStrategy::Native,
        SubprocessStrategy::ProcFs,
    ];

    /// Order in which the detector tries strategies on this platform.
    pub fn platform_order() -> &'static [SubprocessStrategy] {
        #[cfg(target_os = "linux")]
        {
            &[
                SubprocessStrategy::ProcFs,
                SubprocessStrategy::Generic,
                SubprocessStrategy::ProcessGroup,
            ]
        }
        #[cfg(target_os = "macos")]
        {
            &[
                SubprocessStrategy::Native,
                SubprocessStrategy::Generic,
                SubprocessStrategy::ProcessGroup,
            ]
        }
        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            &[SubprocessStrategy::Generic, SubprocessStrategy::ProcessGroup]
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubprocessStrategy::Generic => "generic",
            SubprocessStrategy::ProcessGroup => "process-group",
            SubprocessStrategy::Native => "native",
            SubprocessStrategy::ProcFs => "procfs",
        }
    }
}

impl std::fmt::Display for SubprocessStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run one strategy with no fallback.
pub(crate) fn detect(
    strategy: SubprocessStrategy,
    runner: &ToolRunner,
    proc_root: &Path,
    pgrep_runstates: bool,
    pid: ProcessId,
) -> QueryResult<bool> {
    match strategy {
        SubprocessStrategy::Generic => via_table(relations::relations_from_ps(runner)?, pid),
        SubprocessStrategy::Native => via_table(relations::relations_from_native()?, pid),
        SubprocessStrategy::ProcFs => {
            via_table(relations::list_relations(RelationSource::ProcFs, runner, proc_root)?, pid)
        }
        SubprocessStrategy::ProcessGroup => via_pgrep(runner, proc_root, pgrep_runstates, pid),
    }
}

/// Membership test against a captured table.
pub(crate) fn via_table(table: RelationTable, pid: ProcessId) -> QueryResult<bool> {
    if !table.contains(pid) {
        return Err(QueryError::not_found(pid));
    }
    let children = table.children_of(pid);
    trace!(pid = %pid, children = children.len(), "table membership");
    Ok(!children.is_empty())
}

/// `pgrep -P <pid>`, after checking the target is a live process.
///
/// pgrep exits 1 both for a childless process and for a pid nobody owns, and
/// it cannot tell a zombie target from a live one, so liveness is settled
/// first. Without `-r` pgrep also lists zombie children; those are checked
/// one by one.
fn via_pgrep(
    runner: &ToolRunner,
    proc_root: &Path,
    runstates: bool,
    pid: ProcessId,
) -> QueryResult<bool> {
    ensure_live(runner, proc_root, pid)?;

    let since = Instant::now();
    let pid_arg = pid.to_string();
    let mut args: Vec<&str> = Vec::with_capacity(4);
    if runstates {
        args.extend(["-r", LIVE_RUNSTATES]);
    }
    args.extend(["-P", pid_arg.as_str()]);

    let output = runner
        .run_tool("pgrep", &args, None)
        .map_err(|e| tool_error_to_query("pgrep", e))?;
    let spawned = diagnostic_pids_since(since);
    interpret_pgrep(&output, |child| {
        spawned.contains(&child) || (!runstates && !still_live(runner, proc_root, child))
    })
}

/// False for a child that is a zombie or already gone.
fn still_live(runner: &ToolRunner, proc_root: &Path, raw: u32) -> bool {
    match ProcessId::try_from(raw) {
        Ok(child) => match run_state(runner, proc_root, child) {
            Ok(Some('Z')) => false,
            Ok(_) => true,
            Err(e) => e.kind() != ErrorKind::NotFound,
        },
        Err(_) => true,
    }
}

/// Turn a finished `pgrep -P` run into an answer.
///
/// Exit 0 with pids is "yes" unless `ignore` drops every pid. Exit 1 with no
/// output is a confident "no". Everything else means the tool did not behave
/// as expected.
pub fn interpret_pgrep(output: &ToolOutput, ignore: impl Fn(u32) -> bool) -> QueryResult<bool> {
    if output.truncated {
        return Err(QueryError::parse("pgrep", "output truncated"));
    }
    let stdout = output.stdout_str();
    match output.exit_code {
        Some(0) => {
            let pids = grammars::parse_pgrep(&stdout).map_err(|e| e.into_query("pgrep"))?;
            if pids.is_empty() {
                return Err(QueryError::parse("pgrep", "exit 0 without any pid"));
            }
            Ok(pids.into_iter().any(|p| !ignore(p)))
        }
        Some(1) if stdout.trim().is_empty() => Ok(false),
        Some(1) => Err(QueryError::parse("pgrep", "exit 1 with unexpected output")),
        code => Err(QueryError::parse(
            "pgrep",
            format!("unexpected exit {:?}: {}", code, output.stderr_head()),
        )),
    }
}
