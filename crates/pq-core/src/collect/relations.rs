//! Process relation enumeration.
//!
//! Produces the (process, parent) table visible on the host from exactly one
//! backend per call. Processes that vanish between listing and reading are
//! skipped, and unreaped zombies are never reported as live processes.
//!
//! The diagnostics this process runs (including the `ps` that produced the
//! table) are left out, so they never show up as the caller's children.

use super::grammars::{self, GrammarError};
use super::tool_runner::{diagnostic_pids_since, ToolRunner};
use super::tool_error_to_query;
use clap::ValueEnum;
use pq_common::{ProcessRelation, QueryError, QueryResult, RelationTable};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, instrument, trace};

/// Arguments for a header-less `pid ppid stat` table of every process.
pub const PS_ARGS: &[&str] = &["-A", "-o", "pid=", "-o", "ppid=", "-o", "stat="];

/// Where relations come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RelationSource {
    /// Generic table dump via `ps`.
    #[value(name = "ps")]
    #[serde(rename = "ps")]
    PsTable,
    /// Platform process API (libproc on macOS).
    Native,
    /// `/proc/<pid>/stat` walk.
    #[value(name = "procfs")]
    ProcFs,
}

impl RelationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationSource::PsTable => "ps",
            RelationSource::Native => "native",
            RelationSource::ProcFs => "procfs",
        }
    }
}

impl std::fmt::Display for RelationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enumerate relations from one backend.
#[instrument(skip(runner, proc_root), fields(source = %source))]
pub fn list_relations(
    source: RelationSource,
    runner: &ToolRunner,
    proc_root: &Path,
) -> QueryResult<RelationTable> {
    let table = match source {
        RelationSource::PsTable => relations_from_ps(runner)?,
        RelationSource::Native => relations_from_native()?,
        RelationSource::ProcFs => relations_from_procfs(proc_root)?,
    };
    debug!(source = %source, relations = table.len(), "enumeration complete");
    Ok(table)
}

/// Run `ps` and decode its table.
pub fn relations_from_ps(runner: &ToolRunner) -> QueryResult<RelationTable> {
    let since = Instant::now();
    let output = runner
        .run_tool("ps", PS_ARGS, None)
        .map_err(|e| tool_error_to_query("ps", e))?;

    if !output.success() {
        return Err(QueryError::backend_unavailable(
            "ps",
            format!("exited with {:?}: {}", output.exit_code, output.stderr_head()),
        ));
    }
    if output.truncated {
        return Err(QueryError::parse("ps", "process table truncated"));
    }

    let table = relations_from_ps_text(&output.stdout_str())?;
    let ps_pid = output.pid;
    Ok(without_diagnostics(table, since, |pid| pid == ps_pid))
}

/// Drop the diagnostics this process ran since `since`, plus `also`.
fn without_diagnostics(
    table: RelationTable,
    since: Instant,
    also: impl Fn(u32) -> bool,
) -> RelationTable {
    let spawned = diagnostic_pids_since(since);
    let trimmed = table.without(|pid| also(pid.get()) || spawned.contains(&pid.get()));
    if trimmed.len() != table.len() {
        trace!(dropped = table.len() - trimmed.len(), "left out diagnostic processes");
    }
    trimmed
}

/// Decode a `ps` table into relations, dropping zombies.
pub fn relations_from_ps_text(text: &str) -> QueryResult<RelationTable> {
    let table = grammars::parse_ps_table(text).map_err(|e| e.into_query("ps"))?;
    if table.skipped > 0 {
        debug!(skipped = table.skipped, "skipped malformed ps rows");
    }
    Ok(table
        .rows
        .iter()
        .filter(|row| !row.is_zombie())
        .filter_map(|row| ProcessRelation::new(row.pid, row.ppid))
        .collect())
}

/// Walk `<proc_root>/<pid>/stat`.
pub fn relations_from_procfs(proc_root: &Path) -> QueryResult<RelationTable> {
    let since = Instant::now();
    let entries = match fs::read_dir(proc_root) {
        Ok(entries) => entries,
        Err(e) => {
            return Err(QueryError::backend_unavailable(
                "procfs",
                format!("cannot list {}: {}", proc_root.display(), e),
            ))
        }
    };

    let mut relations = Vec::new();
    let mut saw_pid_dir = false;

    for entry in entries.flatten() {
        let pid: u32 = match entry.file_name().to_str().and_then(|s| s.parse().ok()) {
            Some(pid) => pid,
            None => continue,
        };
        saw_pid_dir = true;

        match read_stat(proc_root, pid) {
            Ok(Some(record)) => {
                if record.is_zombie() {
                    trace!(pid, "skipping zombie");
                    continue;
                }
                if let Some(rel) = ProcessRelation::new(record.pid, record.ppid) {
                    relations.push(rel);
                }
            }
            Ok(None) => trace!(pid, "process vanished during walk"),
            Err(e) => trace!(pid, error = %e, "skipping unreadable stat record"),
        }
    }

    if !saw_pid_dir {
        return Err(QueryError::backend_unavailable(
            "procfs",
            format!("no process entries under {}", proc_root.display()),
        ));
    }

    Ok(without_diagnostics(RelationTable::new(relations), since, |_| false))
}

/// Read and decode one stat record. `Ok(None)` when the process is gone.
fn read_stat(proc_root: &Path, pid: u32) -> Result<Option<grammars::StatRecord>, GrammarError> {
    let path = proc_root.join(pid.to_string()).join("stat");
    match fs::read_to_string(&path) {
        Ok(content) => grammars::parse_stat_record(&content).map(Some),
        Err(e) if vanished(&e) => Ok(None),
        Err(e) => Err(GrammarError::Malformed {
            line: 0,
            reason: e.to_string(),
        }),
    }
}

fn vanished(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::NotFound || e.raw_os_error() == Some(libc::ESRCH)
}

/// Enumerate through the platform process API.
#[cfg(target_os = "macos")]
pub fn relations_from_native() -> QueryResult<RelationTable> {
    let since = Instant::now();
    let table = super::native::enumerate()?;
    Ok(without_diagnostics(table, since, |_| false))
}

/// Enumerate through the platform process API.
#[cfg(not(target_os = "macos"))]
pub fn relations_from_native() -> QueryResult<RelationTable> {
    Err(QueryError::backend_unavailable(
        "native",
        format!("no native process API on {}", std::env::consts::OS),
    ))
}
