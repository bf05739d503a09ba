//! Process queries.
//!
//! Two questions are answered about a process handle:
//! - Does it currently have at least one live child?
//! - What is its current working directory?
//!
//! Each question has several strategies. The platform-default query tries
//! them in a fixed order, skipping backends capability detection found
//! missing, and only moves on when a strategy fails for tooling reasons
//! (`BackendUnavailable`, `ParseError`). Answers about the process itself
//! (not found, permission denied, deleted directory) and timeouts are
//! returned as soon as one strategy produces them.

pub mod cwd;
pub mod subprocess;

pub use cwd::{normalize_path, CwdStrategy};
pub use subprocess::{interpret_pgrep, SubprocessStrategy};

use crate::capabilities::{get_capabilities, Capabilities};
use crate::collect::relations::{self, RelationSource};
use crate::collect::tool_runner::ToolRunner;
use crate::config::QueryConfig;
use crate::logging::event_names;
use pq_common::{ProcessId, QueryError, QueryResult, RelationTable};
use std::borrow::Cow;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// Entry point for process queries.
///
/// Holds the configuration, the allowlisted runner, and the capability
/// snapshot. It keeps no per-process state, so one instance can be shared by
/// reference across threads.
#[derive(Debug, Clone)]
pub struct Introspector {
    config: QueryConfig,
    runner: ToolRunner,
    caps: Cow<'static, Capabilities>,
}

impl Default for Introspector {
    fn default() -> Self {
        Self::new(QueryConfig::default())
    }
}

impl Introspector {
    /// Build an introspector over the host's detected capabilities.
    pub fn new(config: QueryConfig) -> Self {
        let runner = config.tool_runner();
        Self {
            config,
            runner,
            caps: Cow::Borrowed(get_capabilities()),
        }
    }

    /// Build an introspector over an explicit capability snapshot.
    pub fn with_capabilities(config: QueryConfig, caps: Capabilities) -> Self {
        let runner = config.tool_runner();
        Self {
            config,
            runner,
            caps: Cow::Owned(caps),
        }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    /// Whether `pid` has at least one live child, using the platform order.
    #[instrument(skip(self), fields(stage = "detect", pid = %pid))]
    pub fn has_subprocesses(&self, pid: ProcessId) -> QueryResult<bool> {
        self.run_ordered(
            SubprocessStrategy::platform_order(),
            pid,
            |s| self.subprocess_gate(s),
            |s| self.detect(s, pid),
        )
    }

    /// Whether `pid` has at least one live child, using exactly one strategy.
    #[instrument(skip(self), fields(stage = "detect", pid = %pid, strategy = %strategy))]
    pub fn has_subprocesses_via(
        &self,
        strategy: SubprocessStrategy,
        pid: ProcessId,
    ) -> QueryResult<bool> {
        self.detect(strategy, pid)
    }

    /// Canonical working directory of `pid`, using the platform order.
    #[instrument(skip(self), fields(stage = "resolve", pid = %pid))]
    pub fn working_directory(&self, pid: ProcessId) -> QueryResult<PathBuf> {
        self.run_ordered(
            CwdStrategy::platform_order(),
            pid,
            |s| self.cwd_gate(s),
            |s| self.resolve(s, pid),
        )
    }

    /// Canonical working directory of `pid` from one strategy.
    ///
    /// `Generic` is the platform-default resolution and may fall back.
    #[instrument(skip(self), fields(stage = "resolve", pid = %pid, strategy = %strategy))]
    pub fn working_directory_via(
        &self,
        strategy: CwdStrategy,
        pid: ProcessId,
    ) -> QueryResult<PathBuf> {
        match strategy {
            CwdStrategy::Generic => self.working_directory(pid),
            other => self.resolve(other, pid),
        }
    }

    /// Capture the parent relation of every live process.
    pub fn list_relations(&self, source: RelationSource) -> QueryResult<RelationTable> {
        relations::list_relations(source, &self.runner, &self.config.proc_root)
    }

    /// Run every subprocess strategy and report each answer.
    ///
    /// Strategies the host lacks are reported as `BackendUnavailable`
    /// without being attempted.
    pub fn has_subprocesses_all(
        &self,
        pid: ProcessId,
    ) -> Vec<(SubprocessStrategy, QueryResult<bool>)> {
        SubprocessStrategy::ALL
            .iter()
            .map(|&s| {
                let result = self.subprocess_gate(s).and_then(|()| self.detect(s, pid));
                (s, result)
            })
            .collect()
    }

    /// Run every concrete working directory strategy and report each answer.
    pub fn working_directory_all(
        &self,
        pid: ProcessId,
    ) -> Vec<(CwdStrategy, QueryResult<PathBuf>)> {
        [CwdStrategy::ProcFs, CwdStrategy::Lsof]
            .iter()
            .map(|&s| {
                let result = self.cwd_gate(s).and_then(|()| self.resolve(s, pid));
                (s, result)
            })
            .collect()
    }

    fn detect(&self, strategy: SubprocessStrategy, pid: ProcessId) -> QueryResult<bool> {
        subprocess::detect(
            strategy,
            &self.runner,
            &self.config.proc_root,
            self.caps.pgrep_runstates,
            pid,
        )
    }

    fn resolve(&self, strategy: CwdStrategy, pid: ProcessId) -> QueryResult<PathBuf> {
        match strategy {
            CwdStrategy::ProcFs => cwd::via_procfs(&self.config.proc_root, pid),
            CwdStrategy::Lsof => cwd::via_lsof(&self.runner, &self.config.proc_root, pid),
            CwdStrategy::Generic => Err(QueryError::backend_unavailable(
                "generic",
                "generic resolution has no backend of its own",
            )),
        }
    }

    /// A relocated proc root is trusted as given; detection only looked at
    /// the real one.
    fn procfs_usable(&self) -> bool {
        !self.config.uses_default_proc_root() || self.caps.data_sources.procfs
    }

    fn subprocess_gate(&self, strategy: SubprocessStrategy) -> QueryResult<()> {
        let (usable, backend) = match strategy {
            SubprocessStrategy::Generic => (self.caps.tools.ps.usable(), "ps"),
            SubprocessStrategy::ProcessGroup => (self.caps.tools.pgrep.usable(), "pgrep"),
            SubprocessStrategy::Native => (self.caps.data_sources.native_api, "native"),
            SubprocessStrategy::ProcFs => (self.procfs_usable(), "procfs"),
        };
        gate(usable, backend)
    }

    fn cwd_gate(&self, strategy: CwdStrategy) -> QueryResult<()> {
        match strategy {
            CwdStrategy::Lsof => gate(self.caps.tools.lsof.usable(), "lsof"),
            CwdStrategy::ProcFs => gate(self.procfs_usable(), "procfs"),
            CwdStrategy::Generic => Ok(()),
        }
    }

    /// Try `order` until one strategy answers or fails for a reason that is
    /// about the process rather than the tooling.
    fn run_ordered<S, T>(
        &self,
        order: &[S],
        pid: ProcessId,
        gate: impl Fn(S) -> QueryResult<()>,
        attempt: impl Fn(S) -> QueryResult<T>,
    ) -> QueryResult<T>
    where
        S: Copy + Display,
    {
        let mut last_err: Option<QueryError> = None;

        for &strategy in order {
            if let Err(err) = gate(strategy) {
                debug!(
                    target: event_names::STRATEGY_SKIPPED,
                    pid = %pid,
                    strategy = %strategy,
                    reason = %err,
                    "strategy skipped"
                );
                last_err = Some(err);
                continue;
            }

            let started = Instant::now();
            match attempt(strategy) {
                Ok(answer) => {
                    debug!(
                        target: event_names::STRATEGY_ANSWERED,
                        pid = %pid,
                        strategy = %strategy,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "strategy answered"
                    );
                    return Ok(answer);
                }
                Err(err) if err.is_fallback_eligible() => {
                    warn!(
                        target: event_names::STRATEGY_FALLBACK,
                        pid = %pid,
                        strategy = %strategy,
                        kind = %err.kind(),
                        error = %err,
                        "strategy failed, trying next"
                    );
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        let err = last_err.unwrap_or_else(|| {
            QueryError::backend_unavailable("none", "no strategy exists for this platform")
        });
        warn!(
            target: event_names::STRATEGY_EXHAUSTED,
            pid = %pid,
            error = %err,
            "every strategy failed"
        );
        Err(err)
    }
}

fn gate(usable: bool, backend: &str) -> QueryResult<()> {
    if usable {
        Ok(())
    } else {
        Err(QueryError::backend_unavailable(
            backend,
            "not available on this host",
        ))
    }
}

fn default_introspector() -> &'static Introspector {
    static DEFAULT: OnceLock<Introspector> = OnceLock::new();
    DEFAULT.get_or_init(|| {
        let config = QueryConfig::from_env().unwrap_or_else(|e| {
            warn!(
                target: event_names::CONFIG_ERROR,
                error = %e,
                "ignoring invalid environment, using defaults"
            );
            QueryConfig::default()
        });
        Introspector::new(config)
    })
}

/// Whether `pid` has at least one live child.
///
/// Uses an introspector configured from the environment.
pub fn has_subprocesses(pid: ProcessId) -> QueryResult<bool> {
    default_introspector().has_subprocesses(pid)
}

/// Canonical working directory of `pid`.
///
/// Uses an introspector configured from the environment.
pub fn working_directory(pid: ProcessId) -> QueryResult<PathBuf> {
    default_introspector().working_directory(pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pq_common::ErrorKind;
    use crate::test_utils::pid;
    use std::fs;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_introspector_is_send_sync() {
        assert_send_sync::<Introspector>();
    }

    fn fake_proc(entries: &[(u32, &str)]) -> TempDir {
        let root = TempDir::new().unwrap();
        for (pid, stat) in entries {
            let dir = root.path().join(pid.to_string());
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("stat"), stat).unwrap();
        }
        root
    }

    fn procfs_only(root: &TempDir) -> Introspector {
        Introspector::with_capabilities(
            QueryConfig::default().with_proc_root(root.path()),
            Capabilities::none(),
        )
    }

    #[test]
    fn test_nothing_available_is_backend_unavailable() {
        let intro =
            Introspector::with_capabilities(QueryConfig::default(), Capabilities::none());
        let me = ProcessId::current();
        assert_eq!(
            intro.has_subprocesses(me).unwrap_err().kind(),
            ErrorKind::BackendUnavailable
        );
        assert_eq!(
            intro.working_directory(me).unwrap_err().kind(),
            ErrorKind::BackendUnavailable
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_relocated_proc_root_answers() {
        let root = fake_proc(&[
            (1, "1 (init) S 0 1 1"),
            (10, "10 (shell) S 1 10 10"),
            (11, "11 (sleep 5) S 10 10 10"),
        ]);
        let intro = procfs_only(&root);
        assert!(intro.has_subprocesses(pid(10)).unwrap());
        assert!(!intro.has_subprocesses(pid(11)).unwrap());
        assert_eq!(
            intro.has_subprocesses(pid(99)),
            Err(QueryError::not_found(99u32))
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_zombie_child_is_not_counted() {
        let root = fake_proc(&[
            (1, "1 (init) S 0 1 1"),
            (10, "10 (shell) S 1 10 10"),
            (11, "11 (defunct) Z 10 10 10"),
        ]);
        assert!(!procfs_only(&root).has_subprocesses(pid(10)).unwrap());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_target_error_stops_fallback() {
        let root = fake_proc(&[]);
        let dir = root.path().join("5");
        fs::create_dir_all(&dir).unwrap();
        symlink("/gone/away (deleted)", dir.join("cwd")).unwrap();

        let err = procfs_only(&root).working_directory(pid(5)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }

    #[test]
    fn test_generic_cwd_via_orchestrates() {
        let intro =
            Introspector::with_capabilities(QueryConfig::default(), Capabilities::none());
        let err = intro
            .working_directory_via(CwdStrategy::Generic, ProcessId::current())
            .unwrap_err();
        assert!(err.is_fallback_eligible());
    }

    #[test]
    fn test_all_reports_every_strategy() {
        let intro =
            Introspector::with_capabilities(QueryConfig::default(), Capabilities::none());
        let report = intro.has_subprocesses_all(ProcessId::current());
        assert_eq!(report.len(), SubprocessStrategy::ALL.len());
        assert!(report
            .iter()
            .all(|(_, r)| r.as_ref().unwrap_err().kind() == ErrorKind::BackendUnavailable));
    }

    #[test]
    fn test_free_functions_answer_for_self() {
        let me = ProcessId::current();
        let caps = get_capabilities();
        let cwd_backend =
            (cfg!(target_os = "linux") && caps.data_sources.procfs) || caps.tools.lsof.usable();
        let child_backend = SubprocessStrategy::platform_order()
            .iter()
            .any(|&s| default_introspector().subprocess_gate(s).is_ok());

        match working_directory(me) {
            Ok(dir) => {
                assert_eq!(dir, fs::canonicalize(std::env::current_dir().unwrap()).unwrap())
            }
            Err(e) => {
                assert!(!cwd_backend, "cwd of self failed with a backend present: {e}");
                assert_eq!(e.kind(), ErrorKind::BackendUnavailable);
            }
        }
        match has_subprocesses(me) {
            Ok(_) => {}
            Err(e) => {
                assert!(!child_backend, "subprocess query of self failed: {e}");
                assert_eq!(e.kind(), ErrorKind::BackendUnavailable);
            }
        }
    }
}
