//! Working directory resolution strategies.

use crate::collect::grammars::{self, LsofCwd};
use crate::collect::tool_runner::ToolRunner;
use crate::collect::{ensure_live, tool_error_to_query};
use clap::ValueEnum;
use pq_common::{ProcessId, QueryError, QueryResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::trace;

/// Suffix the kernel and lsof append to a removed directory.
const DELETED_SUFFIX: &str = " (deleted)";

/// Ways of answering "what is this process's working directory".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CwdStrategy {
    /// The platform default resolution.
    Generic,
    /// `lsof` open-file table, `cwd` descriptor.
    Lsof,
    /// `/proc/<pid>/cwd` symlink.
    #[value(name = "procfs")]
    #[serde(rename = "procfs")]
    ProcFs,
}

impl CwdStrategy {
    pub const ALL: [CwdStrategy; 3] = [CwdStrategy::Generic, CwdStrategy::Lsof, CwdStrategy::ProcFs];

    /// Order in which the platform default resolution tries backends.
    pub fn platform_order() -> &'static [CwdStrategy] {
        #[cfg(target_os = "linux")]
        {
            &[CwdStrategy::ProcFs, CwdStrategy::Lsof]
        }
        #[cfg(not(target_os = "linux"))]
        {
            &[CwdStrategy::Lsof]
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CwdStrategy::Generic => "generic",
            CwdStrategy::Lsof => "lsof",
            CwdStrategy::ProcFs => "procfs",
        }
    }
}

impl std::fmt::Display for CwdStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `readlink <proc_root>/<pid>/cwd`.
pub(crate) fn via_procfs(proc_root: &Path, pid: ProcessId) -> QueryResult<PathBuf> {
    if !proc_root.is_dir() {
        return Err(QueryError::backend_unavailable(
            "procfs",
            format!("{} is not mounted", proc_root.display()),
        ));
    }

    let link = proc_root.join(pid.to_string()).join("cwd");
    let target = match fs::read_link(&link) {
        Ok(target) => target,
        Err(e) => return Err(map_readlink_error(pid, &e)),
    };
    trace!(pid = %pid, target = %target.display(), "read cwd link");

    let raw = target.to_string_lossy();
    if let Some(gone) = deleted_target(&raw) {
        return Err(QueryError::Unavailable {
            pid: pid.get(),
            reason: format!("directory {gone} was deleted"),
        });
    }
    normalize_path(pid, &target, "procfs")
}

fn map_readlink_error(pid: ProcessId, e: &io::Error) -> QueryError {
    match e.kind() {
        io::ErrorKind::NotFound => QueryError::not_found(pid),
        io::ErrorKind::PermissionDenied => QueryError::permission_denied(pid, e.to_string()),
        _ if e.raw_os_error() == Some(libc::ESRCH) => QueryError::not_found(pid),
        _ if e.raw_os_error() == Some(libc::EINVAL) => {
            QueryError::parse("procfs", "cwd entry is not a symlink")
        }
        _ => QueryError::backend_unavailable("procfs", e.to_string()),
    }
}

/// `lsof -a -p <pid> -d cwd -Ffn`.
///
/// The descriptor field is requested explicitly; `-Fn` alone prints no `f`
/// line and the record could not be told apart from other descriptors.
pub(crate) fn via_lsof(runner: &ToolRunner, proc_root: &Path, pid: ProcessId) -> QueryResult<PathBuf> {
    let pid_arg = pid.to_string();
    let output = runner
        .run_tool("lsof", &["-a", "-p", &pid_arg, "-d", "cwd", "-Ffn"], None)
        .map_err(|e| tool_error_to_query("lsof", e))?;

    if output.truncated {
        return Err(QueryError::parse("lsof", "output truncated"));
    }

    let parsed = grammars::parse_lsof_cwd(&output.stdout_str()).map_err(|e| e.into_query("lsof"))?;
    match parsed {
        Some(LsofCwd::Path(raw)) => {
            if let Some(gone) = deleted_target(&raw) {
                return Err(QueryError::Unavailable {
                    pid: pid.get(),
                    reason: format!("directory {gone} was deleted"),
                });
            }
            normalize_path(pid, Path::new(&raw), "lsof")
        }
        Some(LsofCwd::PermissionDenied(detail)) => Err(QueryError::permission_denied(pid, detail)),
        None => match output.exit_code {
            Some(0) | Some(1) => {
                // No record: the process is gone, a zombie, or hidden from lsof
                ensure_live(runner, proc_root, pid)?;
                Err(QueryError::permission_denied(
                    pid,
                    "lsof reported no cwd for a live process",
                ))
            }
            code => Err(QueryError::parse(
                "lsof",
                format!("unexpected exit {:?}: {}", code, output.stderr_head()),
            )),
        },
    }
}

/// `Some(original)` when `raw` names a directory removed after the process
/// entered it. A real directory whose name happens to end in the suffix is
/// left alone.
fn deleted_target(raw: &str) -> Option<&str> {
    let stripped = raw.strip_suffix(DELETED_SUFFIX)?;
    if Path::new(raw).exists() {
        return None;
    }
    Some(stripped)
}

/// Turn a raw backend answer into a canonical absolute path.
///
/// Symlinks are resolved and trailing separators dropped. A directory that no
/// longer exists is `Unavailable`. When the caller may not traverse the
/// path, the answer is normalized lexically instead.
pub fn normalize_path(pid: ProcessId, raw: &Path, backend: &str) -> QueryResult<PathBuf> {
    if !raw.is_absolute() {
        return Err(QueryError::parse(
            backend,
            format!("expected an absolute path, got {:?}", raw),
        ));
    }

    match fs::canonicalize(raw) {
        Ok(path) => Ok(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(QueryError::Unavailable {
            pid: pid.get(),
            reason: format!("{} no longer exists", raw.display()),
        }),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            trace!(path = %raw.display(), "cannot canonicalize, normalizing lexically");
            Ok(lexical_normalize(raw))
        }
        Err(e) => Err(QueryError::backend_unavailable(
            backend,
            format!("cannot canonicalize {}: {e}", raw.display()),
        )),
    }
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pq_common::ErrorKind;
    use crate::test_utils::pid;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn fake_proc_with_cwd(pid: u32, target: &Path) -> TempDir {
        let root = TempDir::new().unwrap();
        let pid_dir = root.path().join(pid.to_string());
        fs::create_dir_all(&pid_dir).unwrap();
        symlink(target, pid_dir.join("cwd")).unwrap();
        root
    }

    #[test]
    fn test_normalize_resolves_symlinks_and_trailing_separator() {
        let dir = TempDir::new().unwrap();
        let real = dir.path().join("real");
        fs::create_dir(&real).unwrap();
        let link = dir.path().join("link");
        symlink(&real, &link).unwrap();

        let with_slash = PathBuf::from(format!("{}/", link.display()));
        let got = normalize_path(pid(1), &with_slash, "test").unwrap();
        assert_eq!(got, fs::canonicalize(&real).unwrap());
    }

    #[test]
    fn test_normalize_rejects_relative() {
        let err = normalize_path(pid(1), Path::new("relative/dir"), "lsof").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);
    }

    #[test]
    fn test_normalize_vanished_is_unavailable() {
        let err = normalize_path(pid(7), Path::new("/definitely/gone/dir"), "procfs")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }

    #[test]
    fn test_lexical_normalize() {
        assert_eq!(
            lexical_normalize(Path::new("/a/./b/../c/")),
            PathBuf::from("/a/c")
        );
    }

    #[test]
    fn test_deleted_target() {
        assert_eq!(deleted_target("/tmp/x (deleted)"), Some("/tmp/x"));
        assert_eq!(deleted_target("/tmp/x"), None);

        let dir = TempDir::new().unwrap();
        let odd = dir.path().join("weird (deleted)");
        fs::create_dir(&odd).unwrap();
        assert_eq!(deleted_target(&odd.to_string_lossy()), None);
    }

    #[test]
    fn test_procfs_reads_link() {
        let target = TempDir::new().unwrap();
        let root = fake_proc_with_cwd(4242, target.path());
        let got = via_procfs(root.path(), pid(4242)).unwrap();
        assert_eq!(got, fs::canonicalize(target.path()).unwrap());
    }

    #[test]
    fn test_procfs_missing_pid_is_not_found() {
        let root = TempDir::new().unwrap();
        assert_eq!(
            via_procfs(root.path(), pid(5)),
            Err(QueryError::not_found(5u32))
        );
    }

    #[test]
    fn test_procfs_deleted_dir_is_unavailable() {
        let root = fake_proc_with_cwd(9, Path::new("/srv/build-123 (deleted)"));
        let err = via_procfs(root.path(), pid(9)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }

    #[test]
    fn test_procfs_missing_root_is_backend_unavailable() {
        let err = via_procfs(Path::new("/definitely/not/proc"), pid(1)).unwrap_err();
        assert!(err.is_fallback_eligible());
    }

    #[test]
    fn test_procfs_non_symlink_is_parse_error() {
        let root = TempDir::new().unwrap();
        let pid_dir = root.path().join("3");
        fs::create_dir_all(&pid_dir).unwrap();
        fs::write(pid_dir.join("cwd"), "not a link").unwrap();
        let err = via_procfs(root.path(), pid(3)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_nomock_procfs_self() {
        let got = via_procfs(Path::new("/proc"), ProcessId::current()).unwrap();
        assert_eq!(got, fs::canonicalize(std::env::current_dir().unwrap()).unwrap());
    }

    #[test]
    fn test_nomock_lsof_self() {
        if !crate::capabilities::get_capabilities().tools.lsof.available {
            return;
        }
        let runner = crate::config::QueryConfig::default().tool_runner();
        let got = via_lsof(&runner, Path::new("/proc"), ProcessId::current()).unwrap();
        assert_eq!(got, fs::canonicalize(std::env::current_dir().unwrap()).unwrap());
    }

    #[test]
    fn test_platform_order_excludes_generic() {
        assert!(!CwdStrategy::platform_order().contains(&CwdStrategy::Generic));
        assert!(CwdStrategy::platform_order().contains(&CwdStrategy::Lsof));
    }
}
