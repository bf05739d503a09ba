//! Output grammars for the diagnostic backends.
//!
//! Each decoder is pure: text in, structured facts out. None of them touch the
//! filesystem or spawn anything, so they are exercised directly by fixture
//! tests, property tests, benches, and fuzz targets.
//!
//! Malformed-input policy differs per grammar:
//! - `ps` rows: malformed rows are skipped and counted
//! - `pgrep` lines: strict, any non-numeric line fails the whole parse
//! - `/proc/<pid>/stat`: one record per call, fails per record
//! - `lsof -F`: strict

use pq_common::QueryError;
use thiserror::Error;

/// Errors raised by the grammars.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrammarError {
    #[error("empty input")]
    Empty,

    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("no usable rows in {total} lines")]
    NoRows { total: usize },
}

impl GrammarError {
    /// Lift into the public error type, attributing the failure to `backend`.
    pub fn into_query(self, backend: &str) -> QueryError {
        QueryError::parse(backend, self.to_string())
    }
}

// ---------------------------------------------------------------------------
// ps -A -o pid= -o ppid= -o stat=
// ---------------------------------------------------------------------------

/// One row of the process table dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PsRow {
    pub pid: u32,
    pub ppid: u32,
    /// First character of the `stat` column, `None` when the column is absent.
    pub state: Option<char>,
}

impl PsRow {
    pub fn is_zombie(&self) -> bool {
        self.state == Some('Z')
    }
}

/// Parsed process table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PsTable {
    pub rows: Vec<PsRow>,
    /// Lines that were not blank but could not be decoded.
    pub skipped: usize,
}

/// Parse the header-less `pid ppid stat` table produced by both procps and
/// BSD `ps`.
///
/// Rows whose pid equals their ppid (the BSD swapper, pid 0) are dropped.
pub fn parse_ps_table(output: &str) -> Result<PsTable, GrammarError> {
    let mut table = PsTable::default();
    let mut total = 0usize;

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        total += 1;

        // A header sneaks in when `=` suffixes are unsupported.
        if total == 1 && is_header_line(line) {
            continue;
        }

        match parse_ps_row(line) {
            Some(row) if row.pid != row.ppid => table.rows.push(row),
            Some(_) => {}
            None => table.skipped += 1,
        }
    }

    if total == 0 {
        return Err(GrammarError::Empty);
    }
    if table.rows.is_empty() {
        return Err(GrammarError::NoRows { total });
    }
    Ok(table)
}

fn parse_ps_row(line: &str) -> Option<PsRow> {
    let mut fields = line.split_whitespace();
    let pid: u32 = fields.next()?.parse().ok()?;
    let ppid: u32 = fields.next()?.parse().ok()?;
    let state = fields.next().and_then(|s| s.chars().next());
    if fields.next().is_some() {
        return None;
    }
    Some(PsRow { pid, ppid, state })
}

fn is_header_line(line: &str) -> bool {
    let mut parts = line.split_whitespace();
    matches!(
        (parts.next(), parts.next()),
        (Some("PID"), Some("PPID")) | (Some("pid"), Some("ppid"))
    )
}

// ---------------------------------------------------------------------------
// pgrep -P <pid>
// ---------------------------------------------------------------------------

/// Parse `pgrep` output: one positive pid per line.
///
/// Blank output is valid and means no match; whether that is a confident
/// "no" is decided by the caller from the exit status.
pub fn parse_pgrep(output: &str) -> Result<Vec<u32>, GrammarError> {
    let mut pids = Vec::new();
    for (idx, line) in output.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.parse::<u32>() {
            Ok(pid) if pid > 0 => pids.push(pid),
            _ => {
                return Err(GrammarError::Malformed {
                    line: idx + 1,
                    reason: format!("expected a pid, got {:?}", truncate(line, 64)),
                })
            }
        }
    }
    Ok(pids)
}

// ---------------------------------------------------------------------------
// /proc/<pid>/stat
// ---------------------------------------------------------------------------

/// The leading fields of a `/proc/<pid>/stat` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatRecord {
    pub pid: u32,
    pub comm: String,
    pub state: char,
    pub ppid: u32,
}

impl StatRecord {
    pub fn is_zombie(&self) -> bool {
        self.state == 'Z'
    }
}

/// Parse a stat record.
///
/// Format: `pid (comm) state ppid pgrp ...`. The command name may contain
/// spaces and parentheses, so it ends at the *last* `)`.
pub fn parse_stat_record(content: &str) -> Result<StatRecord, GrammarError> {
    let content = content.trim_end();
    if content.is_empty() {
        return Err(GrammarError::Empty);
    }

    let malformed = |reason: &str| GrammarError::Malformed {
        line: 1,
        reason: reason.to_string(),
    };

    let comm_start = content.find('(').ok_or_else(|| malformed("missing comm start"))?;
    let comm_end = content.rfind(')').ok_or_else(|| malformed("missing comm end"))?;
    if comm_end < comm_start {
        return Err(malformed("comm delimiters out of order"));
    }

    let pid: u32 = content[..comm_start]
        .trim()
        .parse()
        .map_err(|_| malformed("invalid pid"))?;
    let comm = content[comm_start + 1..comm_end].to_string();

    // Safely skip ") " after comm; truncated content must not panic
    let after_comm = content
        .get(comm_end + 2..)
        .ok_or_else(|| malformed("truncated after comm"))?;

    let mut fields = after_comm.split_whitespace();
    let state = fields
        .next()
        .and_then(|s| s.chars().next())
        .ok_or_else(|| malformed("missing state"))?;
    let ppid: u32 = fields
        .next()
        .ok_or_else(|| malformed("missing ppid"))?
        .parse()
        .map_err(|_| malformed("invalid ppid"))?;

    Ok(StatRecord {
        pid,
        comm,
        state,
        ppid,
    })
}

// ---------------------------------------------------------------------------
// lsof -a -p <pid> -d cwd -Ffn
// ---------------------------------------------------------------------------

/// What `lsof` reported for the `cwd` descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LsofCwd {
    /// Raw path as printed, not yet normalized.
    Path(String),
    /// lsof saw the descriptor but could not resolve it.
    PermissionDenied(String),
}

/// Parse `lsof -F` field output and return the `cwd` name.
///
/// Needs the `f` field, so the caller must ask for it (`-Ffn`). Returns
/// `Ok(None)` when the output holds no `cwd` record.
pub fn parse_lsof_cwd(output: &str) -> Result<Option<LsofCwd>, GrammarError> {
    let mut in_cwd = false;

    for (idx, line) in output.lines().enumerate() {
        if line.is_empty() {
            continue;
        }

        let mut chars = line.chars();
        let tag = chars.next().unwrap_or(' ');
        let value = chars.as_str();

        if !tag.is_ascii_alphabetic() {
            return Err(GrammarError::Malformed {
                line: idx + 1,
                reason: format!("not a field line: {:?}", truncate(line, 64)),
            });
        }

        match tag {
            'p' => in_cwd = false,
            'f' => in_cwd = value == "cwd",
            'n' if in_cwd => {
                if value.is_empty() {
                    return Err(GrammarError::Malformed {
                        line: idx + 1,
                        reason: "empty name for cwd".to_string(),
                    });
                }
                if is_denied_annotation(value) {
                    return Ok(Some(LsofCwd::PermissionDenied(value.to_string())));
                }
                return Ok(Some(LsofCwd::Path(value.to_string())));
            }
            _ => {}
        }
    }

    if in_cwd {
        return Err(GrammarError::Malformed {
            line: output.lines().count(),
            reason: "cwd descriptor without a name".to_string(),
        });
    }
    Ok(None)
}

fn is_denied_annotation(name: &str) -> bool {
    name.ends_with("(readlink: Permission denied)") || name.ends_with("(stat: Permission denied)")
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ps_linux_rows() {
        let out = "    1     0 Ss\n  812     1 S\n 4242   812 R+\n";
        let table = parse_ps_table(out).unwrap();
        assert_eq!(table.rows.len(), 3);
        assert_eq!(
            table.rows[2],
            PsRow {
                pid: 4242,
                ppid: 812,
                state: Some('R')
            }
        );
        assert_eq!(table.skipped, 0);
    }

    #[test]
    fn test_ps_drops_self_parent() {
        let table = parse_ps_table("0 0 Ss\n1 0 Ss\n").unwrap();
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].pid, 1);
    }

    #[test]
    fn test_ps_skips_malformed_rows() {
        let out = "1 0 Ss\ngarbage here\n7 1 S extra\n9 1 Z\n";
        let table = parse_ps_table(out).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.skipped, 2);
        assert!(table.rows[1].is_zombie());
    }

    #[test]
    fn test_ps_header_tolerated() {
        let table = parse_ps_table("  PID  PPID STAT\n    1     0 Ss\n").unwrap();
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn test_ps_without_state_column() {
        let table = parse_ps_table("1 0\n2 1\n").unwrap();
        assert_eq!(table.rows[1].state, None);
        assert!(!table.rows[1].is_zombie());
    }

    #[test]
    fn test_ps_empty_and_unusable() {
        assert_eq!(parse_ps_table(""), Err(GrammarError::Empty));
        assert_eq!(parse_ps_table("\n  \n"), Err(GrammarError::Empty));
        assert_eq!(
            parse_ps_table("usage: ps [-A]\n"),
            Err(GrammarError::NoRows { total: 1 })
        );
    }

    #[test]
    fn test_pgrep_lines() {
        assert_eq!(parse_pgrep("123\n456\n").unwrap(), vec![123, 456]);
        assert_eq!(parse_pgrep("").unwrap(), Vec::<u32>::new());
        assert_eq!(parse_pgrep("\n").unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn test_pgrep_strict() {
        match parse_pgrep("123\npgrep: invalid option\n") {
            Err(GrammarError::Malformed { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected Malformed, got {:?}", other),
        }
        assert!(parse_pgrep("0\n").is_err());
        assert!(parse_pgrep("-5\n").is_err());
    }

    #[test]
    fn test_stat_simple() {
        let rec = parse_stat_record("4242 (sleep) S 812 4242 812 0 -1 4194304").unwrap();
        assert_eq!(rec.pid, 4242);
        assert_eq!(rec.comm, "sleep");
        assert_eq!(rec.state, 'S');
        assert_eq!(rec.ppid, 812);
    }

    #[test]
    fn test_stat_comm_with_spaces_and_parens() {
        let rec = parse_stat_record("77 (my (weird) proc) R 1 77 77 0").unwrap();
        assert_eq!(rec.comm, "my (weird) proc");
        assert_eq!(rec.ppid, 1);
    }

    #[test]
    fn test_stat_zombie() {
        let rec = parse_stat_record("9 (defunct) Z 3 0 0").unwrap();
        assert!(rec.is_zombie());
    }

    #[test]
    fn test_stat_truncated() {
        assert!(parse_stat_record("12 (cat)").is_err());
        assert!(parse_stat_record("12 (cat) S").is_err());
        assert!(parse_stat_record("12 cat S 1").is_err());
        assert!(parse_stat_record("").is_err());
        assert!(parse_stat_record(") 1 (").is_err());
    }

    #[test]
    fn test_lsof_cwd_path() {
        let out = "p4242\nfcwd\nn/home/me/my project\n";
        assert_eq!(
            parse_lsof_cwd(out).unwrap(),
            Some(LsofCwd::Path("/home/me/my project".to_string()))
        );
    }

    #[test]
    fn test_lsof_cwd_denied() {
        let out = "p1\nfcwd\nn/proc/1/cwd (readlink: Permission denied)\n";
        assert!(matches!(
            parse_lsof_cwd(out).unwrap(),
            Some(LsofCwd::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_lsof_ignores_other_descriptors() {
        let out = "p5\nftxt\nn/usr/bin/sleep\nfcwd\nn/tmp\n";
        assert_eq!(
            parse_lsof_cwd(out).unwrap(),
            Some(LsofCwd::Path("/tmp".to_string()))
        );
    }

    #[test]
    fn test_lsof_no_records() {
        assert_eq!(parse_lsof_cwd("").unwrap(), None);
        assert_eq!(parse_lsof_cwd("p5\nftxt\nn/bin/sh\n").unwrap(), None);
    }

    #[test]
    fn test_lsof_malformed() {
        assert!(parse_lsof_cwd(" 123 garbage\n").is_err());
        assert!(parse_lsof_cwd("p5\nfcwd\n").is_err());
        assert!(parse_lsof_cwd("p5\nfcwd\nn\n").is_err());
    }

    #[test]
    fn test_into_query_is_parse_error() {
        let err = GrammarError::Empty.into_query("ps");
        assert!(err.is_fallback_eligible());
        assert_eq!(err.kind(), pq_common::ErrorKind::ParseError);
    }
}
