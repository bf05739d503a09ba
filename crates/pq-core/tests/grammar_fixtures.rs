//! Grammar tests against captured tool output.
//!
//! Each fixture is what a real tool printed on one platform variant.

use pq_common::{ErrorKind, ProcessId};
use pq_core::collect::grammars::{
    parse_lsof_cwd, parse_pgrep, parse_ps_table, parse_stat_record, LsofCwd,
};
use pq_core::collect::relations::relations_from_ps_text;
use std::path::Path;

fn fixture(name: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("cannot read fixture {}: {}", path.display(), e))
}

fn pid(raw: u32) -> ProcessId {
    ProcessId::try_from(raw).unwrap()
}

mod ps {
    use super::*;

    #[test]
    fn procps_table() {
        let table = parse_ps_table(&fixture("ps_linux.txt")).unwrap();
        assert_eq!(table.rows.len(), 7);
        assert_eq!(table.skipped, 0);
        assert!(table.rows.iter().any(|r| r.pid == 4250 && r.is_zombie()));
    }

    #[test]
    fn bsd_table_with_header() {
        let table = parse_ps_table(&fixture("ps_macos.txt")).unwrap();
        assert_eq!(table.rows.len(), 6);
        assert_eq!(table.rows[0].pid, 1);
    }

    #[test]
    fn relations_drop_zombies() {
        let relations = relations_from_ps_text(&fixture("ps_linux.txt")).unwrap();
        assert!(!relations.contains(pid(4250)));
        assert_eq!(relations.children_of(pid(4242)), vec![pid(4243)]);
        assert!(relations.has_children(pid(901)));
        assert!(!relations.has_children(pid(4243)));
    }

    #[test]
    fn bsd_relations() {
        let relations = relations_from_ps_text(&fixture("ps_macos.txt")).unwrap();
        assert_eq!(relations.parent_of(pid(5121)), Some(pid(5120)));
        assert_eq!(relations.children_of(pid(5120)), vec![pid(5121)]);
    }
}

mod pgrep {
    use super::*;

    #[test]
    fn children_list() {
        assert_eq!(
            parse_pgrep(&fixture("pgrep_children.txt")).unwrap(),
            vec![4243, 4251]
        );
    }
}

mod stat {
    use super::*;

    #[test]
    fn comm_with_nested_parens() {
        let record = parse_stat_record(&fixture("proc_stat_parens.txt")).unwrap();
        assert_eq!(record.comm, "tmux: server (main)");
        assert_eq!(record.ppid, 901);
        assert_eq!(record.state, 'S');
    }

    #[test]
    fn comm_with_spaces() {
        let record = parse_stat_record(&fixture("proc_stat_spaces.txt")).unwrap();
        assert_eq!(record.comm, "Web Content");
        assert_eq!(record.pid, 4243);
        assert_eq!(record.ppid, 4242);
    }

    #[test]
    fn zombie_record() {
        let record = parse_stat_record(&fixture("proc_stat_zombie.txt")).unwrap();
        assert!(record.is_zombie());
    }
}

mod lsof {
    use super::*;

    #[test]
    fn path_with_spaces_and_parens_survives() {
        assert_eq!(
            parse_lsof_cwd(&fixture("lsof_cwd_spaces.txt")).unwrap(),
            Some(LsofCwd::Path("/tmp/My Projects/build (1)".to_string()))
        );
    }

    #[test]
    fn denied_annotation() {
        match parse_lsof_cwd(&fixture("lsof_cwd_denied.txt")).unwrap() {
            Some(LsofCwd::PermissionDenied(detail)) => {
                assert!(detail.contains("Permission denied"))
            }
            other => panic!("expected PermissionDenied, got {:?}", other),
        }
    }

    #[test]
    fn dangling_cwd_descriptor_is_rejected() {
        let err = parse_lsof_cwd("p4242\nfcwd\n").unwrap_err();
        assert_eq!(err.into_query("lsof").kind(), ErrorKind::ParseError);
    }

    #[test]
    fn name_only_output_has_no_cwd_record() {
        // `-Fn` without `f` prints only the process and name lines
        assert_eq!(parse_lsof_cwd("p4242\nn/tmp\n").unwrap(), None);
    }

    #[test]
    fn process_without_cwd_record() {
        assert_eq!(parse_lsof_cwd("p4242\nftxt\nn/usr/bin/bash\n").unwrap(), None);
    }
}
