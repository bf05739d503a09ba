//! macOS process enumeration through libproc.

use libproc::libproc::bsd_info::BSDInfo;
use libproc::libproc::proc_pid::{listpids, pidinfo, ProcType};
use pq_common::{ProcessRelation, QueryError, QueryResult, RelationTable};
use tracing::trace;

/// `pbi_status` value of an exited process its parent has not reaped.
const SZOMB: u32 = 5;

/// List every pid and read its parent from `proc_pidinfo(PROC_PIDTBSDINFO)`.
///
/// Pids that exit between the listing and the lookup are skipped.
pub(crate) fn enumerate() -> QueryResult<RelationTable> {
    let pids = listpids(ProcType::ProcAllPIDS)
        .map_err(|e| QueryError::backend_unavailable("native", format!("listpids: {e}")))?;

    if pids.is_empty() {
        return Err(QueryError::backend_unavailable(
            "native",
            "listpids returned no processes",
        ));
    }

    let mut relations = Vec::with_capacity(pids.len());
    for pid in pids {
        if pid == 0 {
            continue;
        }
        let info: BSDInfo = match pidinfo(pid as i32, 0) {
            Ok(info) => info,
            Err(e) => {
                trace!(pid, error = %e, "pidinfo failed, skipping");
                continue;
            }
        };
        if info.pbi_status == SZOMB {
            trace!(pid, "skipping zombie");
            continue;
        }
        if let Some(rel) = ProcessRelation::new(pid, info.pbi_ppid) {
            relations.push(rel);
        }
    }

    Ok(RelationTable::new(relations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pq_common::ProcessId;

    #[test]
    fn test_nomock_native_contains_self() {
        let table = enumerate().unwrap();
        let me = ProcessId::current();
        assert!(table.contains(me));
        assert!(table.parent_of(me).is_some());
    }
}
