//! Parent/child relations produced by process enumeration.

use crate::id::ProcessId;
use serde::{Deserialize, Serialize};

/// A single (child, parent) fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessRelation {
    /// The process.
    pub pid: ProcessId,
    /// Its parent at capture time. `None` for roots reporting parent 0.
    pub ppid: Option<ProcessId>,
}

impl ProcessRelation {
    /// Build a relation from raw table values.
    ///
    /// Refuses a process that claims to be its own parent and a pid that is
    /// not a valid handle.
    pub fn new(pid: u32, ppid: u32) -> Option<Self> {
        if pid == ppid {
            return None;
        }
        let pid = ProcessId::try_from(pid).ok()?;
        Some(Self {
            pid,
            ppid: ProcessId::try_from(ppid).ok(),
        })
    }
}

/// All relations captured by one enumeration call.
///
/// Each process appears at most once as a child, so the child to parent
/// mapping stays a function.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationTable {
    relations: Vec<ProcessRelation>,
}

impl RelationTable {
    /// Build a table, dropping duplicate child entries (first one wins).
    pub fn new(relations: Vec<ProcessRelation>) -> Self {
        let mut seen = std::collections::HashSet::with_capacity(relations.len());
        let relations = relations
            .into_iter()
            .filter(|r| seen.insert(r.pid))
            .collect();
        Self { relations }
    }

    /// Whether `pid` was a live process when the table was captured.
    pub fn contains(&self, pid: ProcessId) -> bool {
        self.relations.iter().any(|r| r.pid == pid)
    }

    /// Whether any captured process has `pid` as its parent.
    pub fn has_children(&self, pid: ProcessId) -> bool {
        self.relations.iter().any(|r| r.ppid == Some(pid))
    }

    /// Direct children of `pid`, in capture order.
    pub fn children_of(&self, pid: ProcessId) -> Vec<ProcessId> {
        self.relations
            .iter()
            .filter(|r| r.ppid == Some(pid))
            .map(|r| r.pid)
            .collect()
    }

    /// Parent of `pid`, if it was captured and has one.
    pub fn parent_of(&self, pid: ProcessId) -> Option<ProcessId> {
        self.relations
            .iter()
            .find(|r| r.pid == pid)
            .and_then(|r| r.ppid)
    }

    /// A copy of the table without the given processes.
    ///
    /// Children of a removed process keep their parent link.
    pub fn without(&self, mut skip: impl FnMut(ProcessId) -> bool) -> RelationTable {
        RelationTable {
            relations: self
                .relations
                .iter()
                .filter(|r| !skip(r.pid))
                .copied()
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessRelation> {
        self.relations.iter()
    }
}

impl FromIterator<ProcessRelation> for RelationTable {
    fn from_iter<I: IntoIterator<Item = ProcessRelation>>(iter: I) -> Self {
        RelationTable::new(iter.into_iter().collect())
    }
}
