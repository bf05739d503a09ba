//! procquery common types, IDs, and errors.
//!
//! This crate provides the foundational types shared by pq-core:
//! - Validated process handles
//! - Parent/child relations and the relation table built from them
//! - The query error model with fallback eligibility
//! - Output format selection

pub mod error;
pub mod id;
pub mod output;
pub mod relation;

pub use error::{ErrorCategory, ErrorKind, QueryError, QueryResult};
pub use id::ProcessId;
pub use output::OutputFormat;
pub use relation::{ProcessRelation, RelationTable};
