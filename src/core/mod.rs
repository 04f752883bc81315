//! Core domain models for loopsmith.
//!
//! Work items, the dependency map derived from their text, and the
//! analyzer that extracts id and file references.

pub mod analyzer;
pub mod dag;
pub mod task;

pub use analyzer::{
    build_dependency_map, conflicts, extract_file_references, extract_referenced_ids, Analyzer,
    CONFLICT_THRESHOLD,
};
pub use dag::DependencyMap;
pub use task::{Backlog, WorkItem};
