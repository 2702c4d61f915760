//! The recursive closure engine.
//!
//! - [`path`] — traversal metadata and the synthesized path/depth columns
//! - [`scope`] — intermediate scopes applied to the recursive leg
//! - [`builder`] — `WITH RECURSIVE` synthesis
//! - [`executor`] — native or host-side iterative evaluation

pub mod builder;
pub mod executor;
pub mod path;
pub mod scope;

use crate::record::Record;

pub use builder::{RecursiveQueryBuilder, RecursiveQuerySpec, Roots};
pub use path::{PathState, Trail, TraversalDirection};
pub use scope::{ConditionScope, IntermediateScope, ScopeRegistry, ScopeSet, SoftDeletingScope};

/// Closure rows with their trails. `trails[i]` belongs to `records[i]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClosureResult {
    pub records: Vec<Record>,
    pub trails: Vec<Trail>,
}

impl ClosureResult {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Record, &Trail)> {
        self.records.iter().zip(self.trails.iter())
    }
}
