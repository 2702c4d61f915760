//! adjacency_closure — recursive closure relations over adjacency-list
//! tables.
//!
//! A self-referencing table (every row points at its parent) is queried as
//! a flat relation of ancestors or descendants, optionally including the
//! root itself, and that closure can be joined through an association to a
//! different table ("all roles granted to any descendant").
//!
//! # Layers
//!
//! - [`closure`] — the engine: traversal metadata, intermediate scopes,
//!   `WITH RECURSIVE` synthesis and the host-side iterative fallback
//! - [`relation`] — relations built on the engine: [`ClosureRelation`],
//!   [`ClosureJoinRelation`], existence predicates and batched eager loading
//! - [`storage`] — the seam to the database (SQLite and PostgreSQL provided)
//!
//! # Example
//!
//! ```no_run
//! use adjacency_closure::{ClosureRelation, HierarchyTable};
//!
//! # fn main() -> Result<(), adjacency_closure::ClosureError> {
//! let mut conn = rusqlite::Connection::open("app.db")?;
//! let users = HierarchyTable::new("users", "id", "parent_id").with_tombstone("deleted_at");
//! let descendants = ClosureRelation::descendants(users, 1)?
//!     .breadth_first()
//!     .get(&mut conn)?;
//! println!("{} descendants", descendants.len());
//! # Ok(())
//! # }
//! ```
//!
//! Cycles in the data are tolerated: a branch stops as soon as it would
//! revisit a row already on its path.

#![forbid(unsafe_code)]

pub mod closure;
pub mod config;
pub mod error;
pub mod query;
pub mod record;
pub mod relation;
pub mod sql;
pub mod storage;
pub mod table;

#[cfg(test)]
mod test_helpers;

pub use closure::{
    ClosureResult, ConditionScope, IntermediateScope, PathState, SoftDeletingScope, Trail,
    TraversalDirection,
};
pub use config::{ClosureConfig, ExecutionMode};
pub use error::{ClosureError, ClosureErrorKind};
pub use query::{Comparison, Condition, Operator, SortOrder};
pub use record::{Key, Record};
pub use relation::{
    BatchLoader, ClosureJoinRelation, ClosureRelation, EagerLoad, ExistenceQueryAdapter,
    ExistenceSource,
};
pub use sql::Dialect;
pub use storage::Storage;
pub use table::{HierarchyTable, JoinDefinition, TargetTable};
