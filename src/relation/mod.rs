//! Relations over a closure.
//!
//! - [`closure::ClosureRelation`] — ancestors / descendants (and-self) of
//!   one or more roots
//! - [`closure_join::ClosureJoinRelation`] — targets reached from any
//!   closure member through an association
//! - [`existence::ExistenceQueryAdapter`] — correlated `EXISTS` / count
//!   predicates
//! - [`batch::BatchLoader`] — eager loading for many roots in one statement

pub mod batch;
pub mod closure;
pub mod closure_join;
pub mod existence;

use std::collections::BTreeSet;

use crate::error::ClosureError;
use crate::record::Record;
use crate::sql::quote_ident;

pub use batch::{BatchLoader, EagerLoad};
pub use closure::ClosureRelation;
pub use closure_join::ClosureJoinRelation;
pub use existence::{ExistenceQueryAdapter, ExistenceSource};

/// Write applied to the rows selected by a keys subquery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Mutation {
    /// `SET` list.
    Update(String),
    Delete,
}

impl Mutation {
    pub(crate) fn statement(&self, table: &str, key_column: &str, keys: &str) -> String {
        let target = quote_ident(table);
        let filter = format!("{target}.{} IN (\n{keys}\n)", quote_ident(key_column));
        match self {
            Mutation::Update(set) => format!("UPDATE {target} SET {set}\nWHERE {filter}"),
            Mutation::Delete => format!("DELETE FROM {target}\nWHERE {filter}"),
        }
    }
}

/// Keep the first row per key, then at most `limit` rows.
pub(crate) fn distinct_by_key(
    rows: impl IntoIterator<Item = Record>,
    key_column: &str,
    limit: Option<u64>,
) -> Result<Vec<Record>, ClosureError> {
    let limit = limit.map_or(usize::MAX, |n| usize::try_from(n).unwrap_or(usize::MAX));
    let mut seen = BTreeSet::new();
    let mut records = Vec::new();
    for record in rows {
        if records.len() >= limit {
            break;
        }
        if seen.insert(record.key(key_column)?) {
            records.push(record);
        }
    }
    Ok(records)
}

/// Tombstone value written by soft deletes.
pub(crate) fn tombstone_now() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
