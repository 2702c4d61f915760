//! Correlated existence predicates.
//!
//! A relation used as a filter becomes a subquery that carries its own
//! closure CTE:
//!
//! ```sql
//! EXISTS (
//! WITH RECURSIVE "__closure_tree_2" AS (... seeded from every row ...)
//! SELECT 1
//! FROM "__closure_tree_2" AS "__closure_hash_1"
//! WHERE "__closure_hash_1"."__closure_root" = "users"."id"
//!   AND ...
//! )
//! ```
//!
//! The CTE is seeded from every row of the hierarchy table and the subquery
//! keeps only the rows whose root is the outer row. Outer references stay
//! out of the CTE body, and the table and CTE get fresh aliases, so the
//! outer query may itself be the hierarchy table (or a closure over it)
//! without name collisions and without its scopes reaching the inner
//! traversal.

use std::fmt;

use tracing::debug;

use crate::error::ClosureError;
use crate::query::Comparison;
use crate::record::Record;
use crate::sql::{BuildContext, Dialect, qualified, quote_ident, where_clause};
use crate::storage::Storage;
use crate::table::HierarchyTable;

/// A relation that can be rendered as a predicate over an outer hierarchy
/// row.
pub trait ExistenceSource: fmt::Debug + Send + Sync {
    /// Predicate over the outer row named `outer_alias`, true when the
    /// relation of that row yields a number of rows satisfying
    /// `comparison`.
    fn existence_predicate(
        &self,
        cx: &mut BuildContext,
        outer_alias: &str,
        comparison: Comparison,
    ) -> Result<String, ClosureError>;
}

/// Entry points for hosts that assemble their own queries.
pub struct ExistenceQueryAdapter;

impl ExistenceQueryAdapter {
    /// Render `source` as a predicate over `outer_alias`.
    pub fn predicate(
        source: &dyn ExistenceSource,
        dialect: Dialect,
        outer_alias: &str,
        comparison: Comparison,
    ) -> Result<String, ClosureError> {
        let mut cx = BuildContext::new(dialect, true);
        source.existence_predicate(&mut cx, outer_alias, comparison)
    }

    /// Rows of `table` matching `source` `comparison` times, ordered by
    /// key. Tombstoned rows of `table` are excluded.
    pub fn select_where<S: Storage + ?Sized>(
        storage: &mut S,
        table: &HierarchyTable,
        source: &dyn ExistenceSource,
        comparison: Comparison,
    ) -> Result<Vec<Record>, ClosureError> {
        if !storage.supports_recursive_queries() {
            return Err(ClosureError::Unsupported(
                "existence predicates need a storage engine with recursive queries".into(),
            ));
        }
        let alias = table.name.as_str();
        let mut filters = Vec::new();
        if let Some(column) = &table.tombstone_column {
            filters.push(format!("{} IS NULL", qualified(alias, column)));
        }
        filters.push(Self::predicate(source, storage.dialect(), alias, comparison)?);

        let sql = format!(
            "SELECT {}.*\nFROM {}{}\nORDER BY {}",
            quote_ident(alias),
            quote_ident(alias),
            where_clause(&filters),
            qualified(alias, &table.key_column)
        );
        debug!(sql = %sql, "existence select");
        storage.select(&sql)
    }
}

/// Select list of an existence subquery.
pub(crate) fn select_list(comparison: Comparison) -> &'static str {
    if comparison.is_plain_exists() {
        "1"
    } else {
        "COUNT(*)"
    }
}

/// `EXISTS (sql)` or `(sql) <op> <count>`.
pub(crate) fn wrap(sql: &str, comparison: Comparison) -> String {
    if comparison.is_plain_exists() {
        format!("EXISTS (\n{sql}\n)")
    } else {
        format!("(\n{sql}\n) {} {}", comparison.op.as_sql(), comparison.count)
    }
}
