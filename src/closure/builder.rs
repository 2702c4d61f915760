//! Recursive query synthesis.
//!
//! A closure is a `WITH RECURSIVE` CTE of two legs:
//!
//! ```sql
//! "__closure_tree" AS (
//!   -- initial leg: the roots, unscoped
//!   SELECT "users".*, 0 AS "__closure_depth",
//!          '/' || CAST("users"."id" AS TEXT) || '/' AS "__closure_path",
//!          "users"."id" AS "__closure_root"
//!   FROM "users"
//!   WHERE "users"."id" IN (1)
//!   UNION ALL
//!   -- recursive leg: one more edge, scoped and cycle-guarded
//!   SELECT "users".*, "__closure_tree"."__closure_depth" + 1, ...
//!   FROM "users"
//!   INNER JOIN "__closure_tree" ON "users"."parent_id" = "__closure_tree"."id"
//!   WHERE instr("__closure_tree"."__closure_path", '/' || CAST("users"."id" AS TEXT) || '/') = 0
//!     AND "users"."deleted_at" IS NULL
//! )
//! ```
//!
//! The depth-0 rows are always part of the CTE. Relations that exclude self
//! filter them in their final projection.

use crate::closure::path::{PathState, TraversalDirection};
use crate::closure::scope::{ScopeContext, ScopeSet};
use crate::error::ClosureError;
use crate::record::Key;
use crate::sql::{BuildContext, key_list, qualified, quote_ident, table_ref, where_clause};
use crate::table::HierarchyTable;

/// Which rows seed the initial leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Roots {
    Keys(Vec<Key>),
    /// Every row of the table; used by correlated existence predicates.
    All,
}

/// The two legs of a recursive CTE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecursiveQuerySpec {
    pub cte_name: String,
    pub initial_leg: String,
    pub recursive_leg: String,
}

impl RecursiveQuerySpec {
    pub fn body(&self) -> String {
        format!("{}\nUNION ALL\n{}", self.initial_leg, self.recursive_leg)
    }

    /// Add the CTE to `cx`.
    pub fn register(&self, cx: &mut BuildContext) {
        cx.add_recursive_cte(quote_ident(&self.cte_name), self.body());
    }
}

/// Builds closure queries over one hierarchy table.
pub struct RecursiveQueryBuilder<'a> {
    table: &'a HierarchyTable,
    path: &'a PathState,
    scopes: &'a ScopeSet,
    alias: String,
}

impl<'a> RecursiveQueryBuilder<'a> {
    pub fn new(table: &'a HierarchyTable, path: &'a PathState, scopes: &'a ScopeSet) -> Self {
        RecursiveQueryBuilder {
            table,
            path,
            scopes,
            alias: table.name.clone(),
        }
    }

    /// Alias the hierarchy table inside both legs.
    pub fn with_table_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn table_name(&self) -> &str {
        &self.table.name
    }

    pub fn build(
        &self,
        cx: &mut BuildContext,
        cte_name: &str,
        roots: &Roots,
    ) -> Result<RecursiveQuerySpec, ClosureError> {
        let dialect = cx.dialect();
        let a = &self.alias;
        let p = self.path;
        let from = table_ref(&self.table.name, a);

        let seed_filter = match roots {
            Roots::Keys(keys) => vec![seed_predicate(a, &p.key_column, keys)],
            Roots::All => Vec::new(),
        };
        let initial_leg = format!(
            "SELECT {a_star}, 0 AS {depth}, {path} AS {path_col}, {key} AS {root}\nFROM {from}{filter}",
            a_star = star(a),
            depth = quote_ident(&p.depth_column),
            path = p.seed_path_sql(dialect, a),
            path_col = quote_ident(&p.path_column),
            key = qualified(a, &p.key_column),
            root = quote_ident(&p.root_column),
            filter = where_clause(&seed_filter),
        );

        let join_on = match p.direction {
            TraversalDirection::Descendants => format!(
                "{} = {}",
                qualified(a, &p.parent_column),
                qualified(cte_name, &p.key_column)
            ),
            TraversalDirection::Ancestors => format!(
                "{} = {}",
                qualified(a, &p.key_column),
                qualified(cte_name, &p.parent_column)
            ),
        };

        let mut guards = vec![p.cycle_guard_sql(dialect, cte_name, a)];
        if let Some(max) = p.max_depth {
            guards.push(format!("{} < {max}", qualified(cte_name, &p.depth_column)));
        }
        guards.extend(self.scope_predicates(cx)?);

        let recursive_leg = format!(
            "SELECT {a_star}, {prev_depth} + 1 AS {depth}, {path} AS {path_col}, {prev_root} AS {root}\n\
             FROM {from}\n\
             INNER JOIN {cte} ON {join_on}{filter}",
            a_star = star(a),
            prev_depth = qualified(cte_name, &p.depth_column),
            depth = quote_ident(&p.depth_column),
            path = p.extend_path_sql(dialect, cte_name, a),
            path_col = quote_ident(&p.path_column),
            prev_root = qualified(cte_name, &p.root_column),
            root = quote_ident(&p.root_column),
            cte = quote_ident(cte_name),
            filter = where_clause(&guards),
        );

        Ok(RecursiveQuerySpec {
            cte_name: cte_name.to_string(),
            initial_leg,
            recursive_leg,
        })
    }

    /// Plain rows of `keys`, without synthesized columns or scopes.
    pub fn seed_query(&self, keys: &[Key]) -> String {
        let a = &self.alias;
        format!(
            "SELECT {}\nFROM {}{}",
            star(a),
            table_ref(&self.table.name, a),
            where_clause(&[seed_predicate(a, &self.path.key_column, keys)])
        )
    }

    /// Scoped candidate rows of the next level: those whose next-column is
    /// one of `links`. Cycle and depth guards are applied by the caller.
    pub fn level_query(&self, cx: &mut BuildContext, links: &[Key]) -> Result<String, ClosureError> {
        let a = &self.alias;
        let mut filters = vec![seed_predicate(a, self.path.next_column(), links)];
        filters.extend(self.scope_predicates(cx)?);
        let body = format!(
            "SELECT {}\nFROM {}{}",
            star(a),
            table_ref(&self.table.name, a),
            where_clause(&filters)
        );
        Ok(cx.build(&body))
    }

    /// Predicates of every effective scope, rendered against the visited
    /// row.
    pub fn scope_predicates(&self, cx: &mut BuildContext) -> Result<Vec<String>, ClosureError> {
        let mut predicates = Vec::with_capacity(self.scopes.len());
        for (_, scope) in self.scopes.iter() {
            let mut scx = ScopeContext {
                alias: &self.alias,
                table: self.table,
                cx: &mut *cx,
            };
            if let Some(sql) = scope.predicate(&mut scx)? {
                predicates.push(sql);
            }
        }
        Ok(predicates)
    }
}

fn star(alias: &str) -> String {
    format!("{}.*", quote_ident(alias))
}

fn seed_predicate(alias: &str, column: &str, keys: &[Key]) -> String {
    if keys.is_empty() {
        "1 = 0".to_string()
    } else {
        format!("{} IN ({})", qualified(alias, column), key_list(keys))
    }
}
