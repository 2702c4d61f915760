//! Native and iterative closure evaluation.
//!
//! In native mode the recursive CTE is handed to the storage engine. In
//! iterative mode the traversal runs here, one round-trip per level, and the
//! resulting trails are registered as a plain CTE with the same name and
//! columns. Everything built on top of the closure CTE (final projections,
//! joins, mutations) is therefore identical in both modes.

use std::collections::BTreeMap;

use tracing::{debug, trace, warn};

use crate::closure::builder::{RecursiveQueryBuilder, Roots};
use crate::closure::path::{PathState, Trail};
use crate::config::{ClosureConfig, ExecutionMode};
use crate::error::ClosureError;
use crate::record::{Key, Record};
use crate::sql::{BuildContext, qualified, quote_ident, quote_literal, table_ref};
use crate::storage::Storage;

/// Evaluation strategy chosen for one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPlan {
    Native,
    Iterative,
}

pub fn plan<S: Storage + ?Sized>(
    config: &ClosureConfig,
    storage: &S,
) -> Result<ExecutionPlan, ClosureError> {
    let native = storage.supports_recursive_queries();
    match config.execution {
        ExecutionMode::Auto if native => Ok(ExecutionPlan::Native),
        ExecutionMode::Auto => Ok(ExecutionPlan::Iterative),
        ExecutionMode::Native if native => Ok(ExecutionPlan::Native),
        ExecutionMode::Native => Err(ClosureError::Unsupported(
            "native execution requested but the storage engine has no recursive queries".into(),
        )),
        ExecutionMode::Iterative => Ok(ExecutionPlan::Iterative),
    }
}

/// Fresh build context for `storage` under `plan`.
pub fn context<S: Storage + ?Sized>(storage: &S, plan: ExecutionPlan) -> BuildContext {
    BuildContext::new(storage.dialect(), plan == ExecutionPlan::Native)
        .with_recursive_queries(storage.supports_recursive_queries())
}

/// Register the closure CTE named `cte_name` in `cx`.
///
/// Returns `false` when the iterative traversal found no rows at all; the
/// caller can then skip the final statement.
pub fn register_closure<S: Storage + ?Sized>(
    storage: &mut S,
    cx: &mut BuildContext,
    builder: &RecursiveQueryBuilder<'_>,
    path: &PathState,
    cte_name: &str,
    roots: &[Key],
    max_keys: usize,
) -> Result<bool, ClosureError> {
    if cx.native_recursion() {
        builder
            .build(cx, cte_name, &Roots::Keys(roots.to_vec()))?
            .register(cx);
        return Ok(true);
    }

    let trails = traverse(storage, builder, path, roots, max_keys)?;
    if trails.is_empty() {
        return Ok(false);
    }
    register_materialized(cx, builder, path, cte_name, &trails);
    Ok(true)
}

/// Walk the hierarchy level by level from `roots`.
///
/// Produces the same `(root, depth, path)` set as the recursive CTE: the
/// recursive leg's scopes are applied to every fetched level, a candidate
/// already on the path is dropped, and no level beyond `max_depth` is
/// fetched.
pub fn traverse<S: Storage + ?Sized>(
    storage: &mut S,
    builder: &RecursiveQueryBuilder<'_>,
    path: &PathState,
    roots: &[Key],
    max_keys: usize,
) -> Result<Vec<Trail>, ClosureError> {
    let dialect = storage.dialect();
    let recursive = storage.supports_recursive_queries();
    let mut frontier: Vec<(Record, Trail)> = Vec::new();

    for chunk in roots.chunks(max_keys.max(1)) {
        let sql = builder.seed_query(chunk);
        debug!(sql = %sql, "closure seed query");
        for record in storage.select(&sql)? {
            let key = record.key(&path.key_column)?;
            frontier.push((record, Trail::seed(key)));
        }
    }

    let mut trails: Vec<Trail> = frontier.iter().map(|(_, t)| t.clone()).collect();
    let mut level: u32 = 0;

    while !frontier.is_empty() {
        if path.max_depth.is_some_and(|max| level >= max) {
            warn!(
                level,
                pending = frontier.len(),
                "closure traversal stopped at max depth"
            );
            break;
        }

        let mut by_link: BTreeMap<Key, Vec<usize>> = BTreeMap::new();
        for (i, (record, _)) in frontier.iter().enumerate() {
            if let Some(link) = record.get_i64(path.link_column()) {
                by_link.entry(link).or_default().push(i);
            }
        }
        let links: Vec<Key> = by_link.keys().copied().collect();

        let mut next: Vec<(Record, Trail)> = Vec::new();
        for chunk in links.chunks(max_keys.max(1)) {
            let mut cx = BuildContext::new(dialect, false).with_recursive_queries(recursive);
            let sql = builder.level_query(&mut cx, chunk)?;
            debug!(sql = %sql, level = level + 1, "closure level query");
            for candidate in storage.select(&sql)? {
                let key = candidate.key(&path.key_column)?;
                let Some(link) = candidate.get_i64(path.next_column()) else {
                    continue;
                };
                let Some(members) = by_link.get(&link) else {
                    continue;
                };
                for &i in members {
                    if let Some(trail) = frontier[i].1.extend(key) {
                        next.push((candidate.clone(), trail));
                    }
                }
            }
        }

        level += 1;
        trace!(level, frontier = frontier.len(), found = next.len(), "closure level");
        trails.extend(next.iter().map(|(_, t)| t.clone()));
        frontier = next;
    }

    Ok(trails)
}

/// Register `trails` as `<cte_name>_trail` (a `VALUES` list) and
/// `<cte_name>` (the table joined to it, with the synthesized columns).
pub fn register_materialized(
    cx: &mut BuildContext,
    builder: &RecursiveQueryBuilder<'_>,
    path: &PathState,
    cte_name: &str,
    trails: &[Trail],
) {
    let trail_name = format!("{cte_name}_trail");
    let values = trails
        .iter()
        .map(|t| {
            format!(
                "({}, {}, {}, {})",
                t.key(),
                t.depth,
                quote_literal(&path.format_path(&t.path)),
                t.root
            )
        })
        .collect::<Vec<_>>()
        .join(",\n");
    cx.add_cte(
        format!(
            "{}(\"key\", \"depth\", \"path\", \"root\")",
            quote_ident(&trail_name)
        ),
        format!("VALUES\n{values}"),
    );

    let a = builder.alias();
    let t = "__closure_trail";
    let body = format!(
        "SELECT {star}, {td} AS {depth}, {tp} AS {path_col}, {tr} AS {root}\n\
         FROM {from}\n\
         INNER JOIN {trail} AS {t_q} ON {key} = {tk}",
        star = format!("{}.*", quote_ident(a)),
        td = qualified(t, "depth"),
        depth = quote_ident(&path.depth_column),
        tp = qualified(t, "path"),
        path_col = quote_ident(&path.path_column),
        tr = qualified(t, "root"),
        root = quote_ident(&path.root_column),
        from = table_ref(builder.table_name(), a),
        trail = quote_ident(&trail_name),
        t_q = quote_ident(t),
        key = qualified(a, &path.key_column),
        tk = qualified(t, "key"),
    );
    cx.add_cte(quote_ident(cte_name), body);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::closure::path::TraversalDirection;
    use crate::test_helpers::{sqlite_fixture, users_table};

    struct NoRecursion(rusqlite::Connection);

    impl Storage for NoRecursion {
        fn dialect(&self) -> crate::sql::Dialect {
            self.0.dialect()
        }
        fn supports_recursive_queries(&self) -> bool {
            false
        }
        fn select(&mut self, sql: &str) -> Result<Vec<Record>, ClosureError> {
            self.0.select(sql)
        }
        fn execute(&mut self, sql: &str) -> Result<u64, ClosureError> {
            Storage::execute(&mut self.0, sql)
        }
    }

    fn path(direction: TraversalDirection) -> PathState {
        PathState::new(direction, false, &users_table(), &ClosureConfig::default())
    }

    // ── plan ────────────────────────────────────────────────────────

    #[test]
    fn test_plan_selection() {
        let conn = sqlite_fixture();
        let plain = NoRecursion(sqlite_fixture());
        let auto = ClosureConfig::default();
        assert_eq!(plan(&auto, &conn).unwrap(), ExecutionPlan::Native);
        assert_eq!(plan(&auto, &plain).unwrap(), ExecutionPlan::Iterative);

        let native = auto.clone().with_execution(ExecutionMode::Native);
        assert!(matches!(
            plan(&native, &plain),
            Err(ClosureError::Unsupported(_))
        ));

        let iterative = auto.with_execution(ExecutionMode::Iterative);
        assert_eq!(plan(&iterative, &conn).unwrap(), ExecutionPlan::Iterative);
    }

    // ── traverse ────────────────────────────────────────────────────

    #[test]
    fn test_traverse_descendants_skips_trashed() {
        let mut conn = sqlite_fixture();
        let table = users_table();
        let p = path(TraversalDirection::Descendants);
        let b = RecursiveQueryBuilder::new(&table, &p, &table.default_scopes);
        let trails = traverse(&mut conn, &b, &p, &[4], 1000).unwrap();
        let keys: Vec<Key> = trails.iter().map(Trail::key).collect();
        // 9 is tombstoned, so the traversal stops at 7.
        assert_eq!(keys, vec![4, 7]);
        assert_eq!(trails[1].path, vec![4, 7]);
        assert_eq!(trails[1].depth, 1);
    }

    #[test]
    fn test_traverse_ancestors_with_max_depth() {
        let mut conn = sqlite_fixture();
        let table = users_table();
        let p = path(TraversalDirection::Ancestors).with_max_depth(Some(2));
        let b = RecursiveQueryBuilder::new(&table, &p, &table.default_scopes);
        let trails = traverse(&mut conn, &b, &p, &[8], 1).unwrap();
        let keys: Vec<Key> = trails.iter().map(Trail::key).collect();
        assert_eq!(keys, vec![8, 5, 2]);
        assert!(trails.iter().all(|t| t.root == 8));
    }

    #[test]
    fn test_traverse_terminates_on_cycle() {
        let mut conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, parent_id INTEGER, slug TEXT, deleted_at TEXT);
             INSERT INTO users VALUES (1, 2, 'a', NULL), (2, 1, 'b', NULL);",
        )
        .unwrap();
        let table = users_table();
        let p = path(TraversalDirection::Descendants);
        let b = RecursiveQueryBuilder::new(&table, &p, &table.default_scopes);
        let trails = traverse(&mut conn, &b, &p, &[1], 1000).unwrap();
        assert_eq!(trails.len(), 2);
        assert_eq!(trails[1].path, vec![1, 2]);
    }

    // ── register ────────────────────────────────────────────────────

    #[test]
    fn test_register_materialized_shape() {
        let table = users_table();
        let p = path(TraversalDirection::Descendants);
        let b = RecursiveQueryBuilder::new(&table, &p, &table.default_scopes);
        let mut cx = BuildContext::new(crate::sql::Dialect::Sqlite, false);
        let trails = vec![Trail::seed(1), Trail::seed(1).extend(2).unwrap()];
        register_materialized(&mut cx, &b, &p, "__closure_tree", &trails);
        let sql = cx.build("SELECT 1");
        assert!(sql.starts_with("WITH \"__closure_tree_trail\"(\"key\", \"depth\", \"path\", \"root\") AS (\nVALUES\n(1, 0, '/1/', 1),\n(2, 1, '/1/2/', 1)\n)"));
        assert!(sql.contains("\"__closure_tree\" AS (\nSELECT \"users\".*, \"__closure_trail\".\"depth\" AS \"__closure_depth\""));
        assert!(sql.contains(
            "INNER JOIN \"__closure_tree_trail\" AS \"__closure_trail\" ON \"users\".\"id\" = \"__closure_trail\".\"key\""
        ));
    }

    #[test]
    fn test_register_closure_empty_iterative_result() {
        let mut conn = sqlite_fixture();
        let table = users_table();
        let p = path(TraversalDirection::Descendants);
        let b = RecursiveQueryBuilder::new(&table, &p, &table.default_scopes);
        let mut cx = BuildContext::new(crate::sql::Dialect::Sqlite, false);
        let found =
            register_closure(&mut conn, &mut cx, &b, &p, "__closure_tree", &[404], 1000).unwrap();
        assert!(!found);
        assert!(!cx.has_ctes());
    }
}
