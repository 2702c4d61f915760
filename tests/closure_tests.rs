//! Integration tests for `ClosureRelation` against the SQLite fixture.
//!
//! Covers ancestors / descendants with and without self, soft-delete
//! pass-through, intermediate scopes, ordering, depth limits, cycles and
//! mutations.

mod common;

use adjacency_closure::{
    ClosureConfig, ClosureError, ClosureRelation, Condition, ConditionScope, HierarchyTable,
    Operator, SoftDeletingScope, Storage, TraversalDirection,
};
use common::{ids, sorted_ids, sqlite, users};
use serde_json::{Map, json};

// ═══════════════════════════════════════════════════════════════════════
// Descendants
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_descendants_of_root() {
    let mut conn = sqlite();
    let rows = ClosureRelation::descendants(users(), 1)
        .unwrap()
        .get(&mut conn)
        .unwrap();
    assert_eq!(sorted_ids(&rows), vec![2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn test_descendants_and_self() {
    let mut conn = sqlite();
    let rows = ClosureRelation::descendants_and_self(users(), 2)
        .unwrap()
        .get(&mut conn)
        .unwrap();
    assert_eq!(sorted_ids(&rows), vec![2, 5, 8]);
}

#[test]
fn test_descendants_of_leaf_is_empty() {
    let mut conn = sqlite();
    let rows = ClosureRelation::descendants(users(), 8)
        .unwrap()
        .get(&mut conn)
        .unwrap();
    assert!(rows.is_empty());

    let rows = ClosureRelation::descendants_and_self(users(), 8)
        .unwrap()
        .get(&mut conn)
        .unwrap();
    assert_eq!(ids(&rows), vec![8]);
}

#[test]
fn test_unknown_root_is_empty() {
    let mut conn = sqlite();
    let rows = ClosureRelation::descendants_and_self(users(), 404)
        .unwrap()
        .get(&mut conn)
        .unwrap();
    assert!(rows.is_empty());
}

#[test]
fn test_multiple_roots() {
    let mut conn = sqlite();
    let result = ClosureRelation::new(users(), TraversalDirection::Descendants, false)
        .unwrap()
        .for_roots([2, 11])
        .get_with_trails(&mut conn)
        .unwrap();
    let mut pairs: Vec<(i64, i64)> = result
        .iter()
        .map(|(record, trail)| (trail.root, record.key("id").unwrap()))
        .collect();
    pairs.sort_unstable();
    assert_eq!(pairs, vec![(2, 5), (2, 8), (11, 12), (11, 13)]);
}

#[test]
fn test_overlapping_roots_return_rows_once() {
    let mut conn = sqlite();
    let rel = ClosureRelation::new(users(), TraversalDirection::Descendants, false)
        .unwrap()
        .for_roots([1, 2])
        .order_by("id");
    let rows = rel.clone().get(&mut conn).unwrap();
    assert_eq!(ids(&rows), vec![2, 3, 4, 5, 6, 7, 8]);

    // Trails stay per root: 5 and 8 are reached from both.
    let result = rel.get_with_trails(&mut conn).unwrap();
    assert_eq!(result.records.len(), 9);
}

#[test]
fn test_limit_counts_distinct_rows_across_roots() {
    let mut conn = sqlite();
    let rows = ClosureRelation::new(users(), TraversalDirection::Descendants, false)
        .unwrap()
        .for_roots([2, 1])
        .order_by_desc("id")
        .limit(3)
        .get(&mut conn)
        .unwrap();
    assert_eq!(ids(&rows), vec![8, 7, 6]);
}

// ═══════════════════════════════════════════════════════════════════════
// Ancestors
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_ancestors_breadth_first() {
    let mut conn = sqlite();
    let rows = ClosureRelation::ancestors(users(), 8)
        .unwrap()
        .breadth_first()
        .get(&mut conn)
        .unwrap();
    assert_eq!(ids(&rows), vec![5, 2, 1]);
}

#[test]
fn test_ancestors_and_self_trails() {
    let mut conn = sqlite();
    let result = ClosureRelation::ancestors_and_self(users(), 13)
        .unwrap()
        .breadth_first()
        .get_with_trails(&mut conn)
        .unwrap();
    assert_eq!(ids(&result.records), vec![13, 12, 11]);
    let depths: Vec<u32> = result.trails.iter().map(|t| t.depth).collect();
    assert_eq!(depths, vec![0, 1, 2]);
    assert_eq!(result.trails[2].path, vec![13, 12, 11]);
}

#[test]
fn test_ancestors_of_root_is_empty() {
    let mut conn = sqlite();
    let rows = ClosureRelation::ancestors(users(), 1)
        .unwrap()
        .get(&mut conn)
        .unwrap();
    assert!(rows.is_empty());
}

// ═══════════════════════════════════════════════════════════════════════
// Ordering and limits
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_depth_first_keeps_subtrees_contiguous() {
    let mut conn = sqlite();
    let rows = ClosureRelation::descendants(users(), 1)
        .unwrap()
        .depth_first()
        .get(&mut conn)
        .unwrap();
    // Paths sort as text: /1/2/ < /1/2/5/ < /1/2/5/8/ < /1/3/ ...
    assert_eq!(ids(&rows), vec![2, 5, 8, 3, 6, 4, 7]);
}

#[test]
fn test_order_by_desc_and_limit() {
    let mut conn = sqlite();
    let rows = ClosureRelation::descendants(users(), 1)
        .unwrap()
        .order_by_desc("id")
        .limit(3)
        .get(&mut conn)
        .unwrap();
    assert_eq!(ids(&rows), vec![8, 7, 6]);
}

#[test]
fn test_max_depth() {
    let mut conn = sqlite();
    let rows = ClosureRelation::descendants(users(), 1)
        .unwrap()
        .with_max_depth(1)
        .get(&mut conn)
        .unwrap();
    assert_eq!(sorted_ids(&rows), vec![2, 3, 4]);
}

#[test]
fn test_max_depth_from_config() {
    let mut conn = sqlite();
    let rows = ClosureRelation::descendants(users(), 1)
        .unwrap()
        .with_config(ClosureConfig::default().with_max_depth(2))
        .unwrap()
        .get(&mut conn)
        .unwrap();
    assert_eq!(sorted_ids(&rows), vec![2, 3, 4, 5, 6, 7]);
}

#[test]
fn test_max_depth_survives_config_replacement() {
    let mut conn = sqlite();
    let rows = ClosureRelation::descendants(users(), 1)
        .unwrap()
        .with_max_depth(1)
        .with_config(ClosureConfig::default().with_max_depth(3))
        .unwrap()
        .get(&mut conn)
        .unwrap();
    assert_eq!(sorted_ids(&rows), vec![2, 3, 4]);
}

#[test]
fn test_filter_on_closure_rows() {
    let mut conn = sqlite();
    let rows = ClosureRelation::descendants(users(), 1)
        .unwrap()
        .filter(Condition::compare("id", Operator::Gt, 5))
        .order_by("id")
        .get(&mut conn)
        .unwrap();
    assert_eq!(ids(&rows), vec![6, 7, 8]);
}

#[test]
fn test_filter_does_not_prune_traversal() {
    // Final filters drop rows from the result, not from the walk.
    let mut conn = sqlite();
    let rows = ClosureRelation::descendants(users(), 1)
        .unwrap()
        .filter(Condition::not_eq("slug", "user-5"))
        .get(&mut conn)
        .unwrap();
    assert_eq!(sorted_ids(&rows), vec![2, 3, 4, 6, 7, 8]);
}

// ═══════════════════════════════════════════════════════════════════════
// Soft deletes
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_trashed_rows_stop_the_traversal() {
    let mut conn = sqlite();
    let rows = ClosureRelation::descendants(users(), 4)
        .unwrap()
        .get(&mut conn)
        .unwrap();
    assert_eq!(ids(&rows), vec![7]);
}

#[test]
fn test_trashed_descendants_are_traversed_but_hidden() {
    let mut conn = sqlite();
    let rows = ClosureRelation::descendants(users(), 4)
        .unwrap()
        .with_trashed_descendants()
        .get(&mut conn)
        .unwrap();
    assert_eq!(ids(&rows), vec![7]);

    let rows = ClosureRelation::descendants(users(), 4)
        .unwrap()
        .with_trashed_descendants()
        .with_trashed()
        .order_by("id")
        .get(&mut conn)
        .unwrap();
    assert_eq!(ids(&rows), vec![7, 9]);
}

#[test]
fn test_trashed_rows_below_a_trashed_row() {
    let mut conn = sqlite();
    conn.execute_batch(
        "INSERT INTO users (id, parent_id, slug, deleted_at) VALUES (14, 9, 'user-14', NULL)",
    )
    .unwrap();

    let rows = ClosureRelation::descendants(users(), 4)
        .unwrap()
        .get(&mut conn)
        .unwrap();
    assert_eq!(ids(&rows), vec![7]);

    let rows = ClosureRelation::descendants(users(), 4)
        .unwrap()
        .with_trashed_descendants()
        .order_by("id")
        .get(&mut conn)
        .unwrap();
    assert_eq!(ids(&rows), vec![7, 14]);
}

#[test]
fn test_table_without_tombstone_has_no_default_scope() {
    let mut conn = sqlite();
    let plain = HierarchyTable::new("users", "id", "parent_id");
    let rel = ClosureRelation::descendants(plain, 4).unwrap();
    assert!(rel.intermediate_scopes().is_empty());
    let rows = rel.order_by("id").get(&mut conn).unwrap();
    assert_eq!(ids(&rows), vec![7, 9]);
}

// ═══════════════════════════════════════════════════════════════════════
// Intermediate scopes
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_custom_intermediate_scope_prunes_branch() {
    let mut conn = sqlite();
    let rows = ClosureRelation::descendants(users(), 1)
        .unwrap()
        .with_intermediate_scope("skip-5", ConditionScope::new(Condition::not_eq("slug", "user-5")))
        .get(&mut conn)
        .unwrap();
    // 5 is excluded, and so is everything only reachable through it.
    assert_eq!(sorted_ids(&rows), vec![2, 3, 4, 6, 7]);
}

#[test]
fn test_scope_removed_by_name() {
    let mut conn = sqlite();
    let rel = ClosureRelation::descendants(users(), 1)
        .unwrap()
        .with_intermediate_scope("skip-5", ConditionScope::new(Condition::not_eq("slug", "user-5")))
        .without_intermediate_scope("skip-5");
    assert_eq!(rel.removed_intermediate_scopes(), ["skip-5".to_string()]);
    assert_eq!(rel.intermediate_scopes().names(), vec!["soft_deletes"]);
    let rows = rel.get(&mut conn).unwrap();
    assert_eq!(sorted_ids(&rows), vec![2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn test_scope_removed_by_instance() {
    let rel = ClosureRelation::descendants(users(), 1)
        .unwrap()
        .with_intermediate_scope("skip-5", ConditionScope::new(Condition::not_eq("slug", "user-5")))
        .without_intermediate_scope_instance(&SoftDeletingScope);
    assert_eq!(rel.intermediate_scopes().names(), vec!["skip-5"]);
    assert_eq!(rel.removed_intermediate_scopes(), ["soft_deletes".to_string()]);
}

#[test]
fn test_instance_removal_matches_exact_kind() {
    let rel = ClosureRelation::descendants(users(), 1)
        .unwrap()
        .with_intermediate_scope(
            "a",
            ConditionScope::new(Condition::not_eq("slug", "user-5")).with_kind("branch"),
        )
        .with_intermediate_scope("b", ConditionScope::new(Condition::not_eq("slug", "user-6")))
        .without_intermediate_scope_instance(&ConditionScope::new(Condition::eq("id", 0)));
    assert_eq!(rel.intermediate_scopes().names(), vec!["soft_deletes", "a"]);
}

#[test]
fn test_without_intermediate_scopes() {
    let mut conn = sqlite();
    let rel = ClosureRelation::descendants(users(), 4)
        .unwrap()
        .with_intermediate_scope("none", ConditionScope::new(Condition::eq("id", 0)))
        .without_intermediate_scopes();
    assert!(rel.intermediate_scopes().is_empty());
    let rows = rel.with_trashed().order_by("id").get(&mut conn).unwrap();
    assert_eq!(ids(&rows), vec![7, 9]);
}

#[test]
fn test_re_adding_a_removed_scope() {
    let rel = ClosureRelation::descendants(users(), 1)
        .unwrap()
        .with_trashed_descendants()
        .with_intermediate_scope(SoftDeletingScope::NAME, SoftDeletingScope);
    assert!(rel.intermediate_scopes().contains(SoftDeletingScope::NAME));
    assert!(rel.removed_intermediate_scopes().is_empty());
}

#[test]
fn test_scope_does_not_apply_to_roots() {
    let mut conn = sqlite();
    let rows = ClosureRelation::descendants_and_self(users(), 2)
        .unwrap()
        .with_intermediate_scope("not-2", ConditionScope::new(Condition::not_eq("id", 2)))
        .order_by("id")
        .get(&mut conn)
        .unwrap();
    assert_eq!(ids(&rows), vec![2, 5, 8]);
}

// ═══════════════════════════════════════════════════════════════════════
// Cycles
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_cycle_terminates() {
    let mut conn = sqlite();
    conn.execute_batch("UPDATE users SET parent_id = 8 WHERE id = 1")
        .unwrap();

    let result = ClosureRelation::descendants_and_self(users(), 1)
        .unwrap()
        .get_with_trails(&mut conn)
        .unwrap();
    assert_eq!(sorted_ids(&result.records), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    assert!(result.trails.iter().all(|t| t.depth <= 3));

    let rows = ClosureRelation::ancestors(users(), 5)
        .unwrap()
        .breadth_first()
        .get(&mut conn)
        .unwrap();
    assert_eq!(ids(&rows), vec![2, 1, 8]);
}

#[test]
fn test_self_loop_terminates() {
    let mut conn = sqlite();
    conn.execute_batch("UPDATE users SET parent_id = 10 WHERE id = 10")
        .unwrap();
    let rows = ClosureRelation::descendants_and_self(users(), 10)
        .unwrap()
        .get(&mut conn)
        .unwrap();
    assert_eq!(ids(&rows), vec![10]);
}

// ═══════════════════════════════════════════════════════════════════════
// Mutations
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_delete_soft_deletes_descendants() {
    let mut conn = sqlite();
    let affected = ClosureRelation::descendants(users(), 2)
        .unwrap()
        .delete(&mut conn)
        .unwrap();
    assert_eq!(affected, 2);

    let trashed = conn
        .select("SELECT id FROM users WHERE deleted_at IS NOT NULL ORDER BY id")
        .unwrap();
    assert_eq!(ids(&trashed), vec![5, 8, 9]);
}

#[test]
fn test_force_delete_removes_rows() {
    let mut conn = sqlite();
    let affected = ClosureRelation::descendants_and_self(users(), 11)
        .unwrap()
        .force_delete(&mut conn)
        .unwrap();
    assert_eq!(affected, 3);
    let left = conn.select("SELECT id FROM users WHERE id >= 11").unwrap();
    assert!(left.is_empty());
}

#[test]
fn test_update_ignores_order_and_limit() {
    let mut conn = sqlite();
    let mut values = Map::new();
    values.insert("slug".into(), json!("renamed"));
    let affected = ClosureRelation::descendants(users(), 1)
        .unwrap()
        .order_by("id")
        .limit(1)
        .update(&mut conn, values)
        .unwrap();
    assert_eq!(affected, 7);

    let renamed = conn
        .select("SELECT id FROM users WHERE slug = 'renamed' ORDER BY id")
        .unwrap();
    assert_eq!(ids(&renamed), vec![2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn test_mutation_of_empty_closure() {
    let mut conn = sqlite();
    let affected = ClosureRelation::descendants(users(), 10)
        .unwrap()
        .delete(&mut conn)
        .unwrap();
    assert_eq!(affected, 0);
}

// ═══════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_unknown_column_is_a_storage_error() {
    let mut conn = sqlite();
    let err = ClosureRelation::descendants(users(), 1)
        .unwrap()
        .filter(Condition::eq("no_such_column", 1))
        .get(&mut conn)
        .unwrap_err();
    assert!(matches!(err, ClosureError::Sqlite(_)), "{err:?}");
    assert!(!err.is_build_time());
}

#[test]
fn test_key_equal_to_parent_is_rejected() {
    let err = ClosureRelation::descendants(HierarchyTable::new("users", "id", "id"), 1)
        .unwrap_err();
    assert!(err.is_build_time());
}
