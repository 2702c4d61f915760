//! Shared helpers for unit tests. Never compiled outside `cfg(test)`.

use crate::table::{HierarchyTable, JoinDefinition, TargetTable};

/// Schema and rows shared with the integration tests.
pub const FIXTURE_SQL: &str = include_str!("../tests/fixtures/hierarchy.sql");

/// `users(id, parent_id, slug, deleted_at)` with soft deletes.
pub fn users_table() -> HierarchyTable {
    HierarchyTable::new("users", "id", "parent_id").with_tombstone("deleted_at")
}

pub fn roles_table() -> TargetTable {
    TargetTable::new("roles", "id").with_tombstone("deleted_at")
}

pub fn role_user() -> JoinDefinition {
    JoinDefinition::belongs_to_many("role_user", "user_id", "role_id")
}

/// In-memory SQLite database loaded with [`FIXTURE_SQL`].
pub fn sqlite_fixture() -> rusqlite::Connection {
    let conn = rusqlite::Connection::open_in_memory().expect("open in-memory sqlite");
    conn.execute_batch(FIXTURE_SQL).expect("load fixture");
    conn
}
