//! Targets reached from any member of a closure.
//!
//! The closure is joined to the association first and reduced to distinct
//! `(related key, root)` pairs, then the target table is joined to those
//! pairs:
//!
//! ```sql
//! SELECT "roles".*, "__closure_pivot"."__closure_root" AS "__closure_root"
//! FROM "roles"
//! INNER JOIN (
//!   SELECT DISTINCT "role_user"."role_id" AS "__closure_related",
//!                   "users"."__closure_root" AS "__closure_root"
//!   FROM "role_user"
//!   INNER JOIN "__closure_tree" AS "users" ON "users"."id" = "role_user"."user_id"
//!   WHERE "users"."__closure_depth" > 0
//! ) AS "__closure_pivot" ON "__closure_pivot"."__closure_related" = "roles"."id"
//! WHERE "roles"."deleted_at" IS NULL
//! ```
//!
//! A target granted through several members therefore appears once per
//! root. Tombstoned closure members only take part when the traversal was
//! allowed through them (`with_trashed_descendants`).

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::closure::scope::{IntermediateScope, ScopeSet};
use crate::closure::{executor, TraversalDirection};
use crate::config::ClosureConfig;
use crate::error::ClosureError;
use crate::query::{Comparison, Condition, Constraints, OrderBy, SortOrder};
use crate::record::{Key, Record};
use crate::relation::batch::EagerLoad;
use crate::relation::closure::ClosureRelation;
use crate::relation::existence::{self, ExistenceSource};
use crate::relation::{Mutation, distinct_by_key, tombstone_now};
use crate::sql::{BuildContext, qualified, quote_ident, quote_literal, render_value, table_ref, where_clause};
use crate::storage::Storage;
use crate::table::{HierarchyTable, JoinDefinition, TargetTable};

/// Column of the pivot stage holding the target key.
const RELATED_COLUMN: &str = "__closure_related";

/// Names used by one rendering of the join.
struct JoinAliases {
    /// Closure rows.
    member: String,
    /// Association table (the target table itself for has-many).
    pivot: String,
    target: String,
    /// The distinct `(related, root)` subquery.
    derived: String,
}

/// A closure joined through an association to another table.
#[derive(Debug, Clone)]
pub struct ClosureJoinRelation {
    closure: ClosureRelation,
    target: Arc<TargetTable>,
    join: JoinDefinition,
    constraints: Constraints,
    with_trashed: bool,
}

impl ClosureJoinRelation {
    pub fn new(
        closure: ClosureRelation,
        target: impl Into<Arc<TargetTable>>,
        join: JoinDefinition,
    ) -> Result<Self, ClosureError> {
        let target = target.into();
        target.validate()?;
        join.validate()?;
        Ok(ClosureJoinRelation {
            closure,
            target,
            join,
            constraints: Constraints::default(),
            with_trashed: false,
        })
    }

    pub fn of_descendants(
        table: impl Into<Arc<HierarchyTable>>,
        root: Key,
        target: impl Into<Arc<TargetTable>>,
        join: JoinDefinition,
    ) -> Result<Self, ClosureError> {
        Self::new(ClosureRelation::descendants(table, root)?, target, join)
    }

    pub fn of_descendants_and_self(
        table: impl Into<Arc<HierarchyTable>>,
        root: Key,
        target: impl Into<Arc<TargetTable>>,
        join: JoinDefinition,
    ) -> Result<Self, ClosureError> {
        Self::new(ClosureRelation::descendants_and_self(table, root)?, target, join)
    }

    pub fn of_ancestors(
        table: impl Into<Arc<HierarchyTable>>,
        root: Key,
        target: impl Into<Arc<TargetTable>>,
        join: JoinDefinition,
    ) -> Result<Self, ClosureError> {
        Self::new(ClosureRelation::ancestors(table, root)?, target, join)
    }

    pub fn of_ancestors_and_self(
        table: impl Into<Arc<HierarchyTable>>,
        root: Key,
        target: impl Into<Arc<TargetTable>>,
        join: JoinDefinition,
    ) -> Result<Self, ClosureError> {
        Self::new(ClosureRelation::ancestors_and_self(table, root)?, target, join)
    }

    /// Unbound template over `direction`, for existence predicates and
    /// eager loading.
    pub fn unbound(
        table: impl Into<Arc<HierarchyTable>>,
        direction: TraversalDirection,
        include_self: bool,
        target: impl Into<Arc<TargetTable>>,
        join: JoinDefinition,
    ) -> Result<Self, ClosureError> {
        Self::new(ClosureRelation::new(table, direction, include_self)?, target, join)
    }

    fn map_closure(mut self, f: impl FnOnce(ClosureRelation) -> ClosureRelation) -> Self {
        self.closure = f(self.closure);
        self
    }

    pub fn for_root(self, root: Key) -> Self {
        self.map_closure(|c| c.for_root(root))
    }

    pub fn for_roots(self, roots: impl IntoIterator<Item = Key>) -> Self {
        self.map_closure(|c| c.for_roots(roots))
    }

    // ── Closure configuration ──────────────────────────────────────

    pub fn with_intermediate_scope(
        self,
        name: impl Into<String>,
        scope: impl IntermediateScope + 'static,
    ) -> Self {
        self.map_closure(|c| c.with_intermediate_scope(name, scope))
    }

    pub fn without_intermediate_scope(self, name: &str) -> Self {
        self.map_closure(|c| c.without_intermediate_scope(name))
    }

    pub fn without_intermediate_scope_instance(self, scope: &dyn IntermediateScope) -> Self {
        self.map_closure(|c| c.without_intermediate_scope_instance(scope))
    }

    pub fn without_intermediate_scopes(self) -> Self {
        self.map_closure(ClosureRelation::without_intermediate_scopes)
    }

    pub fn with_trashed_descendants(self) -> Self {
        self.map_closure(ClosureRelation::with_trashed_descendants)
    }

    pub fn with_max_depth(self, max_depth: u32) -> Self {
        self.map_closure(|c| c.with_max_depth(max_depth))
    }

    /// Replace the closure's config (execution mode, chunk size, names).
    pub fn with_config(mut self, config: ClosureConfig) -> Result<Self, ClosureError> {
        self.closure = self.closure.with_config(config)?;
        Ok(self)
    }

    /// Restrict which closure members take part.
    pub fn filter_members(self, condition: Condition) -> Self {
        self.map_closure(|c| c.filter(condition))
    }

    pub fn intermediate_scopes(&self) -> ScopeSet {
        self.closure.intermediate_scopes()
    }

    pub fn removed_intermediate_scopes(&self) -> &[String] {
        self.closure.removed_intermediate_scopes()
    }

    pub fn closure(&self) -> &ClosureRelation {
        &self.closure
    }

    pub fn target(&self) -> &TargetTable {
        &self.target
    }

    // ── Target constraints ─────────────────────────────────────────

    /// Include tombstoned targets.
    pub fn with_trashed(mut self) -> Self {
        self.with_trashed = true;
        self
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.constraints.wheres.push(condition);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.constraints
            .orders
            .push(OrderBy::Column(column.into(), SortOrder::Asc));
        self
    }

    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        self.constraints
            .orders
            .push(OrderBy::Column(column.into(), SortOrder::Desc));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.constraints.limit = Some(limit);
        self
    }

    // ── Terminal operations ────────────────────────────────────────

    /// Distinct targets of the bound roots. With several roots the limit
    /// counts distinct targets, so it is applied after deduplication.
    pub fn get<S: Storage + ?Sized>(self, storage: &mut S) -> Result<Vec<Record>, ClosureError> {
        let roots = self.closure.bound_roots()?.to_vec();
        let single = roots.len() == 1;
        let rows = self.fetch(storage, &roots, single)?;
        let limit = if single { None } else { self.constraints.limit };
        distinct_by_key(rows.into_iter().map(|(_, r)| r), &self.target.key_column, limit)
    }

    /// Soft delete the targets when the target table supports it,
    /// physical delete otherwise.
    pub fn delete<S: Storage + ?Sized>(self, storage: &mut S) -> Result<u64, ClosureError> {
        let mutation = match &self.target.tombstone_column {
            Some(column) => Mutation::Update(format!(
                "{} = {}",
                quote_ident(column),
                quote_literal(&tombstone_now())
            )),
            None => Mutation::Delete,
        };
        self.mutate(storage, mutation)
    }

    pub fn force_delete<S: Storage + ?Sized>(self, storage: &mut S) -> Result<u64, ClosureError> {
        self.mutate(storage, Mutation::Delete)
    }

    pub fn update<S: Storage + ?Sized>(
        self,
        storage: &mut S,
        values: Map<String, Value>,
    ) -> Result<u64, ClosureError> {
        if values.is_empty() {
            return Err(ClosureError::config("update needs at least one column"));
        }
        let set = values
            .iter()
            .map(|(column, value)| format!("{} = {}", quote_ident(column), render_value(value)))
            .collect::<Vec<_>>()
            .join(", ");
        self.mutate(storage, Mutation::Update(set))
    }

    // ── Building blocks ────────────────────────────────────────────

    fn plain_aliases(&self) -> JoinAliases {
        let pivot = match &self.join {
            JoinDefinition::BelongsToMany { pivot_table, .. } => pivot_table.clone(),
            JoinDefinition::HasMany { .. } => self.target.name.clone(),
        };
        JoinAliases {
            member: self.closure.table().name.clone(),
            pivot,
            target: self.target.name.clone(),
            derived: "__closure_pivot".to_string(),
        }
    }

    /// Distinct `(related, root)` pairs of closure members.
    fn pivot_stage(
        &self,
        cx: &mut BuildContext,
        cte: &str,
        aliases: &JoinAliases,
    ) -> Result<String, ClosureError> {
        let path = self.closure.path();
        let m = aliases.member.as_str();
        let p = aliases.pivot.as_str();
        let member_filters = self.closure.projection_filters(cx, m, false)?;

        let (related, pivot_table, member_fk) = match &self.join {
            JoinDefinition::BelongsToMany {
                pivot_table,
                foreign_pivot_key,
                related_pivot_key,
            } => (
                qualified(p, related_pivot_key),
                pivot_table.as_str(),
                qualified(p, foreign_pivot_key),
            ),
            JoinDefinition::HasMany { foreign_key } => (
                qualified(p, &self.target.key_column),
                self.target.name.as_str(),
                qualified(p, foreign_key),
            ),
        };

        Ok(format!(
            "SELECT DISTINCT {related} AS {related_col}, {root} AS {root_col}\n\
             FROM {pivot}\n\
             INNER JOIN {members} ON {member_key} = {member_fk}{filter}",
            related_col = quote_ident(RELATED_COLUMN),
            root = qualified(m, &path.root_column),
            root_col = quote_ident(&path.root_column),
            pivot = table_ref(pivot_table, p),
            members = table_ref(cte, m),
            member_key = qualified(m, &path.key_column),
            filter = where_clause(&member_filters),
        ))
    }

    /// `FROM ... WHERE ...` of the target query. `extra` predicates come
    /// first.
    fn target_from(
        &self,
        cx: &mut BuildContext,
        cte: &str,
        aliases: &JoinAliases,
        extra: Vec<String>,
    ) -> Result<String, ClosureError> {
        let t = aliases.target.as_str();
        let d = aliases.derived.as_str();
        let pivot = self.pivot_stage(cx, cte, aliases)?;

        let mut filters = extra;
        if !self.with_trashed {
            if let Some(column) = &self.target.tombstone_column {
                filters.push(format!("{} IS NULL", qualified(t, column)));
            }
        }
        filters.extend(self.constraints.render_wheres(cx, t)?);

        Ok(format!(
            "FROM {target}\nINNER JOIN (\n{pivot}\n) AS {derived} ON {related} = {target_key}{filter}",
            target = table_ref(&self.target.name, t),
            derived = quote_ident(d),
            related = qualified(d, RELATED_COLUMN),
            target_key = qualified(t, &self.target.key_column),
            filter = where_clause(&filters),
        ))
    }

    /// Target rows tagged with the root they were reached from.
    fn fetch<S: Storage + ?Sized>(
        &self,
        storage: &mut S,
        roots: &[Key],
        with_limit: bool,
    ) -> Result<Vec<(Key, Record)>, ClosureError> {
        let plan = executor::plan(self.closure.config(), storage)?;
        let mut cx = executor::context(storage, plan);
        if !self.closure.register(storage, &mut cx, roots)? {
            return Ok(Vec::new());
        }

        let aliases = self.plain_aliases();
        let root_column = &self.closure.path().root_column;
        let from = self.target_from(&mut cx, &self.closure.config().cte_name, &aliases, Vec::new())?;
        let limit = if with_limit {
            self.constraints.render_limit()
        } else {
            String::new()
        };
        let body = format!(
            "SELECT {}.*, {} AS {}\n{from}{}{limit}",
            quote_ident(&aliases.target),
            qualified(&aliases.derived, root_column),
            quote_ident(root_column),
            self.constraints.render_order(&aliases.target, None)?,
        );
        let sql = cx.build(&body);
        debug!(sql = %sql, target = %self.target.name, roots = roots.len(), "closure join select");

        storage
            .select(&sql)?
            .into_iter()
            .map(|mut record| {
                let root = record
                    .take(root_column)
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| {
                        ClosureError::Decode(format!("closure join row has no \"{root_column}\""))
                    })?;
                Ok((root, record))
            })
            .collect()
    }

    fn mutate<S: Storage + ?Sized>(
        self,
        storage: &mut S,
        mutation: Mutation,
    ) -> Result<u64, ClosureError> {
        let roots = self.closure.bound_roots()?.to_vec();
        let plan = executor::plan(self.closure.config(), storage)?;
        let mut cx = executor::context(storage, plan);
        if !self.closure.register(storage, &mut cx, &roots)? {
            return Ok(0);
        }

        let aliases = self.plain_aliases();
        let from = self.target_from(&mut cx, &self.closure.config().cte_name, &aliases, Vec::new())?;
        let keys = format!(
            "SELECT {}\n{from}",
            qualified(&aliases.target, &self.target.key_column)
        );
        let sql = cx.build(&mutation.statement(&self.target.name, &self.target.key_column, &keys));
        debug!(sql = %sql, target = %self.target.name, "closure join mutation");
        storage.execute(&sql)
    }
}

impl ExistenceSource for ClosureJoinRelation {
    fn existence_predicate(
        &self,
        cx: &mut BuildContext,
        outer_alias: &str,
        comparison: Comparison,
    ) -> Result<String, ClosureError> {
        let outer_key = qualified(outer_alias, &self.closure.table().key_column);
        let root_column = self.closure.path().root_column.clone();
        cx.nested(|cx| -> Result<String, ClosureError> {
            let (member, cte) = self.closure.register_unrooted(cx)?;
            let aliases = JoinAliases {
                member,
                pivot: cx.next_alias("__closure_hash"),
                target: cx.next_alias("__closure_hash"),
                derived: cx.next_alias("__closure_pivot"),
            };
            let correlation = format!("{} = {outer_key}", qualified(&aliases.derived, &root_column));
            let from = self.target_from(cx, &cte, &aliases, vec![correlation])?;
            let body = format!("SELECT {}\n{from}", existence::select_list(comparison));
            Ok(existence::wrap(&cx.build(&body), comparison))
        })
    }
}

impl EagerLoad for ClosureJoinRelation {
    fn parent_key_column(&self) -> &str {
        &self.closure.table().key_column
    }

    fn per_root_limit(&self) -> Option<u64> {
        self.constraints.limit
    }

    fn max_keys_per_query(&self) -> usize {
        self.closure.config().max_keys_per_query
    }

    fn eager_rows<S: Storage + ?Sized>(
        &self,
        storage: &mut S,
        roots: &[Key],
    ) -> Result<Vec<(Key, Record)>, ClosureError> {
        self.fetch(storage, roots, false)
    }
}
