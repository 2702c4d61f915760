//! Ancestors / descendants of a hierarchy row as a relation.
//!
//! ```text
//! ClosureRelation::descendants(users, 1)?     configure (any number of times)
//!     .with_trashed_descendants()                 │
//!     .breadth_first()                            ▼
//!     .get(&mut conn)?                         terminal (consumes the relation)
//! ```
//!
//! Configuration methods take and return the relation; terminal methods
//! consume it. A different configuration needs a new or cloned relation.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::closure::builder::{RecursiveQueryBuilder, Roots};
use crate::closure::executor;
use crate::closure::path::{PathState, TraversalDirection};
use crate::closure::scope::{IntermediateScope, ScopeRegistry, ScopeSet, SoftDeletingScope};
use crate::closure::ClosureResult;
use crate::config::ClosureConfig;
use crate::error::ClosureError;
use crate::query::{Comparison, Condition, Constraints, OrderBy, SortOrder};
use crate::record::{Key, Record};
use crate::relation::batch::EagerLoad;
use crate::relation::existence::{self, ExistenceSource};
use crate::relation::{Mutation, distinct_by_key, tombstone_now};
use crate::sql::{
    BuildContext, qualified, quote_ident, quote_literal, render_value, table_ref, where_clause,
};
use crate::storage::Storage;
use crate::table::HierarchyTable;

/// Closure of one or more roots over a self-referencing table.
#[derive(Debug, Clone)]
pub struct ClosureRelation {
    table: Arc<HierarchyTable>,
    roots: Option<Vec<Key>>,
    path: PathState,
    registry: ScopeRegistry,
    constraints: Constraints,
    with_trashed: bool,
    config: ClosureConfig,
    /// Set by `with_max_depth`; outlives config replacement.
    max_depth: Option<u32>,
}

impl ClosureRelation {
    /// An unbound relation. Bind roots with [`for_root`](Self::for_root) or
    /// use it as a template for existence predicates and eager loading.
    pub fn new(
        table: impl Into<Arc<HierarchyTable>>,
        direction: TraversalDirection,
        include_self: bool,
    ) -> Result<Self, ClosureError> {
        let table = table.into();
        table.validate()?;
        let config = ClosureConfig::default();
        let path = PathState::new(direction, include_self, &table, &config);
        Ok(ClosureRelation {
            table,
            roots: None,
            path,
            registry: ScopeRegistry::new(),
            constraints: Constraints::default(),
            with_trashed: false,
            config,
            max_depth: None,
        })
    }

    pub fn ancestors(table: impl Into<Arc<HierarchyTable>>, root: Key) -> Result<Self, ClosureError> {
        Ok(Self::new(table, TraversalDirection::Ancestors, false)?.for_root(root))
    }

    pub fn ancestors_and_self(
        table: impl Into<Arc<HierarchyTable>>,
        root: Key,
    ) -> Result<Self, ClosureError> {
        Ok(Self::new(table, TraversalDirection::Ancestors, true)?.for_root(root))
    }

    pub fn descendants(
        table: impl Into<Arc<HierarchyTable>>,
        root: Key,
    ) -> Result<Self, ClosureError> {
        Ok(Self::new(table, TraversalDirection::Descendants, false)?.for_root(root))
    }

    pub fn descendants_and_self(
        table: impl Into<Arc<HierarchyTable>>,
        root: Key,
    ) -> Result<Self, ClosureError> {
        Ok(Self::new(table, TraversalDirection::Descendants, true)?.for_root(root))
    }

    pub fn for_root(self, root: Key) -> Self {
        self.for_roots([root])
    }

    /// Bind several roots. Duplicates are dropped, order is kept.
    pub fn for_roots(mut self, roots: impl IntoIterator<Item = Key>) -> Self {
        let mut unique: Vec<Key> = Vec::new();
        for key in roots {
            if !unique.contains(&key) {
                unique.push(key);
            }
        }
        self.roots = Some(unique);
        self
    }

    /// Replace the config. A depth limit set with
    /// [`with_max_depth`](Self::with_max_depth) takes precedence over the
    /// config's.
    pub fn with_config(mut self, config: ClosureConfig) -> Result<Self, ClosureError> {
        config.validate()?;
        for column in [
            &config.depth_column,
            &config.path_column,
            &config.root_column,
        ] {
            if *column == self.table.key_column || *column == self.table.parent_column {
                return Err(ClosureError::config(format!(
                    "synthesized column \"{column}\" collides with a column of \"{}\"",
                    self.table.name
                )));
            }
        }
        self.path = PathState::new(self.path.direction, self.path.include_self, &self.table, &config);
        if self.max_depth.is_some() {
            self.path.max_depth = self.max_depth;
        }
        self.config = config;
        Ok(self)
    }

    // ── Intermediate scopes ────────────────────────────────────────

    /// Add or replace the scope registered under `name`.
    pub fn with_intermediate_scope(
        mut self,
        name: impl Into<String>,
        scope: impl IntermediateScope + 'static,
    ) -> Self {
        self.registry.add(name, Arc::new(scope));
        self
    }

    pub fn without_intermediate_scope(mut self, name: &str) -> Self {
        self.registry.remove(name);
        self
    }

    /// Remove every effective scope with the same type tag as `scope`.
    pub fn without_intermediate_scope_instance(mut self, scope: &dyn IntermediateScope) -> Self {
        self.registry.remove_kind(scope.kind(), &self.table.default_scopes);
        self
    }

    pub fn without_intermediate_scopes(mut self) -> Self {
        self.registry.clear(&self.table.default_scopes);
        self
    }

    /// Let the traversal pass through tombstoned rows.
    pub fn with_trashed_descendants(self) -> Self {
        self.without_intermediate_scope_instance(&SoftDeletingScope)
    }

    /// Scopes the recursive leg will apply.
    pub fn intermediate_scopes(&self) -> ScopeSet {
        self.registry.merge(&self.table.default_scopes)
    }

    pub fn removed_intermediate_scopes(&self) -> &[String] {
        self.registry.removed()
    }

    // ── Constraints ────────────────────────────────────────────────

    /// Include tombstoned rows in the result.
    pub fn with_trashed(mut self) -> Self {
        self.with_trashed = true;
        self
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = Some(max_depth);
        self.path.max_depth = Some(max_depth);
        self
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.constraints.wheres.push(condition);
        self
    }

    /// Keep rows for which `relation` matches `comparison` times.
    pub fn where_has(
        self,
        relation: impl ExistenceSource + 'static,
        comparison: Comparison,
    ) -> Self {
        self.filter(Condition::has(relation, comparison))
    }

    pub fn has(self, relation: impl ExistenceSource + 'static) -> Self {
        self.where_has(relation, Comparison::default())
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

    /// Order by depth.
    pub fn breadth_first(mut self) -> Self {
        self.constraints.orders.push(OrderBy::Depth(SortOrder::Asc));
        self
    }

    /// Order by path, which keeps every subtree contiguous.
    pub fn depth_first(mut self) -> Self {
        self.constraints.orders.push(OrderBy::Path(SortOrder::Asc));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.constraints.limit = Some(limit);
        self
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn table(&self) -> &HierarchyTable {
        &self.table
    }

    pub fn path(&self) -> &PathState {
        &self.path
    }

    pub fn config(&self) -> &ClosureConfig {
        &self.config
    }

    pub fn roots(&self) -> Option<&[Key]> {
        self.roots.as_deref()
    }

    // ── Terminal operations ────────────────────────────────────────

    /// Distinct rows of the closure. A row reachable from several bound
    /// roots is returned once, at its first position; the limit counts
    /// distinct rows.
    pub fn get<S: Storage + ?Sized>(self, storage: &mut S) -> Result<Vec<Record>, ClosureError> {
        let roots = self.bound_roots()?.to_vec();
        if roots.len() == 1 {
            return Ok(self.fetch(storage, &roots, true)?.records);
        }
        let rows = self.fetch(storage, &roots, false)?.records;
        distinct_by_key(rows, &self.table.key_column, self.constraints.limit)
    }

    /// Rows together with their depth, path and root. Unlike [`get`](Self::get)
    /// this keeps one row per `(root, row)`, so overlapping roots repeat the
    /// shared rows with different trails, and the limit counts those rows.
    pub fn get_with_trails<S: Storage + ?Sized>(
        self,
        storage: &mut S,
    ) -> Result<ClosureResult, ClosureError> {
        let roots = self.bound_roots()?.to_vec();
        self.fetch(storage, &roots, true)
    }

    /// Soft delete (tombstone) when the table supports it, physical delete
    /// otherwise. Returns the number of affected rows.
    pub fn delete<S: Storage + ?Sized>(self, storage: &mut S) -> Result<u64, ClosureError> {
        let mutation = match &self.table.tombstone_column {
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

    pub(crate) fn bound_roots(&self) -> Result<&[Key], ClosureError> {
        self.roots.as_deref().ok_or_else(|| {
            ClosureError::config(format!(
                "{} relation over \"{}\" has no root key",
                self.path.direction.as_str(),
                self.table.name
            ))
        })
    }

    /// Register the closure CTE for `roots` in `cx`. `false` means the
    /// closure is known to be empty.
    pub(crate) fn register<S: Storage + ?Sized>(
        &self,
        storage: &mut S,
        cx: &mut BuildContext,
        roots: &[Key],
    ) -> Result<bool, ClosureError> {
        let scopes = self.intermediate_scopes();
        let builder = RecursiveQueryBuilder::new(&self.table, &self.path, &scopes);
        executor::register_closure(
            storage,
            cx,
            &builder,
            &self.path,
            &self.config.cte_name,
            roots,
            self.config.max_keys_per_query,
        )
    }

    /// Register the closure seeded from every row, aliasing the table and
    /// the CTE with fresh names. Returns `(alias, cte_name)`.
    pub(crate) fn register_unrooted(
        &self,
        cx: &mut BuildContext,
    ) -> Result<(String, String), ClosureError> {
        if !cx.recursive_queries() {
            return Err(ClosureError::Unsupported(
                "existence predicates need a storage engine with recursive queries".into(),
            ));
        }
        let alias = cx.next_alias("__closure_hash");
        let cte = cx.next_alias(&self.config.cte_name);
        let scopes = self.intermediate_scopes();
        RecursiveQueryBuilder::new(&self.table, &self.path, &scopes)
            .with_table_alias(alias.clone())
            .build(cx, &cte, &Roots::All)?
            .register(cx);
        Ok((alias, cte))
    }

    /// Filters of the final projection over closure rows named `alias`.
    pub(crate) fn projection_filters(
        &self,
        cx: &mut BuildContext,
        alias: &str,
        apply_tombstone: bool,
    ) -> Result<Vec<String>, ClosureError> {
        let mut filters = Vec::new();
        if !self.path.include_self {
            filters.push(format!("{} > 0", qualified(alias, &self.path.depth_column)));
        }
        if apply_tombstone && !self.with_trashed {
            if let Some(column) = &self.table.tombstone_column {
                filters.push(format!("{} IS NULL", qualified(alias, column)));
            }
        }
        filters.extend(self.constraints.render_wheres(cx, alias)?);
        Ok(filters)
    }

    fn fetch<S: Storage + ?Sized>(
        &self,
        storage: &mut S,
        roots: &[Key],
        with_limit: bool,
    ) -> Result<ClosureResult, ClosureError> {
        let plan = executor::plan(&self.config, storage)?;
        let mut cx = executor::context(storage, plan);
        if !self.register(storage, &mut cx, roots)? {
            return Ok(ClosureResult::default());
        }

        let alias = self.table.name.as_str();
        let filters = self.projection_filters(&mut cx, alias, true)?;
        let limit = if with_limit {
            self.constraints.render_limit()
        } else {
            String::new()
        };
        let body = format!(
            "SELECT {}.*\nFROM {}{}{}{limit}",
            quote_ident(alias),
            table_ref(&self.config.cte_name, alias),
            where_clause(&filters),
            self.constraints.render_order(alias, Some(&self.path))?,
        );
        let sql = cx.build(&body);
        debug!(
            sql = %sql,
            direction = self.path.direction.as_str(),
            roots = roots.len(),
            "closure select"
        );

        let rows = storage.select(&sql)?;
        let mut result = ClosureResult {
            records: Vec::with_capacity(rows.len()),
            trails: Vec::with_capacity(rows.len()),
        };
        for mut record in rows {
            let trail = self.path.extract_trail(&mut record)?;
            result.records.push(record);
            result.trails.push(trail);
        }
        Ok(result)
    }

    fn mutate<S: Storage + ?Sized>(
        self,
        storage: &mut S,
        mutation: Mutation,
    ) -> Result<u64, ClosureError> {
        let roots = self.bound_roots()?.to_vec();
        let plan = executor::plan(&self.config, storage)?;
        let mut cx = executor::context(storage, plan);
        if !self.register(storage, &mut cx, &roots)? {
            return Ok(0);
        }

        let alias = self.table.name.as_str();
        let filters = self.projection_filters(&mut cx, alias, true)?;
        let keys = format!(
            "SELECT {}\nFROM {}{}",
            qualified(alias, &self.table.key_column),
            table_ref(&self.config.cte_name, alias),
            where_clause(&filters)
        );
        let sql = cx.build(&mutation.statement(&self.table.name, &self.table.key_column, &keys));
        debug!(sql = %sql, "closure mutation");
        storage.execute(&sql)
    }
}

impl ExistenceSource for ClosureRelation {
    fn existence_predicate(
        &self,
        cx: &mut BuildContext,
        outer_alias: &str,
        comparison: Comparison,
    ) -> Result<String, ClosureError> {
        let outer_key = qualified(outer_alias, &self.table.key_column);
        cx.nested(|cx| -> Result<String, ClosureError> {
            let (alias, cte) = self.register_unrooted(cx)?;
            let mut filters = vec![format!(
                "{} = {outer_key}",
                qualified(&alias, &self.path.root_column)
            )];
            filters.extend(self.projection_filters(cx, &alias, true)?);
            let body = format!(
                "SELECT {}\nFROM {}{}",
                existence::select_list(comparison),
                table_ref(&cte, &alias),
                where_clause(&filters)
            );
            Ok(existence::wrap(&cx.build(&body), comparison))
        })
    }
}

impl EagerLoad for ClosureRelation {
    fn parent_key_column(&self) -> &str {
        &self.table.key_column
    }

    fn per_root_limit(&self) -> Option<u64> {
        self.constraints.limit
    }

    fn max_keys_per_query(&self) -> usize {
        self.config.max_keys_per_query
    }

    fn eager_rows<S: Storage + ?Sized>(
        &self,
        storage: &mut S,
        roots: &[Key],
    ) -> Result<Vec<(Key, Record)>, ClosureError> {
        let result = self.fetch(storage, roots, false)?;
        Ok(result
            .trails
            .into_iter()
            .map(|t| t.root)
            .zip(result.records)
            .collect())
    }
}
