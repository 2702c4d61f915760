//! Intermediate scopes: predicates applied to rows visited by the recursive
//! leg.
//!
//! A scope never touches the initial leg (the roots are always seeded) nor
//! the final projection. It decides which edges the traversal may follow.
//!
//! Defaults live on the table definition as a [`ScopeSet`]. A relation keeps
//! only a [`ScopeRegistry`] delta (additions plus suppressed names), which is
//! merged over the defaults every time a query is built.

use std::fmt;
use std::sync::Arc;

use crate::error::ClosureError;
use crate::query::Condition;
use crate::sql::{BuildContext, qualified};
use crate::table::HierarchyTable;

/// What a scope sees while its predicate is rendered.
pub struct ScopeContext<'a> {
    /// Alias of the hierarchy row being visited.
    pub alias: &'a str,
    pub table: &'a HierarchyTable,
    pub cx: &'a mut BuildContext,
}

/// A predicate unit applied to the recursive leg.
///
/// `kind` is the type tag used by instance-based removal: removing a scope
/// instance removes every effective scope whose tag equals the instance's
/// tag. Tags are compared exactly.
pub trait IntermediateScope: fmt::Debug + Send + Sync {
    fn kind(&self) -> &str;

    /// SQL predicate over `scx.alias`, or `None` when the scope does not
    /// apply to this table.
    fn predicate(&self, scx: &mut ScopeContext<'_>) -> Result<Option<String>, ClosureError>;
}

/// Excludes tombstoned rows from traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftDeletingScope;

impl SoftDeletingScope {
    /// Registry name under which tables with a tombstone column carry this
    /// scope by default.
    pub const NAME: &'static str = "soft_deletes";
    pub const KIND: &'static str = "soft_deleting";
}

impl IntermediateScope for SoftDeletingScope {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn predicate(&self, scx: &mut ScopeContext<'_>) -> Result<Option<String>, ClosureError> {
        Ok(scx
            .table
            .tombstone_column
            .as_deref()
            .map(|col| format!("{} IS NULL", qualified(scx.alias, col))))
    }
}

/// A scope backed by a [`Condition`].
#[derive(Debug, Clone)]
pub struct ConditionScope {
    kind: String,
    condition: Condition,
}

impl ConditionScope {
    pub const KIND: &'static str = "condition";

    pub fn new(condition: Condition) -> Self {
        ConditionScope {
            kind: Self::KIND.to_string(),
            condition,
        }
    }

    /// Override the type tag, so instance removal can target this scope
    /// separately from other condition scopes.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }
}

impl IntermediateScope for ConditionScope {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn predicate(&self, scx: &mut ScopeContext<'_>) -> Result<Option<String>, ClosureError> {
        self.condition.render(scx.cx, scx.alias).map(Some)
    }
}

/// Ordered name → scope mapping. Inserting an existing name replaces the
/// scope in place.
#[derive(Debug, Clone, Default)]
pub struct ScopeSet {
    entries: Vec<(String, Arc<dyn IntermediateScope>)>,
}

impl ScopeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, scope: Arc<dyn IntermediateScope>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = scope,
            None => self.entries.push((name, scope)),
        }
    }

    /// Returns whether the name was present.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| n != name);
        self.entries.len() != before
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn IntermediateScope>> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn IntermediateScope>)> {
        self.entries.iter().map(|(n, s)| (n.as_str(), s))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-relation delta over a table's default scopes.
///
/// A name is never both added and removed: adding cancels an earlier
/// removal and removing cancels an earlier addition. Removing a name that
/// was never added is still recorded, so the default of that name stays
/// suppressed on every merge.
#[derive(Debug, Clone, Default)]
pub struct ScopeRegistry {
    added: ScopeSet,
    removed: Vec<String>,
}

impl ScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, scope: Arc<dyn IntermediateScope>) {
        let name = name.into();
        self.removed.retain(|n| *n != name);
        self.added.insert(name, scope);
    }

    pub fn remove(&mut self, name: &str) {
        self.added.remove(name);
        if !self.removed.iter().any(|n| n == name) {
            self.removed.push(name.to_string());
        }
    }

    /// Remove every effective scope whose tag equals `kind`. No match is a
    /// no-op.
    pub fn remove_kind(&mut self, kind: &str, defaults: &ScopeSet) {
        let matching: Vec<String> = self
            .merge(defaults)
            .iter()
            .filter(|(_, scope)| scope.kind() == kind)
            .map(|(name, _)| name.to_string())
            .collect();
        for name in matching {
            self.remove(&name);
        }
    }

    /// Remove every effective scope, recording each name.
    pub fn clear(&mut self, defaults: &ScopeSet) {
        let names: Vec<String> = self
            .merge(defaults)
            .names()
            .into_iter()
            .map(str::to_string)
            .collect();
        for name in names {
            self.remove(&name);
        }
    }

    pub fn added(&self) -> &ScopeSet {
        &self.added
    }

    pub fn removed(&self) -> &[String] {
        &self.removed
    }

    /// Effective scopes: defaults without the removed names, then additions.
    pub fn merge(&self, defaults: &ScopeSet) -> ScopeSet {
        let mut merged = ScopeSet::new();
        for (name, scope) in defaults.iter() {
            if !self.removed.iter().any(|n| n == name) {
                merged.insert(name, Arc::clone(scope));
            }
        }
        for (name, scope) in self.added.iter() {
            merged.insert(name, Arc::clone(scope));
        }
        merged
    }
}
