//! Table and association definitions.
//!
//! Definitions are validated when a relation is constructed, so a missing
//! key, parent or pivot column surfaces as a configuration error before any
//! query is sent.

use std::sync::Arc;

use crate::closure::scope::{IntermediateScope, ScopeSet, SoftDeletingScope};
use crate::error::ClosureError;

fn require_ident(what: &str, value: &str) -> Result<(), ClosureError> {
    if value.trim().is_empty() {
        return Err(ClosureError::config(format!("{what} must not be empty")));
    }
    Ok(())
}

/// A self-referencing (adjacency-list) table.
#[derive(Debug, Clone)]
pub struct HierarchyTable {
    pub name: String,
    pub key_column: String,
    pub parent_column: String,
    /// Soft-delete marker; NULL means live.
    pub tombstone_column: Option<String>,
    /// Intermediate scopes every relation over this table starts with.
    pub default_scopes: ScopeSet,
}

impl HierarchyTable {
    pub fn new(
        name: impl Into<String>,
        key_column: impl Into<String>,
        parent_column: impl Into<String>,
    ) -> Self {
        HierarchyTable {
            name: name.into(),
            key_column: key_column.into(),
            parent_column: parent_column.into(),
            tombstone_column: None,
            default_scopes: ScopeSet::new(),
        }
    }

    /// Enable soft deletes. Also installs [`SoftDeletingScope`] as a default
    /// intermediate scope.
    pub fn with_tombstone(mut self, column: impl Into<String>) -> Self {
        self.tombstone_column = Some(column.into());
        self.default_scopes
            .insert(SoftDeletingScope::NAME, Arc::new(SoftDeletingScope));
        self
    }

    pub fn with_default_scope(
        mut self,
        name: impl Into<String>,
        scope: impl IntermediateScope + 'static,
    ) -> Self {
        self.default_scopes.insert(name, Arc::new(scope));
        self
    }

    pub fn validate(&self) -> Result<(), ClosureError> {
        require_ident("hierarchy table name", &self.name)?;
        require_ident(
            &format!("key column of \"{}\"", self.name),
            &self.key_column,
        )?;
        require_ident(
            &format!("parent column of \"{}\"", self.name),
            &self.parent_column,
        )?;
        if self.key_column == self.parent_column {
            return Err(ClosureError::config(format!(
                "\"{}\": key and parent column are both \"{}\"",
                self.name, self.key_column
            )));
        }
        if let Some(tombstone) = &self.tombstone_column {
            require_ident(&format!("tombstone column of \"{}\"", self.name), tombstone)?;
        }
        Ok(())
    }
}

/// The entity a closure join reaches.
#[derive(Debug, Clone)]
pub struct TargetTable {
    pub name: String,
    pub key_column: String,
    pub tombstone_column: Option<String>,
}

impl TargetTable {
    pub fn new(name: impl Into<String>, key_column: impl Into<String>) -> Self {
        TargetTable {
            name: name.into(),
            key_column: key_column.into(),
            tombstone_column: None,
        }
    }

    pub fn with_tombstone(mut self, column: impl Into<String>) -> Self {
        self.tombstone_column = Some(column.into());
        self
    }

    pub fn validate(&self) -> Result<(), ClosureError> {
        require_ident("target table name", &self.name)?;
        require_ident(&format!("key column of \"{}\"", self.name), &self.key_column)?;
        if let Some(tombstone) = &self.tombstone_column {
            require_ident(&format!("tombstone column of \"{}\"", self.name), tombstone)?;
        }
        Ok(())
    }
}

/// How closure members reach target rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinDefinition {
    /// Through an association table holding one row per (member, target)
    /// pair.
    BelongsToMany {
        pivot_table: String,
        /// Pivot column referencing the hierarchy key.
        foreign_pivot_key: String,
        /// Pivot column referencing the target key.
        related_pivot_key: String,
    },
    /// Target rows reference a hierarchy row directly.
    HasMany { foreign_key: String },
}

impl JoinDefinition {
    pub fn belongs_to_many(
        pivot_table: impl Into<String>,
        foreign_pivot_key: impl Into<String>,
        related_pivot_key: impl Into<String>,
    ) -> Self {
        JoinDefinition::BelongsToMany {
            pivot_table: pivot_table.into(),
            foreign_pivot_key: foreign_pivot_key.into(),
            related_pivot_key: related_pivot_key.into(),
        }
    }

    pub fn has_many(foreign_key: impl Into<String>) -> Self {
        JoinDefinition::HasMany {
            foreign_key: foreign_key.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ClosureError> {
        match self {
            JoinDefinition::BelongsToMany {
                pivot_table,
                foreign_pivot_key,
                related_pivot_key,
            } => {
                require_ident("pivot table name", pivot_table)?;
                require_ident("foreign pivot key", foreign_pivot_key)?;
                require_ident("related pivot key", related_pivot_key)?;
                if foreign_pivot_key == related_pivot_key {
                    return Err(ClosureError::config(format!(
                        "\"{pivot_table}\": foreign and related pivot keys are both \"{foreign_pivot_key}\""
                    )));
                }
                Ok(())
            }
            JoinDefinition::HasMany { foreign_key } => require_ident("foreign key", foreign_key),
        }
    }
}
