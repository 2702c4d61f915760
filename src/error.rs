//! Error types for adjacency_closure.
//!
//! All errors that can occur while building or running a closure relation are
//! represented by [`ClosureError`]. Errors are propagated via
//! `Result<T, ClosureError>` throughout the crate.
//!
//! # Error Classification
//!
//! Errors are classified into three categories:
//! - **Configuration** — a relation, table definition or config value is
//!   unusable. Always raised while the query is being built, before any
//!   round-trip to the storage engine.
//! - **Storage** — the storage round-trip failed or returned something that
//!   could not be decoded. Driver errors are carried unmodified; this crate
//!   never retries them.
//! - **Internal** — bugs.
//!
//! A traversal branch cut short by the cycle guard and the removal of an
//! unknown intermediate scope are not errors.

use std::fmt;

/// Primary error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum ClosureError {
    // ── Configuration errors — raised at build time ──────────────────────
    /// A table, join or config definition is missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The requested operation cannot be expressed for this storage engine.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    // ── Storage errors — propagated unmodified ──────────────────────────
    /// SQLite driver error.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// PostgreSQL driver error.
    #[error(transparent)]
    Postgres(#[from] postgres::Error),

    /// A result row did not carry a value this crate relies on.
    #[error("decode error: {0}")]
    Decode(String),

    // ── Internal errors — should not happen ──────────────────────────────
    /// An unexpected internal error. Indicates a bug.
    #[error("internal error: {0}")]
    InternalError(String),
}

/// Classification of error kind for callers that branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosureErrorKind {
    Configuration,
    Storage,
    Internal,
}

impl fmt::Display for ClosureErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClosureErrorKind::Configuration => write!(f, "CONFIGURATION"),
            ClosureErrorKind::Storage => write!(f, "STORAGE"),
            ClosureErrorKind::Internal => write!(f, "INTERNAL"),
        }
    }
}

impl ClosureError {
    /// Classify the error.
    pub fn kind(&self) -> ClosureErrorKind {
        match self {
            ClosureError::Configuration(_) | ClosureError::Unsupported(_) => {
                ClosureErrorKind::Configuration
            }

            ClosureError::Sqlite(_) | ClosureError::Postgres(_) | ClosureError::Decode(_) => {
                ClosureErrorKind::Storage
            }

            ClosureError::InternalError(_) => ClosureErrorKind::Internal,
        }
    }

    /// Whether the error was raised before anything was sent to storage.
    pub fn is_build_time(&self) -> bool {
        self.kind() == ClosureErrorKind::Configuration
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        ClosureError::Configuration(msg.into())
    }
}
