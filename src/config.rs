//! Configuration for closure relations.
//!
//! A [`ClosureConfig`] is attached to every relation when it is constructed.
//! All fields have defaults, so an empty JSON object is a valid config. The
//! synthesized column names must not collide with real columns of the
//! hierarchy table; the defaults use a `__closure_` prefix for that reason.

use serde::{Deserialize, Serialize};

use crate::error::ClosureError;

/// Default name of the recursive CTE.
pub const DEFAULT_CTE_NAME: &str = "__closure_tree";

/// Default name of the synthesized depth column.
pub const DEFAULT_DEPTH_COLUMN: &str = "__closure_depth";

/// Default name of the synthesized path column.
pub const DEFAULT_PATH_COLUMN: &str = "__closure_path";

/// Default name of the synthesized root-marker column.
pub const DEFAULT_ROOT_COLUMN: &str = "__closure_root";

/// Default number of keys sent in a single `IN (...)` list.
pub const DEFAULT_MAX_KEYS_PER_QUERY: usize = 1000;

/// How the closure is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Native `WITH RECURSIVE` when the storage engine supports it,
    /// iterative otherwise.
    #[default]
    Auto,
    /// Always `WITH RECURSIVE`; fails on engines without recursive queries.
    Native,
    /// Walk the hierarchy one level per round-trip in the host process.
    Iterative,
}

/// Settings shared by every relation built with them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClosureConfig {
    /// Name of the recursive CTE. Nested closures get a numeric suffix.
    pub cte_name: String,
    /// Synthesized depth column (0 = root).
    pub depth_column: String,
    /// Synthesized path column (`/1/2/4/`).
    pub path_column: String,
    /// Synthesized root-marker column used to partition batched results.
    pub root_column: String,
    /// Delimiter between keys in the path column.
    pub path_separator: char,
    /// Depth limit applied to new relations. `None` means unbounded.
    pub max_depth: Option<u32>,
    /// Native or iterative evaluation.
    pub execution: ExecutionMode,
    /// Largest key list sent in one statement. Larger root sets and level
    /// frontiers are split into chunks.
    pub max_keys_per_query: usize,
}

impl Default for ClosureConfig {
    fn default() -> Self {
        Self {
            cte_name: DEFAULT_CTE_NAME.to_string(),
            depth_column: DEFAULT_DEPTH_COLUMN.to_string(),
            path_column: DEFAULT_PATH_COLUMN.to_string(),
            root_column: DEFAULT_ROOT_COLUMN.to_string(),
            path_separator: '/',
            max_depth: None,
            execution: ExecutionMode::Auto,
            max_keys_per_query: DEFAULT_MAX_KEYS_PER_QUERY,
        }
    }
}

impl ClosureConfig {
    /// Parse and validate a JSON config document.
    pub fn from_json(json: &str) -> Result<Self, ClosureError> {
        let config: ClosureConfig = serde_json::from_str(json)
            .map_err(|e| ClosureError::config(format!("invalid closure config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the settings can produce a well-formed query.
    pub fn validate(&self) -> Result<(), ClosureError> {
        let names = [
            ("cte_name", &self.cte_name),
            ("depth_column", &self.depth_column),
            ("path_column", &self.path_column),
            ("root_column", &self.root_column),
        ];
        for (field, value) in names {
            if value.trim().is_empty() {
                return Err(ClosureError::config(format!("{field} must not be empty")));
            }
        }

        let synthesized = [&self.depth_column, &self.path_column, &self.root_column];
        for (i, a) in synthesized.iter().enumerate() {
            if synthesized[i + 1..].contains(a) {
                return Err(ClosureError::config(format!(
                    "synthesized column \"{a}\" is used twice"
                )));
            }
        }

        // Keys are rendered as decimal integers, possibly negative.
        let sep = self.path_separator;
        if !sep.is_ascii_punctuation() || sep == '-' || sep == '\'' {
            return Err(ClosureError::config(format!(
                "path_separator {sep:?} must be ASCII punctuation other than '-' and '''"
            )));
        }

        if self.max_keys_per_query == 0 {
            return Err(ClosureError::config("max_keys_per_query must be at least 1"));
        }

        Ok(())
    }

    pub fn with_execution(mut self, execution: ExecutionMode) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    pub fn with_max_keys_per_query(mut self, max_keys: usize) -> Self {
        self.max_keys_per_query = max_keys;
        self
    }
}
