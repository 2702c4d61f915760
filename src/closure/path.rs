//! Per-query traversal metadata and the synthesized path/depth columns.

use serde_json::Value;

use crate::config::ClosureConfig;
use crate::error::ClosureError;
use crate::record::{Key, Record};
use crate::sql::{Dialect, qualified, quote_literal};
use crate::table::HierarchyTable;

/// Which way the recursive leg walks the parent reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalDirection {
    Ancestors,
    Descendants,
}

impl TraversalDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            TraversalDirection::Ancestors => "ancestors",
            TraversalDirection::Descendants => "descendants",
        }
    }
}

/// Side-channel metadata of one closure row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trail {
    /// Root key the row was reached from.
    pub root: Key,
    /// Edges between the root and the row; 0 for the root itself.
    pub depth: u32,
    /// Keys from the root to the row, both included.
    pub path: Vec<Key>,
}

impl Trail {
    pub fn seed(key: Key) -> Self {
        Trail {
            root: key,
            depth: 0,
            path: vec![key],
        }
    }

    /// The row this trail ends at.
    pub fn key(&self) -> Key {
        self.path.last().copied().unwrap_or(self.root)
    }

    /// Extend by one edge, or `None` when `key` is already on the path.
    pub fn extend(&self, key: Key) -> Option<Trail> {
        if self.path.contains(&key) {
            return None;
        }
        let mut path = self.path.clone();
        path.push(key);
        Some(Trail {
            root: self.root,
            depth: self.depth + 1,
            path,
        })
    }
}

/// Immutable description of one traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathState {
    pub direction: TraversalDirection,
    pub include_self: bool,
    pub max_depth: Option<u32>,
    pub key_column: String,
    pub parent_column: String,
    pub depth_column: String,
    pub path_column: String,
    pub root_column: String,
    pub separator: char,
}

impl PathState {
    pub fn new(
        direction: TraversalDirection,
        include_self: bool,
        table: &HierarchyTable,
        config: &ClosureConfig,
    ) -> Self {
        PathState {
            direction,
            include_self,
            max_depth: config.max_depth,
            key_column: table.key_column.clone(),
            parent_column: table.parent_column.clone(),
            depth_column: config.depth_column.clone(),
            path_column: config.path_column.clone(),
            root_column: config.root_column.clone(),
            separator: config.path_separator,
        }
    }

    pub fn with_max_depth(mut self, max_depth: Option<u32>) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Column of a visited row that the next level is joined on.
    pub fn link_column(&self) -> &str {
        match self.direction {
            TraversalDirection::Descendants => &self.key_column,
            TraversalDirection::Ancestors => &self.parent_column,
        }
    }

    /// Column of a candidate row matched against the link.
    pub fn next_column(&self) -> &str {
        match self.direction {
            TraversalDirection::Descendants => &self.parent_column,
            TraversalDirection::Ancestors => &self.key_column,
        }
    }

    pub fn synthesized_columns(&self) -> [&str; 3] {
        [&self.depth_column, &self.path_column, &self.root_column]
    }

    fn separator_literal(&self) -> String {
        quote_literal(&self.separator.to_string())
    }

    fn key_text(&self, dialect: Dialect, alias: &str) -> String {
        dialect.cast_text(&qualified(alias, &self.key_column))
    }

    /// Path expression of a seeded row: `'/' || key || '/'`.
    pub fn seed_path_sql(&self, dialect: Dialect, alias: &str) -> String {
        let sep = self.separator_literal();
        format!("{sep} || {} || {sep}", self.key_text(dialect, alias))
    }

    /// Path expression of a row reached from `prev`.
    pub fn extend_path_sql(&self, dialect: Dialect, prev: &str, alias: &str) -> String {
        format!(
            "{} || {} || {}",
            qualified(prev, &self.path_column),
            self.key_text(dialect, alias),
            self.separator_literal()
        )
    }

    /// True when the candidate row's key is not on `prev`'s path.
    pub fn cycle_guard_sql(&self, dialect: Dialect, prev: &str, alias: &str) -> String {
        let needle = self.seed_path_sql(dialect, alias);
        format!(
            "{} = 0",
            dialect.position(&qualified(prev, &self.path_column), &needle)
        )
    }

    pub fn format_path(&self, keys: &[Key]) -> String {
        let sep = self.separator;
        let mut out = String::from(sep);
        for key in keys {
            out.push_str(&key.to_string());
            out.push(sep);
        }
        out
    }

    pub fn parse_path(&self, path: &str) -> Result<Vec<Key>, ClosureError> {
        path.split(self.separator)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<Key>().map_err(|_| {
                    ClosureError::Decode(format!("malformed closure path \"{path}\""))
                })
            })
            .collect()
    }

    /// Strip the synthesized columns from `record` and return them as a
    /// trail.
    pub fn extract_trail(&self, record: &mut Record) -> Result<Trail, ClosureError> {
        let depth = record.take(&self.depth_column);
        let path = record.take(&self.path_column);
        let root = record.take(&self.root_column);

        let depth = depth
            .as_ref()
            .and_then(value_as_i64)
            .and_then(|d| u32::try_from(d).ok())
            .ok_or_else(|| missing(&self.depth_column))?;
        let path = match path {
            Some(Value::String(s)) => self.parse_path(&s)?,
            _ => return Err(missing(&self.path_column)),
        };
        let root = root
            .as_ref()
            .and_then(value_as_i64)
            .ok_or_else(|| missing(&self.root_column))?;

        Ok(Trail { root, depth, path })
    }
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn missing(column: &str) -> ClosureError {
    ClosureError::Decode(format!("closure row has no usable \"{column}\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(direction: TraversalDirection) -> PathState {
        let table = HierarchyTable::new("users", "id", "parent_id");
        PathState::new(direction, false, &table, &ClosureConfig::default())
    }

    #[test]
    fn test_link_columns_follow_direction() {
        let down = state(TraversalDirection::Descendants);
        assert_eq!((down.link_column(), down.next_column()), ("id", "parent_id"));
        let up = state(TraversalDirection::Ancestors);
        assert_eq!((up.link_column(), up.next_column()), ("parent_id", "id"));
    }

    #[test]
    fn test_path_sql() {
        let s = state(TraversalDirection::Descendants);
        assert_eq!(
            s.seed_path_sql(Dialect::Sqlite, "u"),
            "'/' || CAST(\"u\".\"id\" AS TEXT) || '/'"
        );
        assert_eq!(
            s.extend_path_sql(Dialect::Sqlite, "t", "u"),
            "\"t\".\"__closure_path\" || CAST(\"u\".\"id\" AS TEXT) || '/'"
        );
        assert_eq!(
            s.cycle_guard_sql(Dialect::Postgres, "t", "u"),
            "strpos(\"t\".\"__closure_path\", '/' || CAST(\"u\".\"id\" AS TEXT) || '/') = 0"
        );
    }

    #[test]
    fn test_format_and_parse_path() {
        let s = state(TraversalDirection::Descendants);
        assert_eq!(s.format_path(&[1, 2, 4]), "/1/2/4/");
        assert_eq!(s.parse_path("/1/2/4/").unwrap(), vec![1, 2, 4]);
        assert_eq!(s.parse_path("/-3/").unwrap(), vec![-3]);
        assert!(s.parse_path("/1/x/").is_err());
    }

    #[test]
    fn test_custom_separator() {
        let table = HierarchyTable::new("users", "id", "parent_id");
        let config = ClosureConfig {
            path_separator: '.',
            ..ClosureConfig::default()
        };
        let s = PathState::new(TraversalDirection::Descendants, true, &table, &config);
        assert_eq!(s.format_path(&[10, 1]), ".10.1.");
        assert_eq!(s.parse_path(".10.1.").unwrap(), vec![10, 1]);
    }

    #[test]
    fn test_extract_trail_strips_columns() {
        let s = state(TraversalDirection::Descendants);
        let mut record = Record::new();
        record.set("id", 4);
        record.set("__closure_depth", 2);
        record.set("__closure_path", "/1/2/4/");
        record.set("__closure_root", 1);

        let trail = s.extract_trail(&mut record).unwrap();
        assert_eq!(
            trail,
            Trail {
                root: 1,
                depth: 2,
                path: vec![1, 2, 4]
            }
        );
        assert_eq!(trail.key(), 4);
        assert_eq!(record.attributes().len(), 1);
        assert_eq!(record.get("id"), Some(&json!(4)));
    }

    #[test]
    fn test_extract_trail_missing_column() {
        let s = state(TraversalDirection::Descendants);
        let mut record = Record::new();
        record.set("__closure_depth", 0);
        assert!(matches!(
            s.extract_trail(&mut record),
            Err(ClosureError::Decode(_))
        ));
    }

    #[test]
    fn test_trail_extend_refuses_cycles() {
        let t = Trail::seed(1).extend(2).unwrap();
        assert_eq!(t.depth, 1);
        assert!(t.extend(1).is_none());
        assert_eq!(t.extend(3).unwrap().path, vec![1, 2, 3]);
    }
}
