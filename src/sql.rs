//! SQL text helpers and the per-statement build context.
//!
//! Statements are assembled as text. Identifiers are always double-quoted
//! and literals single-quoted, so the same output is accepted by SQLite and
//! PostgreSQL. The few constructs that differ between the two live on
//! [`Dialect`].
//!
//! [`BuildContext`] accumulates CTE definitions for one statement and hands
//! out unique aliases, so nested closures (existence predicates inside a
//! closure's own projection) never collide.

use serde_json::Value;

use crate::record::Key;

/// SQL grammar of the storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// `CAST(expr AS TEXT)`.
    pub fn cast_text(self, expr: &str) -> String {
        format!("CAST({expr} AS TEXT)")
    }

    /// 1-based position of `needle` in `haystack`, 0 when absent.
    pub fn position(self, haystack: &str, needle: &str) -> String {
        match self {
            Dialect::Sqlite => format!("instr({haystack}, {needle})"),
            Dialect::Postgres => format!("strpos({haystack}, {needle})"),
        }
    }
}

/// Accumulated CTEs and alias counter for a single statement.
#[derive(Debug)]
pub struct BuildContext {
    dialect: Dialect,
    native_recursion: bool,
    recursive_queries: bool,
    alias_counter: usize,
    /// `(name, sql, is_recursive)`; `name` may carry a column list.
    ctes: Vec<(String, String, bool)>,
}

impl BuildContext {
    pub fn new(dialect: Dialect, native_recursion: bool) -> Self {
        BuildContext {
            dialect,
            native_recursion,
            recursive_queries: native_recursion,
            alias_counter: 0,
            ctes: Vec::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Whether this statement's closure is evaluated by the storage engine.
    pub fn native_recursion(&self) -> bool {
        self.native_recursion
    }

    /// Record whether the storage engine accepts `WITH RECURSIVE` at all,
    /// even when the closure itself is walked on the host.
    pub fn with_recursive_queries(mut self, supported: bool) -> Self {
        self.recursive_queries = supported || self.native_recursion;
        self
    }

    /// Whether nested recursive CTEs (existence predicates) may be emitted.
    pub fn recursive_queries(&self) -> bool {
        self.recursive_queries
    }

    /// Generate a unique alias with a descriptive prefix.
    pub fn next_alias(&mut self, prefix: &str) -> String {
        self.alias_counter += 1;
        format!("{}_{}", prefix, self.alias_counter)
    }

    /// Add a CTE definition.
    pub fn add_cte(&mut self, name: String, sql: String) {
        self.ctes.push((name, sql, false));
    }

    /// Add a recursive CTE definition (requires `WITH RECURSIVE`).
    pub fn add_recursive_cte(&mut self, name: String, sql: String) {
        self.ctes.push((name, sql, true));
    }

    pub fn has_ctes(&self) -> bool {
        !self.ctes.is_empty()
    }

    /// The `WITH` prefix for the accumulated CTEs, or an empty string.
    pub fn with_clause(&self) -> String {
        if self.ctes.is_empty() {
            return String::new();
        }

        let has_recursive = self.ctes.iter().any(|(_, _, is_rec)| *is_rec);
        let with_keyword = if has_recursive {
            "WITH RECURSIVE"
        } else {
            "WITH"
        };

        let cte_defs: Vec<String> = self
            .ctes
            .iter()
            .map(|(name, sql, _)| format!("{name} AS (\n{sql}\n)"))
            .collect();

        format!("{with_keyword} {}\n", cte_defs.join(",\n"))
    }

    /// Prefix `body` (a SELECT, UPDATE or DELETE) with the accumulated CTEs.
    pub fn build(&self, body: &str) -> String {
        format!("{}{body}", self.with_clause())
    }

    /// Run `f` with an empty CTE list, restoring the outer list afterwards.
    ///
    /// The alias counter keeps counting across the nesting, so aliases
    /// generated inside `f` are unique within the whole statement.
    pub fn nested<T>(&mut self, f: impl FnOnce(&mut BuildContext) -> T) -> T {
        let outer = std::mem::take(&mut self.ctes);
        let result = f(self);
        self.ctes = outer;
        result
    }
}

/// Helper: quote a SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Helper: quote a string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Helper: `"alias"."column"`.
pub fn qualified(alias: &str, column: &str) -> String {
    format!("{}.{}", quote_ident(alias), quote_ident(column))
}

/// Helper: `"table"` or `"table" AS "alias"` when the two differ.
pub fn table_ref(table: &str, alias: &str) -> String {
    if table == alias {
        quote_ident(table)
    } else {
        format!("{} AS {}", quote_ident(table), quote_ident(alias))
    }
}

/// Helper: build a comma-separated list of integer keys.
pub fn key_list(keys: &[Key]) -> String {
    keys.iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Helper: render a JSON value as a SQL literal.
///
/// Arrays and objects are stored as their JSON text.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_literal(s),
        Value::Array(_) | Value::Object(_) => quote_literal(&value.to_string()),
    }
}

/// Helper: join predicates with `AND`, or `None` when there are none.
pub fn and_all(predicates: &[String]) -> Option<String> {
    if predicates.is_empty() {
        None
    } else {
        Some(predicates.join("\n  AND "))
    }
}

/// Helper: ` WHERE a AND b` or an empty string.
pub fn where_clause(predicates: &[String]) -> String {
    match and_all(predicates) {
        Some(joined) => format!("\nWHERE {joined}"),
        None => String::new(),
    }
}
