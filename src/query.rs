//! Caller-supplied constraints: predicates, ordering and limits.
//!
//! Conditions name bare columns and are qualified with an alias only when
//! rendered. The same condition therefore works on the hierarchy table in a
//! plain query, on the closure CTE aliased as that table, and on the
//! generated aliases used inside existence subqueries.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;

use crate::closure::path::PathState;
use crate::error::ClosureError;
use crate::relation::existence::ExistenceSource;
use crate::sql::{BuildContext, qualified, render_value};

/// Comparison operator used by conditions and existence counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
}

impl Operator {
    pub fn as_sql(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "<>",
            Operator::Lt => "<",
            Operator::LtEq => "<=",
            Operator::Gt => ">",
            Operator::GtEq => ">=",
            Operator::Like => "LIKE",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for Operator {
    type Err = ClosureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "=" | "==" => Ok(Operator::Eq),
            "!=" | "<>" => Ok(Operator::NotEq),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::LtEq),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::GtEq),
            "like" => Ok(Operator::Like),
            other => Err(ClosureError::config(format!("unknown operator \"{other}\""))),
        }
    }
}

/// Count comparison for existence predicates: `count(...) <op> <count>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Comparison {
    pub op: Operator,
    pub count: u64,
}

impl Default for Comparison {
    fn default() -> Self {
        Comparison {
            op: Operator::GtEq,
            count: 1,
        }
    }
}

impl Comparison {
    pub fn new(op: Operator, count: u64) -> Self {
        Comparison { op, count }
    }

    /// `">", 1` style construction.
    pub fn parse(op: &str, count: u64) -> Result<Self, ClosureError> {
        Ok(Comparison::new(op.parse()?, count))
    }

    /// `>= 1`, which is rendered as `EXISTS (...)`.
    pub fn is_plain_exists(&self) -> bool {
        self.op == Operator::GtEq && self.count == 1
    }
}

/// A predicate over one row source.
#[derive(Debug, Clone)]
pub enum Condition {
    Compare {
        column: String,
        op: Operator,
        value: Value,
    },
    In {
        column: String,
        values: Vec<Value>,
    },
    IsNull(String),
    NotNull(String),
    Not(Box<Condition>),
    Any(Vec<Condition>),
    /// SQL inserted verbatim.
    Raw(String),
    /// Correlated existence predicate over another relation.
    Has {
        relation: Arc<dyn ExistenceSource>,
        comparison: Comparison,
    },
}

impl Condition {
    pub fn compare(column: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Condition::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::compare(column, Operator::Eq, value)
    }

    pub fn not_eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::compare(column, Operator::NotEq, value)
    }

    pub fn is_in<V: Into<Value>>(column: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Condition::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has(relation: impl ExistenceSource + 'static, comparison: Comparison) -> Self {
        Condition::Has {
            relation: Arc::new(relation),
            comparison,
        }
    }

    /// Render against the row source named `alias`. Existence predicates
    /// correlate on that alias.
    pub fn render(&self, cx: &mut BuildContext, alias: &str) -> Result<String, ClosureError> {
        match self {
            Condition::Compare { column, op, value } => {
                if value.is_null() {
                    return match op {
                        Operator::Eq => Ok(format!("{} IS NULL", qualified(alias, column))),
                        Operator::NotEq => Ok(format!("{} IS NOT NULL", qualified(alias, column))),
                        _ => Err(ClosureError::config(format!(
                            "cannot compare \"{column}\" {op} NULL"
                        ))),
                    };
                }
                Ok(format!(
                    "{} {} {}",
                    qualified(alias, column),
                    op.as_sql(),
                    render_value(value)
                ))
            }
            Condition::In { column, values } => {
                if values.is_empty() {
                    return Ok("1 = 0".to_string());
                }
                let list = values.iter().map(render_value).collect::<Vec<_>>().join(", ");
                Ok(format!("{} IN ({list})", qualified(alias, column)))
            }
            Condition::IsNull(column) => Ok(format!("{} IS NULL", qualified(alias, column))),
            Condition::NotNull(column) => Ok(format!("{} IS NOT NULL", qualified(alias, column))),
            Condition::Not(inner) => Ok(format!("NOT ({})", inner.render(cx, alias)?)),
            Condition::Any(conditions) => {
                if conditions.is_empty() {
                    return Ok("1 = 0".to_string());
                }
                let parts = conditions
                    .iter()
                    .map(|c| c.render(cx, alias).map(|sql| format!("({sql})")))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("({})", parts.join(" OR ")))
            }
            Condition::Raw(sql) => Ok(format!("({sql})")),
            Condition::Has {
                relation,
                comparison,
            } => relation.existence_predicate(cx, alias, *comparison),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderBy {
    Column(String, SortOrder),
    /// Synthesized depth; breadth-first order.
    Depth(SortOrder),
    /// Synthesized path; depth-first order.
    Path(SortOrder),
}

/// WHERE / ORDER BY / LIMIT supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct Constraints {
    pub wheres: Vec<Condition>,
    pub orders: Vec<OrderBy>,
    pub limit: Option<u64>,
}

impl Constraints {
    pub fn render_wheres(
        &self,
        cx: &mut BuildContext,
        alias: &str,
    ) -> Result<Vec<String>, ClosureError> {
        self.wheres.iter().map(|c| c.render(cx, alias)).collect()
    }

    /// `\nORDER BY ...` or an empty string. Depth and path orderings need
    /// the closure's synthesized columns.
    pub fn render_order(
        &self,
        alias: &str,
        synthesized: Option<&PathState>,
    ) -> Result<String, ClosureError> {
        if self.orders.is_empty() {
            return Ok(String::new());
        }

        let mut parts = Vec::with_capacity(self.orders.len());
        for order in &self.orders {
            let part = match (order, synthesized) {
                (OrderBy::Column(column, dir), _) => {
                    format!("{} {}", qualified(alias, column), dir.as_sql())
                }
                (OrderBy::Depth(dir), Some(path)) => {
                    format!("{} {}", qualified(alias, &path.depth_column), dir.as_sql())
                }
                (OrderBy::Path(dir), Some(path)) => {
                    format!("{} {}", qualified(alias, &path.path_column), dir.as_sql())
                }
                (OrderBy::Depth(_) | OrderBy::Path(_), None) => {
                    return Err(ClosureError::config(
                        "depth and path ordering are only available on closure rows",
                    ));
                }
            };
            parts.push(part);
        }
        Ok(format!("\nORDER BY {}", parts.join(", ")))
    }

    pub fn render_limit(&self) -> String {
        match self.limit {
            Some(n) => format!("\nLIMIT {n}"),
            None => String::new(),
        }
    }
}
