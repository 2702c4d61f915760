//! The seam to the storage engine.
//!
//! Relations produce complete SQL statements and hand them to a [`Storage`].
//! Implementations are provided for SQLite (`rusqlite::Connection`) and
//! PostgreSQL (`postgres::Client`). Driver errors are returned unmodified.

use postgres::SimpleQueryMessage;
use postgres::types::Type;
use rusqlite::types::ValueRef;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ClosureError;
use crate::record::Record;
use crate::sql::Dialect;

/// A synchronous SQL connection.
pub trait Storage {
    fn dialect(&self) -> Dialect;

    /// Whether `WITH RECURSIVE` can be evaluated by the engine.
    fn supports_recursive_queries(&self) -> bool {
        true
    }

    /// Run a query and decode every row.
    fn select(&mut self, sql: &str) -> Result<Vec<Record>, ClosureError>;

    /// Run a statement and return the number of affected rows.
    fn execute(&mut self, sql: &str) -> Result<u64, ClosureError>;
}

// ── SQLite ──────────────────────────────────────────────────────────────

impl Storage for rusqlite::Connection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn select(&mut self, sql: &str) -> Result<Vec<Record>, ClosureError> {
        let mut stmt = self.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let rows = stmt.query_map([], |row| {
            let mut attributes = Map::with_capacity(names.len());
            for (i, name) in names.iter().enumerate() {
                attributes.insert(name.clone(), sqlite_value(row.get_ref(i)?));
            }
            Ok(Record::from_attributes(attributes))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn execute(&mut self, sql: &str) -> Result<u64, ClosureError> {
        let affected = rusqlite::Connection::execute(self, sql, [])?;
        Ok(affected as u64)
    }
}

fn sqlite_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::from(n),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Array(b.iter().map(|byte| Value::from(*byte)).collect()),
    }
}

// ── PostgreSQL ──────────────────────────────────────────────────────────

impl Storage for postgres::Client {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    /// Rows are decoded in binary form when every column type is known,
    /// through the text protocol otherwise (NUMERIC, UUID, INTERVAL, ...).
    fn select(&mut self, sql: &str) -> Result<Vec<Record>, ClosureError> {
        let statement = self.prepare(sql)?;
        let types: Vec<Type> = statement
            .columns()
            .iter()
            .map(|c| c.type_().clone())
            .collect();
        if types.iter().all(decodes_binary) {
            let rows = self.query(&statement, &[])?;
            return rows.iter().map(postgres_record).collect();
        }

        debug!(
            columns = ?statement.columns().iter().map(|c| c.type_().name()).collect::<Vec<_>>(),
            "decoding rows as text"
        );
        let mut records = Vec::new();
        for message in self.simple_query(sql)? {
            let SimpleQueryMessage::Row(row) = message else {
                continue;
            };
            let mut attributes = Map::with_capacity(row.len());
            for (i, column) in row.columns().iter().enumerate() {
                let value = match row.try_get(i)? {
                    Some(text) => text_value(text, types.get(i).unwrap_or(&Type::TEXT)),
                    None => Value::Null,
                };
                attributes.insert(column.name().to_string(), value);
            }
            records.push(Record::from_attributes(attributes));
        }
        Ok(records)
    }

    fn execute(&mut self, sql: &str) -> Result<u64, ClosureError> {
        Ok(postgres::Client::execute(self, sql, &[])?)
    }
}

fn decodes_binary(ty: &Type) -> bool {
    [
        Type::BOOL,
        Type::INT2,
        Type::INT4,
        Type::INT8,
        Type::FLOAT4,
        Type::FLOAT8,
        Type::TIMESTAMP,
        Type::TIMESTAMPTZ,
        Type::DATE,
        Type::TIME,
        Type::JSON,
        Type::JSONB,
        Type::BYTEA,
        Type::TEXT,
        Type::VARCHAR,
        Type::BPCHAR,
        Type::NAME,
        Type::UNKNOWN,
    ]
    .contains(ty)
}

fn postgres_record(row: &postgres::Row) -> Result<Record, ClosureError> {
    let mut attributes = Map::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        let value = postgres_value(row, i, column.type_()).map_err(|e| {
            ClosureError::Decode(format!("column \"{}\": {e}", column.name()))
        })?;
        attributes.insert(column.name().to_string(), value);
    }
    Ok(Record::from_attributes(attributes))
}

fn postgres_value(row: &postgres::Row, i: usize, ty: &Type) -> Result<Value, postgres::Error> {
    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(i)?.map(Value::from)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(i)?.map(Value::from)
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(i)?.map(Value::from)
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(i)?.map(Value::from)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(i)?.map(|f| Value::from(f64::from(f)))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(i)?.map(Value::from)
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<chrono::NaiveDateTime>>(i)?
            .map(|ts| Value::from(ts.format(TIMESTAMP_FORMAT).to_string()))
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(i)?
            .map(|ts| Value::from(ts.to_rfc3339()))
    } else if *ty == Type::DATE {
        row.try_get::<_, Option<chrono::NaiveDate>>(i)?
            .map(|d| Value::from(d.format("%Y-%m-%d").to_string()))
    } else if *ty == Type::TIME {
        row.try_get::<_, Option<chrono::NaiveTime>>(i)?
            .map(|t| Value::from(t.to_string()))
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        row.try_get::<_, Option<Value>>(i)?
    } else if *ty == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(i)?.map(bytes_value)
    } else {
        row.try_get::<_, Option<String>>(i)?.map(Value::from)
    };
    Ok(value.unwrap_or(Value::Null))
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn bytes_value(bytes: Vec<u8>) -> Value {
    Value::Array(bytes.into_iter().map(Value::from).collect())
}

/// Value of a column sent in PostgreSQL's text format, shaped like the
/// binary decoding of the same type.
fn text_value(text: &str, ty: &Type) -> Value {
    let parsed = if *ty == Type::BOOL {
        match text {
            "t" => Some(Value::Bool(true)),
            "f" => Some(Value::Bool(false)),
            _ => None,
        }
    } else if *ty == Type::INT2 || *ty == Type::INT4 || *ty == Type::INT8 {
        text.parse::<i64>().ok().map(Value::from)
    } else if *ty == Type::FLOAT4 || *ty == Type::FLOAT8 {
        text.parse::<f64>().ok().map(Value::from)
    } else if *ty == Type::TIMESTAMP {
        chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
            .ok()
            .map(|ts| Value::from(ts.format(TIMESTAMP_FORMAT).to_string()))
    } else if *ty == Type::TIMESTAMPTZ {
        chrono::DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z")
            .ok()
            .map(|ts| Value::from(ts.with_timezone(&chrono::Utc).to_rfc3339()))
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        serde_json::from_str(text).ok()
    } else if *ty == Type::BYTEA {
        text.strip_prefix("\\x").and_then(decode_hex).map(bytes_value)
    } else {
        None
    };
    parsed.unwrap_or_else(|| Value::from(text))
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}
