//! Hydrated result rows.
//!
//! A [`Record`] is the row shape handed back to callers: an ordered map of
//! column name to JSON value, plus any relations that were eager loaded onto
//! it. Columns the closure engine synthesizes are removed before a record
//! leaves the crate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ClosureError;

/// Identity key of a hierarchy or target row.
pub type Key = i64;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    relations: BTreeMap<String, Vec<Record>>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_attributes(attributes: Map<String, Value>) -> Self {
        Record {
            attributes,
            relations: BTreeMap::new(),
        }
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn into_attributes(self) -> Map<String, Value> {
        self.attributes
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.attributes.get(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.attributes.contains_key(column)
    }

    /// Integer value of `column`, accepting numeric strings.
    pub fn get_i64(&self, column: &str) -> Option<i64> {
        match self.attributes.get(column)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Non-null integer key stored in `column`.
    pub fn key(&self, column: &str) -> Result<Key, ClosureError> {
        self.get_i64(column).ok_or_else(|| {
            ClosureError::Decode(format!("row has no integer value in column \"{column}\""))
        })
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(column.into(), value.into());
    }

    /// Remove `column` and return its value.
    pub fn take(&mut self, column: &str) -> Option<Value> {
        self.attributes.remove(column)
    }

    pub fn relation(&self, name: &str) -> Option<&[Record]> {
        self.relations.get(name).map(Vec::as_slice)
    }

    pub fn relations(&self) -> &BTreeMap<String, Vec<Record>> {
        &self.relations
    }

    pub fn set_relation(&mut self, name: impl Into<String>, records: Vec<Record>) {
        self.relations.insert(name.into(), records);
    }
}

impl From<Map<String, Value>> for Record {
    fn from(attributes: Map<String, Value>) -> Self {
        Record::from_attributes(attributes)
    }
}

/// Keys read from `column` of each record, in order.
pub fn pluck_keys(records: &[Record], column: &str) -> Result<Vec<Key>, ClosureError> {
    records.iter().map(|r| r.key(column)).collect()
}
