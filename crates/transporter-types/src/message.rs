//! The record type flowing through the pipeline.
//!
//! A [`Message`] is immutable once emitted by a reader: transform nodes
//! build new messages rather than mutating in place, and every fan-out
//! edge sees its own copy. The [`Value`] tree keeps extended scalars
//! (binary, decimal, datetime, object-id) tagged so a durable round trip
//! never collapses them into plain strings.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::Namespace;

/// Operation kind carried by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Insert,
    Update,
    Delete,
    Command,
    Noop,
}

impl Op {
    /// Wire-format string for logs and status output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Command => "command",
            Self::Noop => "noop",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dynamically typed field value.
///
/// Externally tagged on the wire, so `{"bytes": [...]}` and
/// `{"string": "..."}` stay distinguishable after serialization.
/// Decimals are kept as their source string to avoid precision loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    DateTime(DateTime<Utc>),
    Decimal(String),
    ObjectId(String),
    Sequence(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Returns `true` for `Value::Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<serde_json::Value> for Value {
    /// Map untyped JSON into the tagged tree. Numbers become `Int` when
    /// they fit `i64`, otherwise `Float`; extended scalars cannot be
    /// expressed in untyped JSON and never appear here.
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n.as_i64().map_or_else(
                || Self::Float(n.as_f64().unwrap_or(f64::NAN)),
                Self::Int,
            ),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Sequence(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(fields) => Self::Map(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Self::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// The unit of data moving through a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Operation this record represents at the source.
    pub op: Op,
    /// Monotonic 64-bit emission time assigned by the reader runtime.
    pub timestamp: u64,
    /// Source bucket in `"<database>.<object>"` form.
    pub namespace: Namespace,
    /// Field name to value mapping. Key order is not semantically
    /// meaningful; `BTreeMap` gives a canonical serialized form.
    pub data: BTreeMap<String, Value>,
}

impl Message {
    /// Create an empty message for `namespace`. The timestamp is assigned
    /// later, at emission, by the reader runtime.
    #[must_use]
    pub fn new(op: Op, namespace: Namespace) -> Self {
        Self {
            op,
            timestamp: 0,
            namespace,
            data: BTreeMap::new(),
        }
    }

    /// Builder-style field insertion.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}
