//! The closed set of value types a record field may hold.
//!
//! Every field value is a [`Value`]; its tag is a [`ValueType`]. Null is not
//! a variant: field slots are `Option<Value>` and `None` is null.
//!
//! # JSON mapping
//!
//! | Variant | JSON |
//! |---------|------|
//! | `Text` | string |
//! | `Int`, `Long` | integer number |
//! | `Float` | number (`null` if not finite) |
//! | `Bool` | boolean |
//! | `Timestamp` | RFC 3339 string, UTC (`Z`) |
//! | `Bytes` | standard base64 string |
//! | `Json` | embedded as-is |
//!
//! Parsing goes the other way with less information: strings become `Text`,
//! integral numbers `Long`, other numbers `Float`, objects and arrays `Json`.

use std::fmt;
use std::hash::{Hash, Hasher};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Tag for each [`Value`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Text,
    Int,
    Long,
    Bool,
    Float,
    Timestamp,
    Bytes,
    Json,
}

impl ValueType {
    pub const ALL: [ValueType; 8] = [
        ValueType::Text,
        ValueType::Int,
        ValueType::Long,
        ValueType::Bool,
        ValueType::Float,
        ValueType::Timestamp,
        ValueType::Bytes,
        ValueType::Json,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Text => "text",
            ValueType::Int => "int",
            ValueType::Long => "long",
            ValueType::Bool => "bool",
            ValueType::Float => "float",
            ValueType::Timestamp => "timestamp",
            ValueType::Bytes => "bytes",
            ValueType::Json => "json",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single non-null field value.
///
/// Equality is structural. Floats compare by bit pattern so that `Value`
/// can be `Eq` and `Hash` (`NaN == NaN`, `0.0 != -0.0`).
#[derive(Debug, Clone)]
pub enum Value {
    Text(String),
    Int(i32),
    Long(i64),
    Bool(bool),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Text(_) => ValueType::Text,
            Value::Int(_) => ValueType::Int,
            Value::Long(_) => ValueType::Long,
            Value::Bool(_) => ValueType::Bool,
            Value::Float(_) => ValueType::Float,
            Value::Timestamp(_) => ValueType::Timestamp,
            Value::Bytes(_) => ValueType::Bytes,
            Value::Json(_) => ValueType::Json,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view of `Int` and `Long`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(i64::from(*v)),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view of `Float`, `Int` and `Long`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(f64::from(*v)),
            Value::Long(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Render the value as plain text, the way it would appear in a log line
    /// or a text-matching stage.
    pub fn to_text(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Int(v) => v.to_string(),
            Value::Long(v) => v.to_string(),
            Value::Bool(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Timestamp(t) => t.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            Value::Bytes(b) => STANDARD.encode(b),
            Value::Json(j) => j.to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Int(v) => serde_json::Value::from(*v),
            Value::Long(v) => serde_json::Value::from(*v),
            Value::Bool(v) => serde_json::Value::Bool(*v),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Timestamp(_) | Value::Bytes(_) => serde_json::Value::String(self.to_text()),
            Value::Json(j) => j.clone(),
        }
    }

    /// Parse one JSON scalar or document. `null` yields `None`.
    pub fn from_json(json: &serde_json::Value) -> Option<Value> {
        match json {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::String(s) => Some(Value::Text(s.clone())),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(v) => Some(Value::Long(v)),
                None => n.as_f64().map(Value::Float),
            },
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                Some(Value::Json(json.clone()))
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value_type().hash(state);
        match self {
            Value::Text(s) => s.hash(state),
            Value::Int(v) => v.hash(state),
            Value::Long(v) => v.hash(state),
            Value::Bool(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Timestamp(t) => t.hash(state),
            Value::Bytes(b) => b.hash(state),
            Value::Json(j) => hash_json(j, state),
        }
    }
}

/// Hash a JSON document so that objects equal under `==` (key order
/// ignored) hash equally.
fn hash_json<H: Hasher>(json: &serde_json::Value, state: &mut H) {
    match json {
        serde_json::Value::Null => 0u8.hash(state),
        serde_json::Value::Bool(b) => b.hash(state),
        serde_json::Value::Number(n) => n.to_string().hash(state),
        serde_json::Value::String(s) => s.hash(state),
        serde_json::Value::Array(items) => {
            items.len().hash(state);
            for item in items {
                hash_json(item, state);
            }
        }
        serde_json::Value::Object(map) => {
            let mut entries: Vec<(&String, &serde_json::Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            entries.len().hash(state);
            for (key, value) in entries {
                key.hash(state);
                hash_json(value, state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}
