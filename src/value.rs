//! Closed value type for tool inputs and server tool payloads.
//!
//! Tool arguments arrive from the model as arbitrary JSON. Rather than passing
//! `serde_json::Value` through every layer, the engine narrows them into
//! [`ToolValue`], a small tagged union that the host application can match on
//! exhaustively. Unknown object keys are kept as-is, so a value that was
//! decoded from the stream serializes back to the same JSON when the history
//! is replayed to the remote API.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Structured tool input: a JSON object with [`ToolValue`] fields.
pub type ToolInput = BTreeMap<String, ToolValue>;

/// A JSON-compatible value with integers and floats kept apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum ToolValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<ToolValue>),
    Object(BTreeMap<String, ToolValue>),
}

impl ToolValue {
    /// Returns the string slice if this is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ToolValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer if this is an `Int`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ToolValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric view that accepts both `Int` and `Float`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ToolValue::Int(n) => Some(*n as f64),
            ToolValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ToolValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, ToolValue>> {
        match self {
            ToolValue::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Field lookup on objects; `None` for every other variant.
    pub fn get(&self, key: &str) -> Option<&ToolValue> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Converts into a `serde_json::Value`.
    pub fn to_json(&self) -> Value {
        match self {
            ToolValue::Null => Value::Null,
            ToolValue::Bool(b) => Value::Bool(*b),
            ToolValue::Int(n) => Value::from(*n),
            // Non-finite floats have no JSON form.
            ToolValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ToolValue::String(s) => Value::String(s.clone()),
            ToolValue::Array(items) => Value::Array(items.iter().map(ToolValue::to_json).collect()),
            ToolValue::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for ToolValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => ToolValue::Null,
            Value::Bool(b) => ToolValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ToolValue::Int(i),
                // u64 beyond i64::MAX and all fractional numbers land here.
                None => ToolValue::Float(n.as_f64().unwrap_or(0.0)),
            },
            Value::String(s) => ToolValue::String(s),
            Value::Array(items) => ToolValue::Array(items.into_iter().map(ToolValue::from).collect()),
            Value::Object(map) => ToolValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, ToolValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for ToolValue {
    fn from(s: &str) -> Self {
        ToolValue::String(s.to_string())
    }
}

impl From<String> for ToolValue {
    fn from(s: String) -> Self {
        ToolValue::String(s)
    }
}

impl From<i64> for ToolValue {
    fn from(n: i64) -> Self {
        ToolValue::Int(n)
    }
}

impl From<f64> for ToolValue {
    fn from(f: f64) -> Self {
        ToolValue::Float(f)
    }
}

impl From<bool> for ToolValue {
    fn from(b: bool) -> Self {
        ToolValue::Bool(b)
    }
}

/// Converts a JSON value into a [`ToolInput`].
///
/// Objects map field-by-field. Any other JSON shape is not a valid tool
/// input and yields `None`.
pub fn input_from_json(value: Value) -> Option<ToolInput> {
    match ToolValue::from(value) {
        ToolValue::Object(map) => Some(map),
        _ => None,
    }
}

/// Renders a [`ToolInput`] as a JSON object value.
pub fn input_to_json(input: &ToolInput) -> Value {
    Value::Object(input.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
}
