//! Typed attribute values for structured item images.
//!
//! Table streams describe items as maps of typed attribute values. The
//! conversions here map plain JSON onto that representation and back:
//!
//! | JSON      | Attribute |
//! |-----------|-----------|
//! | string    | `S`       |
//! | number    | `N`       |
//! | bool      | `Bool`    |
//! | null      | `Null`    |
//! | array     | `L`       |
//! | object    | `M`       |
//!
//! Binary attributes have no JSON form and are rejected by [`AttributeValue::to_json`].

use crate::error::{ProtocolError, ProtocolResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A structured item: attribute name to value.
pub type Item = BTreeMap<String, AttributeValue>;

/// A single typed attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// String.
    S(String),
    /// Number, kept in its decimal string form.
    N(String),
    /// Binary.
    B(Bytes),
    /// Boolean.
    #[serde(rename = "BOOL")]
    Bool(bool),
    /// Null.
    #[serde(rename = "NULL")]
    Null,
    /// List of values.
    L(Vec<AttributeValue>),
    /// Map of values.
    M(BTreeMap<String, AttributeValue>),
}

impl AttributeValue {
    /// Returns the type tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::S(_) => "S",
            AttributeValue::N(_) => "N",
            AttributeValue::B(_) => "B",
            AttributeValue::Bool(_) => "BOOL",
            AttributeValue::Null => "NULL",
            AttributeValue::L(_) => "L",
            AttributeValue::M(_) => "M",
        }
    }

    /// Converts a JSON value into an attribute value.
    pub fn from_json(value: &serde_json::Value) -> ProtocolResult<Self> {
        use serde_json::Value;

        Ok(match value {
            Value::String(s) => AttributeValue::S(s.clone()),
            Value::Number(n) => AttributeValue::N(n.to_string()),
            Value::Bool(b) => AttributeValue::Bool(*b),
            Value::Null => AttributeValue::Null,
            Value::Array(items) => AttributeValue::L(
                items
                    .iter()
                    .map(AttributeValue::from_json)
                    .collect::<ProtocolResult<_>>()?,
            ),
            Value::Object(fields) => AttributeValue::M(
                fields
                    .iter()
                    .map(|(k, v)| AttributeValue::from_json(v).map(|a| (k.clone(), a)))
                    .collect::<ProtocolResult<_>>()?,
            ),
        })
    }

    /// Converts this attribute value into plain JSON.
    pub fn to_json(&self) -> ProtocolResult<serde_json::Value> {
        use serde_json::Value;

        Ok(match self {
            AttributeValue::S(s) => Value::String(s.clone()),
            AttributeValue::N(n) => Value::Number(parse_number(n)?),
            AttributeValue::Bool(b) => Value::Bool(*b),
            AttributeValue::Null => Value::Null,
            AttributeValue::L(items) => Value::Array(
                items
                    .iter()
                    .map(AttributeValue::to_json)
                    .collect::<ProtocolResult<_>>()?,
            ),
            AttributeValue::M(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| v.to_json().map(|j| (k.clone(), j)))
                    .collect::<ProtocolResult<_>>()?,
            ),
            AttributeValue::B(_) => return Err(ProtocolError::UnsupportedAttribute("B")),
        })
    }

    /// Converts a JSON object into an item.
    pub fn item_from_json(value: &serde_json::Value) -> ProtocolResult<Item> {
        match AttributeValue::from_json(value)? {
            AttributeValue::M(fields) => Ok(fields),
            other => Err(ProtocolError::UnsupportedValue(format!(
                "item must be an object, got {}",
                other.type_name()
            ))),
        }
    }

    /// Converts an item into a JSON object.
    pub fn item_to_json(item: &Item) -> ProtocolResult<serde_json::Value> {
        AttributeValue::M(item.clone()).to_json()
    }
}

fn parse_number(n: &str) -> ProtocolResult<serde_json::Number> {
    if let Ok(i) = n.parse::<i64>() {
        return Ok(i.into());
    }
    if let Ok(u) = n.parse::<u64>() {
        return Ok(u.into());
    }
    n.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .ok_or_else(|| ProtocolError::InvalidNumber(n.to_string()))
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::S(s.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(n: i64) -> Self {
        AttributeValue::N(n.to_string())
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Bool(b)
    }
}
