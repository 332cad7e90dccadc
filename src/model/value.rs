//! The normalized value type every record's data is reduced to before it is
//! diffed, stored, or parsed.
//!
//! Everything a record can hold boils down to four shapes: nothing, a
//! string, a map of strings to values, or an ordered list of values. Numbers,
//! booleans and anything else JSON-ish are all folded down to strings here;
//! their richer meaning is recovered later by the value parser against a
//! particular set of parsing options.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::error::NormalizeError;

/// A normalized record value.
///
/// `Map` uses a `BTreeMap` rather than a hash map so that two maps built from
/// the same keys always compare and serialize identically, which matters for
/// the diff algorithm's equality checks and for reproducible tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absence of a value.
    Null,
    /// A string, already stripped of control characters.
    Str(String),
    /// A nested object.
    Map(BTreeMap<String, Value>),
    /// An ordered sequence (the normalized form of lists, sets and tuples).
    List(Vec<Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Str(s) => write!(f, "{}", s),
            Value::Map(_) => write!(f, "<map>"),
            Value::List(_) => write!(f, "<list>"),
        }
    }
}

impl Value {
    /// Returns true if this value is the empty map, which is how a record
    /// signals that it has been deleted.
    pub fn is_empty_map(&self) -> bool {
        matches!(self, Value::Map(m) if m.is_empty())
    }

    /// Normalize an arbitrary `serde_json::Value` into our reduced value
    /// type, matching the conversion rules every record's raw data is put
    /// through before it is diffed or stored:
    ///
    /// - `null` stays `Null`
    /// - strings have control characters other than `\n`, `\r`, `\t` removed
    /// - booleans become the strings `"true"`/`"false"`
    /// - numbers become their decimal string form
    /// - objects become maps with string keys, recursively normalized
    /// - arrays become lists, recursively normalized
    pub fn normalize(raw: &serde_json::Value) -> Result<Value, NormalizeError> {
        Ok(match raw {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Str(if *b { "true" } else { "false" }.to_string()),
            serde_json::Value::Number(n) => Value::Str(n.to_string()),
            serde_json::Value::String(s) => Value::Str(strip_invalid_chars(s)),
            serde_json::Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(Value::normalize(item)?);
                }
                Value::List(out)
            }
            serde_json::Value::Object(map) => {
                let mut out = BTreeMap::new();
                for (key, value) in map {
                    out.insert(key.clone(), Value::normalize(value)?);
                }
                Value::Map(out)
            }
        })
    }

    /// Convert back to a plain `serde_json::Value`, for callers that need
    /// to hand normalized data to something JSON-shaped (the record store
    /// driver, the search store bulk body).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Map(m) => {
                let mut obj = serde_json::Map::with_capacity(m.len());
                for (k, v) in m {
                    obj.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(obj)
            }
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }

    /// Borrow this value as a map, if it is one.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Mutably borrow this value as a map, if it is one.
    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Borrow this value as a list, if it is one.
    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Mutably borrow this value as a list, if it is one.
    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Borrow this value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Strip unicode control characters from a string, keeping `\n`, `\r` and
/// `\t`. Control characters sneak into free-text fields from OCR, copy-paste
/// from PDFs, and legacy database exports; leaving them in breaks JSON
/// round-tripping through the search store further down the pipeline.
fn strip_invalid_chars(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_scalars() {
        assert_eq!(Value::normalize(&json!(null)).unwrap(), Value::Null);
        assert_eq!(
            Value::normalize(&json!(true)).unwrap(),
            Value::Str("true".to_string())
        );
        assert_eq!(
            Value::normalize(&json!(false)).unwrap(),
            Value::Str("false".to_string())
        );
        assert_eq!(
            Value::normalize(&json!(42)).unwrap(),
            Value::Str("42".to_string())
        );
        assert_eq!(
            Value::normalize(&json!(4.5)).unwrap(),
            Value::Str("4.5".to_string())
        );
    }

    #[test]
    fn normalize_strips_control_chars_but_keeps_whitespace() {
        let raw = json!("a\u{0}b\nc\td\re");
        let normalized = Value::normalize(&raw).unwrap();
        assert_eq!(normalized, Value::Str("ab\nc\td\re".to_string()));
    }

    #[test]
    fn normalize_nested_structure() {
        let raw = json!({
            "a": 1,
            "b": [true, false, null],
            "c": {"d": "hello"},
        });
        let normalized = Value::normalize(&raw).unwrap();
        let map = normalized.as_map().unwrap();
        assert_eq!(map.get("a").unwrap(), &Value::Str("1".to_string()));
        assert_eq!(
            map.get("b").unwrap(),
            &Value::List(vec![
                Value::Str("true".to_string()),
                Value::Str("false".to_string()),
                Value::Null,
            ])
        );
        assert_eq!(
            map.get("c").unwrap().as_map().unwrap().get("d").unwrap(),
            &Value::Str("hello".to_string())
        );
    }

    #[test]
    fn is_empty_map_detects_delete_marker() {
        assert!(Value::Map(BTreeMap::new()).is_empty_map());
        assert!(!Value::Null.is_empty_map());
    }
}
