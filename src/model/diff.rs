//! Structural diffing and patching of normalized values.
//!
//! `diff(base, new)` walks `base` and `new` breadth-first and yields one
//! [`DiffOp`] per path where the two trees disagree, such that
//! `patch(base, diff(base, new)) == new`. Both functions only operate on
//! `Value::Map`/`Value::List` structure; scalars are always replaced wholesale,
//! never diffed character-by-character.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::error::{DiffError, PatchError};
use crate::model::value::Value;

/// A single step into a nested structure: a map key or a list index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// step into a list by position
    Index(usize),
    /// step into a map by key
    Key(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(i) => write!(f, "[{}]", i),
            PathSegment::Key(k) => write!(f, ".{}", k),
        }
    }
}

fn path_to_string(path: &[PathSegment]) -> String {
    if path.is_empty() {
        return "<root>".to_string();
    }
    path.iter().map(|s| s.to_string()).collect()
}

/// The set of operations recorded at a single path. Each field is optional
/// and only present when that kind of change occurred at this path; the
/// `d*` fields apply to maps, the `t*` fields apply to lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpSet {
    /// keys present in `new` but not in `base`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dn: Option<BTreeMap<String, Value>>,
    /// keys present in `base` but not in `new`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dd: Option<Vec<String>>,
    /// keys present in both whose scalar value changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dc: Option<BTreeMap<String, Value>>,
    /// list indices whose scalar value changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tc: Option<Vec<(usize, Value)>>,
    /// elements appended to a list (new is longer than base)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tn: Option<Vec<Value>>,
    /// length to truncate a list to (new is shorter than base)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub td: Option<usize>,
}

impl OpSet {
    fn is_empty(&self) -> bool {
        self.dn.is_none()
            && self.dd.is_none()
            && self.dc.is_none()
            && self.tc.is_none()
            && self.tn.is_none()
            && self.td.is_none()
    }
}

/// A path paired with the operations recorded at it, serialized as the
/// 2-element `[path, ops]` array form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffOp(pub Vec<PathSegment>, pub OpSet);

/// A full set of diff operations, in the order they were discovered.
pub type DiffOps = Vec<DiffOp>;

/// Compute the operations that transform `base` into `new`.
///
/// Both values must be `Value::Map` at the root; anything else is a caller
/// error (`DiffError::NonDictRoot`), since a diff can only meaningfully
/// describe structural changes within a record's top-level fields.
pub fn diff(base: &Value, new: &Value) -> Result<DiffOps, DiffError> {
    if base == new {
        return Ok(Vec::new());
    }

    if base.as_map().is_none() || new.as_map().is_none() {
        return Err(DiffError::NonDictRoot);
    }

    let mut result = Vec::new();
    let mut queue: VecDeque<(Vec<PathSegment>, &Value, &Value)> = VecDeque::new();
    queue.push_back((Vec::new(), base, new));

    while let Some((path, left, right)) = queue.pop_front() {
        let mut ops = OpSet::default();

        match (left, right) {
            (Value::Map(lm), Value::Map(rm)) => {
                let mut dn = BTreeMap::new();
                for (k, v) in rm.iter() {
                    if !lm.contains_key(k) {
                        dn.insert(k.clone(), v.clone());
                    }
                }
                if !dn.is_empty() {
                    ops.dn = Some(dn);
                }

                let dd: Vec<String> = lm.keys().filter(|k| !rm.contains_key(*k)).cloned().collect();
                if !dd.is_empty() {
                    ops.dd = Some(dd);
                }

                let mut dc = BTreeMap::new();
                for (k, lv) in lm.iter() {
                    let rv = match rm.get(k) {
                        Some(rv) => rv,
                        None => continue,
                    };
                    if lv == rv {
                        continue;
                    }
                    match (lv, rv) {
                        (Value::Map(_), Value::Map(_)) | (Value::List(_), Value::List(_)) => {
                            let mut child = path.clone();
                            child.push(PathSegment::Key(k.clone()));
                            queue.push_back((child, lv, rv));
                        }
                        _ => {
                            dc.insert(k.clone(), rv.clone());
                        }
                    }
                }
                if !dc.is_empty() {
                    ops.dc = Some(dc);
                }
            }
            (Value::List(ll), Value::List(rl)) => {
                let mut tc = Vec::new();
                let max_len = ll.len().max(rl.len());

                for index in 0..max_len {
                    let lv = ll.get(index);
                    let rv = rl.get(index);

                    match (lv, rv) {
                        (Some(l), Some(r)) if l == r => continue,
                        (None, Some(_)) => {
                            ops.tn = Some(rl[index..].to_vec());
                            break;
                        }
                        (Some(_), None) => {
                            ops.td = Some(index);
                            break;
                        }
                        (Some(l), Some(r)) => {
                            if let (Value::Map(_), Value::Map(_)) = (l, r) {
                                let mut child = path.clone();
                                child.push(PathSegment::Index(index));
                                queue.push_back((child, l, r));
                            } else {
                                tc.push((index, r.clone()));
                            }
                        }
                        (None, None) => unreachable!("zip index bounded by max_len"),
                    }
                }

                if !tc.is_empty() {
                    ops.tc = Some(tc);
                }
            }
            _ => {
                // only ever reached if base/new mix a map and a list at the
                // same path, which diff never enqueues
                continue;
            }
        }

        if !ops.is_empty() {
            result.push(DiffOp(path, ops));
        }
    }

    Ok(result)
}

/// Apply a set of diff operations to `base`, returning a new value. Always
/// returns a fresh `Value`, even when `ops` is empty.
pub fn patch(base: &Value, ops: &[DiffOp]) -> Result<Value, PatchError> {
    let mut result = base.clone();

    for DiffOp(path, opset) in ops {
        let target = get_in_mut(&mut result, path)?;

        if let Some(dc) = &opset.dc {
            let map = target.as_map_mut().ok_or_else(|| mismatch(path, "dc expects a map"))?;
            for (k, v) in dc {
                map.insert(k.clone(), v.clone());
            }
        }
        if let Some(dn) = &opset.dn {
            let map = target.as_map_mut().ok_or_else(|| mismatch(path, "dn expects a map"))?;
            for (k, v) in dn {
                map.insert(k.clone(), v.clone());
            }
        }
        if let Some(dd) = &opset.dd {
            let map = target.as_map_mut().ok_or_else(|| mismatch(path, "dd expects a map"))?;
            for k in dd {
                map.remove(k);
            }
        }
        if let Some(tc) = &opset.tc {
            let list = target.as_list_mut().ok_or_else(|| mismatch(path, "tc expects a list"))?;
            for (index, value) in tc {
                if *index >= list.len() {
                    return Err(PatchError::Malformed(format!(
                        "tc index {} out of bounds for list of length {}",
                        index,
                        list.len()
                    )));
                }
                list[*index] = value.clone();
            }
        }
        if let Some(tn) = &opset.tn {
            let list = target.as_list_mut().ok_or_else(|| mismatch(path, "tn expects a list"))?;
            list.extend(tn.iter().cloned());
        }
        if let Some(td) = &opset.td {
            let list = target.as_list_mut().ok_or_else(|| mismatch(path, "td expects a list"))?;
            list.truncate(*td);
        }
    }

    Ok(result)
}

fn mismatch(path: &[PathSegment], reason: &str) -> PatchError {
    PatchError::Mismatch {
        path: path_to_string(path),
        reason: reason.to_string(),
    }
}

fn get_in_mut<'a>(root: &'a mut Value, path: &[PathSegment]) -> Result<&'a mut Value, PatchError> {
    let mut current = root;
    for segment in path {
        current = match (current, segment) {
            (Value::Map(m), PathSegment::Key(k)) => m
                .get_mut(k)
                .ok_or_else(|| PatchError::MissingPath(path_to_string(path)))?,
            (Value::List(l), PathSegment::Index(i)) => l
                .get_mut(*i)
                .ok_or_else(|| PatchError::MissingPath(path_to_string(path)))?,
            _ => {
                return Err(PatchError::Mismatch {
                    path: path_to_string(path),
                    reason: "path segment type does not match value shape".to_string(),
                })
            }
        };
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v(raw: serde_json::Value) -> Value {
        Value::normalize(&raw).unwrap()
    }

    #[test]
    fn diff_of_identical_values_is_empty() {
        let a = v(json!({"x": 1}));
        assert!(diff(&a, &a).unwrap().is_empty());
    }

    #[test]
    fn diff_requires_map_root() {
        let a = v(json!([1, 2]));
        let b = v(json!([1, 3]));
        assert!(matches!(diff(&a, &b), Err(DiffError::NonDictRoot)));
    }

    #[test]
    fn round_trip_scalar_change() {
        let base = v(json!({"a": "1", "b": "2"}));
        let new = v(json!({"a": "1", "b": "3"}));
        let ops = diff(&base, &new).unwrap();
        assert_eq!(patch(&base, &ops).unwrap(), new);
    }

    #[test]
    fn round_trip_added_and_removed_keys() {
        let base = v(json!({"a": "1", "b": "2"}));
        let new = v(json!({"a": "1", "c": "3"}));
        let ops = diff(&base, &new).unwrap();
        assert_eq!(patch(&base, &ops).unwrap(), new);
    }

    #[test]
    fn round_trip_nested_map_change() {
        let base = v(json!({"a": {"x": "1", "y": "2"}}));
        let new = v(json!({"a": {"x": "1", "y": "3"}}));
        let ops = diff(&base, &new).unwrap();
        assert_eq!(patch(&base, &ops).unwrap(), new);
    }

    #[test]
    fn round_trip_list_append_and_truncate() {
        let base = v(json!({"a": ["1", "2"]}));
        let grown = v(json!({"a": ["1", "2", "3"]}));
        let shrunk = v(json!({"a": ["1"]}));

        let grow_ops = diff(&base, &grown).unwrap();
        assert_eq!(patch(&base, &grow_ops).unwrap(), grown);

        let shrink_ops = diff(&base, &shrunk).unwrap();
        assert_eq!(patch(&base, &shrink_ops).unwrap(), shrunk);
    }

    #[test]
    fn round_trip_list_element_change() {
        let base = v(json!({"a": ["1", "2", "3"]}));
        let new = v(json!({"a": ["1", "9", "3"]}));
        let ops = diff(&base, &new).unwrap();
        assert_eq!(patch(&base, &ops).unwrap(), new);
    }

    #[test]
    fn round_trip_list_of_maps() {
        let base = v(json!({"a": [{"x": "1"}, {"x": "2"}]}));
        let new = v(json!({"a": [{"x": "1"}, {"x": "9"}]}));
        let ops = diff(&base, &new).unwrap();
        assert_eq!(patch(&base, &ops).unwrap(), new);
    }

    #[test]
    fn empty_ops_still_produce_a_fresh_clone() {
        let base = v(json!({"a": "1"}));
        let patched = patch(&base, &[]).unwrap();
        assert_eq!(patched, base);
    }

    proptest::proptest! {
        #[test]
        fn diff_then_patch_round_trips_arbitrary_flat_maps(
            a in proptest::collection::btree_map("[a-c]", "[0-9]{1,3}", 0..5),
            b in proptest::collection::btree_map("[a-c]", "[0-9]{1,3}", 0..5),
        ) {
            let base = Value::Map(a.into_iter().map(|(k, v)| (k, Value::Str(v))).collect());
            let new = Value::Map(b.into_iter().map(|(k, v)| (k, Value::Str(v))).collect());
            let ops = diff(&base, &new).unwrap();
            let patched = patch(&base, &ops).unwrap();
            proptest::prop_assert_eq!(patched, new);
        }
    }
}
