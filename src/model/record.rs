//! Records as they arrive from a caller, and as they are held in the record
//! store once committed, plus the version iterator that reconstructs any
//! historical version of a record's data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::error::PatchError;
use crate::model::diff::{patch, DiffOps};
use crate::model::value::Value;

/// A record as supplied by a caller, before it is staged or committed.
///
/// A record with empty data (`{}`) is a delete request for that id.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// the caller-assigned or generated identifier
    pub id: String,
    /// the record's raw data, not yet normalized
    pub data: serde_json::Value,
}

impl Record {
    /// Build a record with a freshly generated id.
    pub fn new(data: serde_json::Value) -> Self {
        Record {
            id: Uuid::new_v4().to_string(),
            data,
        }
    }

    /// Build a delete request for an existing record id.
    pub fn delete(id: impl Into<String>) -> Self {
        Record {
            id: id.into(),
            data: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// A record is a delete request if its data is empty.
    pub fn is_delete(&self) -> bool {
        match &self.data {
            serde_json::Value::Object(m) => m.is_empty(),
            serde_json::Value::Null => true,
            _ => false,
        }
    }
}

/// A version number paired with the record data at that version.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedData {
    /// the version this data belongs to, or `None` for an uncommitted record
    pub version: Option<i64>,
    /// the record's data at this version
    pub data: Value,
}

/// A record as held in the record store: the latest data plus a backward
/// diff chain covering every earlier version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// the record's identifier
    pub id: String,
    /// the version this record was last committed at, or `None` if it has
    /// been staged but not yet committed
    pub version: Option<i64>,
    /// the latest normalized data for this record
    pub data: Value,
    /// backward diffs: `diffs[v]` patches `data` (or the result of applying
    /// all diffs for versions newer than `v`) down to the data as it stood at
    /// version `v`
    #[serde(default)]
    pub diffs: BTreeMap<i64, DiffOps>,
}

impl StoredRecord {
    /// A record is deleted if its current data is the empty map.
    pub fn is_deleted(&self) -> bool {
        self.data.is_empty_map()
    }

    /// A record is uncommitted if it has no current version.
    pub fn is_uncommitted(&self) -> bool {
        self.version.is_none()
    }

    /// A record has history if it has any diffs.
    pub fn has_history(&self) -> bool {
        !self.diffs.is_empty()
    }

    /// All versions this record has existed at, in ascending order unless
    /// `desc` is set. The current version is included if present.
    pub fn get_versions(&self, desc: bool) -> Vec<i64> {
        let mut versions: Vec<i64> = self.diffs.keys().copied().collect();
        if let Some(v) = self.version {
            versions.push(v);
        }
        versions.sort_unstable();
        if desc {
            versions.reverse();
        }
        versions
    }

    /// Iterate over every version of this record's data, newest first.
    pub fn iter(&self) -> VersionIter<'_> {
        let pending: Vec<i64> = self.diffs.keys().rev().copied().collect();
        VersionIter {
            record: self,
            state: IterState::Head,
            base: self.data.clone(),
            pending: pending.into_iter(),
        }
    }
}

enum IterState {
    Head,
    Body,
    Done,
}

/// Yields [`VersionedData`] for a [`StoredRecord`], starting with the latest
/// data and walking backward through its diff chain to the first version.
pub struct VersionIter<'a> {
    record: &'a StoredRecord,
    state: IterState,
    base: Value,
    pending: std::vec::IntoIter<i64>,
}

impl<'a> Iterator for VersionIter<'a> {
    type Item = Result<VersionedData, PatchError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            IterState::Head => {
                self.state = IterState::Body;
                Some(Ok(VersionedData {
                    version: self.record.version,
                    data: self.base.clone(),
                }))
            }
            IterState::Body => match self.pending.next() {
                Some(version) => {
                    let ops = self
                        .record
                        .diffs
                        .get(&version)
                        .expect("version came from diffs keys");
                    match patch(&self.base, ops) {
                        Ok(data) => {
                            self.base = data.clone();
                            Some(Ok(VersionedData {
                                version: Some(version),
                                data,
                            }))
                        }
                        Err(e) => {
                            self.state = IterState::Done;
                            Some(Err(e))
                        }
                    }
                }
                None => {
                    self.state = IterState::Done;
                    None
                }
            },
            IterState::Done => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::diff::diff;
    use serde_json::json;

    fn v(raw: serde_json::Value) -> Value {
        Value::normalize(&raw).unwrap()
    }

    #[test]
    fn record_delete_detects_empty_data() {
        assert!(Record::delete("abc").is_delete());
        assert!(!Record::new(json!({"a": 1})).is_delete());
    }

    #[test]
    fn iter_walks_versions_newest_first() {
        let v1 = v(json!({"a": "1"}));
        let v2 = v(json!({"a": "2"}));
        let v3 = v(json!({"a": "3"}));

        // diffs map: patching v3 (current data) with diffs[2] gives v2's data,
        // patching v2 with diffs[1] gives v1's data
        let mut diffs = BTreeMap::new();
        diffs.insert(2, diff(&v3, &v2).unwrap());
        diffs.insert(1, diff(&v2, &v1).unwrap());

        let record = StoredRecord {
            id: "rec-1".to_string(),
            version: Some(3),
            data: v3.clone(),
            diffs,
        };

        let versions: Vec<VersionedData> = record.iter().map(|r| r.unwrap()).collect();
        assert_eq!(versions.len(), 3);
        assert_eq!(versions[0], VersionedData { version: Some(3), data: v3 });
        assert_eq!(versions[1], VersionedData { version: Some(2), data: v2 });
        assert_eq!(versions[2], VersionedData { version: Some(1), data: v1 });
    }

    #[test]
    fn get_versions_includes_current_and_sorts() {
        let mut diffs = BTreeMap::new();
        diffs.insert(1, DiffOps::new());
        diffs.insert(2, DiffOps::new());
        let record = StoredRecord {
            id: "rec-1".to_string(),
            version: Some(3),
            data: Value::Null,
            diffs,
        };
        assert_eq!(record.get_versions(false), vec![1, 2, 3]);
        assert_eq!(record.get_versions(true), vec![3, 2, 1]);
    }

    #[test]
    fn uncommitted_record_has_no_version() {
        let record = StoredRecord {
            id: "rec-1".to_string(),
            version: None,
            data: Value::Null,
            diffs: BTreeMap::new(),
        };
        assert!(record.is_uncommitted());
        assert_eq!(record.get_versions(false), Vec::<i64>::new());
    }
}
