//! Streaming planner: walks a record's version history and an ordered set
//! of parsing-option versions together, yielding the bulk operations needed
//! to bring the search store's indices up to date.
//!
//! Both streams run backwards (newest version first), mirroring how
//! [`crate::model::record::VersionIter`] reconstructs historical data. Every
//! data version always produces an operation; an options version only
//! produces one if it actually changes the parsed output (a geo hint change
//! with no matching fields in the data, for instance, changes nothing).

use std::collections::BTreeMap;

use crate::core::error::PlannerError;
use crate::fields::DocumentField;
use crate::index::names::{ArcStatus, IndexNames};
use crate::index::ops::BulkOp;
use crate::model::options::ParsingOptions;
use crate::model::record::StoredRecord;
use crate::parse::{parse, ParsedData};

/// Yield bulk operations that bring the search store's indices for
/// `indices` up to date for `record`, given every parsing-options version
/// that has ever applied to this database (`all_options`).
///
/// `after` is the exclusive version to start producing operations from -
/// typically the latest version already reflected in the search store. Pass
/// `None` to (re)index every version of the record.
///
/// Operations are yielded newest-first: the op for the latest index comes
/// first, followed by the older versions' ops in descending version order.
///
/// Returns the ops alongside the [`ArcStatus`] as it stood after this
/// record - callers indexing many records in one pass thread this back in
/// as `arc_status` for the next call so rotation carries over correctly.
pub fn generate_index_ops(
    indices: &IndexNames,
    arc_status: ArcStatus,
    record: &StoredRecord,
    all_options: &BTreeMap<i64, ParsingOptions>,
    after: Option<i64>,
    max_docs_per_archive: u64,
) -> Result<(Vec<BulkOp>, ArcStatus), PlannerError> {
    if all_options.is_empty() {
        return Err(PlannerError::Desync(
            "at least one parsing options version is required".to_string(),
        ));
    }

    let mut ops = Vec::new();
    let mut arc_index = arc_status.index;
    let mut arc_count = arc_status.count;

    let sorted_options: Vec<(i64, &ParsingOptions)> = {
        let mut v: Vec<(i64, &ParsingOptions)> = all_options.iter().map(|(k, v)| (*k, v)).collect();
        v.sort_by(|a, b| b.0.cmp(&a.0));
        v
    };
    let latest_option_version = *all_options.keys().max().unwrap();
    let after = after.unwrap_or(i64::MIN);

    let latest_record_version = record.version.unwrap_or(i64::MIN);
    if latest_record_version <= after && latest_option_version <= after {
        return Ok((ops, arc_status));
    }

    let versioned: Vec<(i64, Option<crate::model::value::Value>)> = {
        let mut out = Vec::new();
        for item in record.iter() {
            let versioned = item.map_err(|e| PlannerError::Desync(e.to_string()))?;
            let version = versioned.version.unwrap_or(latest_record_version);
            let data = if versioned.data.is_empty_map() || matches!(versioned.data, crate::model::value::Value::Null) {
                None
            } else {
                Some(versioned.data)
            };
            out.push((version, data));
        }
        if out.is_empty() {
            out.push((latest_record_version, None));
        }
        out
    };

    let mut data_iter = versioned.into_iter().peekable();
    let mut options_iter = sorted_options.into_iter().peekable();

    let (mut data_version, mut data) = data_iter.next().expect("at least one data version");
    let (mut options_version, mut options) = options_iter.next().expect("at least one options version");
    let mut version = data_version.max(options_version);
    let mut next_version: Option<i64> = None;
    let mut last_parsed_data: Option<ParsedData> = None;

    loop {
        match &data {
            None => {
                last_parsed_data = None;
                if next_version.is_none() {
                    ops.push(BulkOp::Delete {
                        index: indices.latest.clone(),
                        doc_id: record.id.clone(),
                    });
                }
            }
            Some(value) => {
                let parsed_data = parse(value, options);
                if Some(&parsed_data) != last_parsed_data.as_ref() {
                    let mut document = serde_json::Map::new();
                    document.insert(DocumentField::Id.to_string(), serde_json::Value::String(record.id.clone()));
                    document.insert(DocumentField::Version.to_string(), serde_json::json!(version));
                    let mut versions_range = serde_json::json!({ "gte": version });

                    let (index_name, doc_id) = if next_version.is_none() {
                        (indices.latest.clone(), Some(record.id.clone()))
                    } else {
                        let next = next_version.unwrap();
                        document.insert(DocumentField::Next.to_string(), serde_json::json!(next));
                        versions_range["lt"] = serde_json::json!(next);

                        if arc_count >= max_docs_per_archive {
                            arc_index += 1;
                            arc_count = 0;
                        }
                        let name = indices.get_arc(arc_index);
                        arc_count += 1;
                        (name, None)
                    };

                    document.insert(DocumentField::Versions.to_string(), versions_range);
                    document.insert(DocumentField::Data.to_string(), parsed_data.parsed.clone());
                    document.insert(DocumentField::DataTypes.to_string(), serde_json::json!(parsed_data.data_types));
                    document.insert(DocumentField::ParsedTypes.to_string(), serde_json::json!(parsed_data.parsed_types));

                    ops.push(BulkOp::Index {
                        index: index_name,
                        doc_id,
                        document: serde_json::Value::Object(document),
                    });
                    last_parsed_data = Some(parsed_data);
                }
            }
        }

        if version == data_version {
            match data_iter.next() {
                None => break,
                Some((v, d)) => {
                    data_version = v;
                    data = d;
                }
            }
        }
        if version == options_version {
            if let Some((v, o)) = options_iter.peek().copied() {
                options_iter.next();
                options_version = v;
                options = o;
            }
        }
        next_version = Some(version);
        version = data_version.max(options_version);

        if Some(version) == next_version {
            break;
        }
        if next_version.unwrap() <= after {
            break;
        }
    }

    Ok((
        ops,
        ArcStatus {
            index: arc_index,
            count: arc_count,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::diff::diff;
    use crate::model::options::ParsingOptionsBuilder;
    use crate::model::value::Value;
    use serde_json::json;

    fn v(raw: serde_json::Value) -> Value {
        Value::normalize(&raw).unwrap()
    }

    fn options() -> BTreeMap<i64, ParsingOptions> {
        let mut m = BTreeMap::new();
        m.insert(1, ParsingOptionsBuilder::new().with_defaults().build());
        m
    }

    #[test]
    fn fresh_record_produces_a_single_latest_index_op() {
        let data = v(json!({"name": "bob"}));
        let record = StoredRecord {
            id: "rec-1".to_string(),
            version: Some(1),
            data,
            diffs: BTreeMap::new(),
        };
        let indices = IndexNames::new("test");
        let (ops, _) = generate_index_ops(&indices, ArcStatus::default(), &record, &options(), None, 2_000_000).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].index(), indices.latest);
    }

    #[test]
    fn deleted_record_produces_a_delete_op() {
        let record = StoredRecord {
            id: "rec-1".to_string(),
            version: Some(2),
            data: Value::Map(BTreeMap::new()),
            diffs: BTreeMap::new(),
        };
        let indices = IndexNames::new("test");
        let (ops, _) = generate_index_ops(&indices, ArcStatus::default(), &record, &options(), None, 2_000_000).unwrap();
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0], BulkOp::Delete { .. }));
    }

    #[test]
    fn record_with_history_shunts_old_versions_into_archives() {
        let v1 = v(json!({"name": "bob"}));
        let v2 = v(json!({"name": "bobby"}));
        let mut diffs = BTreeMap::new();
        diffs.insert(1, diff(&v2, &v1).unwrap());
        let record = StoredRecord {
            id: "rec-1".to_string(),
            version: Some(2),
            data: v2,
            diffs,
        };
        let indices = IndexNames::new("test");
        let (ops, _) = generate_index_ops(&indices, ArcStatus::default(), &record, &options(), None, 2_000_000).unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].index(), indices.latest);
        assert_eq!(ops[1].index(), indices.get_arc(0));
    }

    #[test]
    fn after_version_skips_already_indexed_data() {
        let v1 = v(json!({"name": "bob"}));
        let v2 = v(json!({"name": "bobby"}));
        let mut diffs = BTreeMap::new();
        diffs.insert(1, diff(&v2, &v1).unwrap());
        let record = StoredRecord {
            id: "rec-1".to_string(),
            version: Some(2),
            data: v2,
            diffs,
        };
        let indices = IndexNames::new("test");
        let (ops, _) = generate_index_ops(&indices, ArcStatus::default(), &record, &options(), Some(2), 2_000_000).unwrap();
        assert!(ops.is_empty());
    }
}
