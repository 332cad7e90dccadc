//! The value parser: turns a record's normalized data into the typed,
//! searchable `parsed` tree plus the `data_types`/`parsed_types` catalogs
//! that get indexed alongside it.
//!
//! Every scalar is tried against every typed interpretation we know how to
//! produce (text, case-sensitive/insensitive keyword, number, boolean, date,
//! geo point/shape) rather than picking one; a caller never knows ahead of
//! time which interpretations a search will need. Per-value results are
//! memoized since the same scalar (an occurrence ID, a taxon name, a country
//! code) recurs across millions of records sharing the same parsing options.

use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use lru::LruCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::fields::{DataType, ParsedType};
use crate::geo::{match_geojson, match_hints};
use crate::model::options::GeoFieldHint;
use crate::model::value::Value;
use crate::model::ParsingOptions;

/// Every typed interpretation recognized for a single scalar value. Fields
/// left `None` mean that interpretation wasn't recognized (e.g. `"banana"`
/// has no `number`), not that it hasn't been checked yet - every field here
/// is fully populated on construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedValue {
    /// the full, un-truncated text
    pub text: Option<String>,
    /// the text truncated to the keyword length and lowercased
    pub keyword_ci: Option<String>,
    /// the text truncated to the keyword length, original case preserved
    pub keyword_cs: Option<String>,
    /// the value parsed as a number
    pub number: Option<f64>,
    /// the value parsed as a boolean
    pub boolean: Option<bool>,
    /// the value parsed as a date, as milliseconds since the Unix epoch
    pub date: Option<i64>,
    /// WKT for the value's geo point, if it was recognized as geometry
    pub geo_point: Option<String>,
    /// WKT for the value's geo shape, if it was recognized as geometry
    pub geo_shape: Option<String>,
}

impl ParsedValue {
    /// The parsed types this value was recognized as, in [`ParsedType::ALL`] order.
    pub fn parsed_types(&self) -> Vec<ParsedType> {
        ParsedType::ALL
            .into_iter()
            .filter(|pt| self.has(*pt))
            .collect()
    }

    fn has(&self, parsed_type: ParsedType) -> bool {
        match parsed_type {
            ParsedType::Text => self.text.is_some(),
            ParsedType::KeywordCaseInsensitive => self.keyword_ci.is_some(),
            ParsedType::KeywordCaseSensitive => self.keyword_cs.is_some(),
            ParsedType::Number => self.number.is_some(),
            ParsedType::Boolean => self.boolean.is_some(),
            ParsedType::Date => self.date.is_some(),
            ParsedType::GeoPoint => self.geo_point.is_some(),
            ParsedType::GeoShape => self.geo_shape.is_some(),
        }
    }

    /// Render as the tag-keyed JSON object stored at this value's leaf in
    /// the `parsed` document tree (e.g. `{"^t": "10.5", "^n": 10.5}`).
    pub fn to_json_map(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut m = serde_json::Map::new();
        if let Some(t) = &self.text {
            m.insert(ParsedType::Text.tag().to_string(), serde_json::Value::String(t.clone()));
        }
        if let Some(k) = &self.keyword_ci {
            m.insert(
                ParsedType::KeywordCaseInsensitive.tag().to_string(),
                serde_json::Value::String(k.clone()),
            );
        }
        if let Some(k) = &self.keyword_cs {
            m.insert(
                ParsedType::KeywordCaseSensitive.tag().to_string(),
                serde_json::Value::String(k.clone()),
            );
        }
        if let Some(n) = self.number {
            if let Some(num) = serde_json::Number::from_f64(n) {
                m.insert(ParsedType::Number.tag().to_string(), serde_json::Value::Number(num));
            }
        }
        if let Some(b) = self.boolean {
            m.insert(ParsedType::Boolean.tag().to_string(), serde_json::Value::Bool(b));
        }
        if let Some(d) = self.date {
            m.insert(ParsedType::Date.tag().to_string(), serde_json::Value::Number(d.into()));
        }
        if let Some(p) = &self.geo_point {
            m.insert(ParsedType::GeoPoint.tag().to_string(), serde_json::Value::String(p.clone()));
        }
        if let Some(s) = &self.geo_shape {
            m.insert(ParsedType::GeoShape.tag().to_string(), serde_json::Value::String(s.clone()));
        }
        m
    }
}

/// The result of parsing a whole record: the searchable `parsed` tree and
/// the compressed field/type catalogs that summarize it.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedData {
    /// the parsed, searchable document tree
    pub parsed: serde_json::Value,
    /// compressed `"field.path.type[,type...]"` entries over the raw data
    pub data_types: Vec<String>,
    /// compressed `"field.path.^tag[,^tag...]"` entries over the parsed data
    pub parsed_types: Vec<String>,
}

/// Memoized per-value parser. A value's typed interpretations depend only
/// on its text and the parsing options in force, so results are cached
/// keyed on both.
pub struct ValueParser {
    cache: Mutex<LruCache<(String, ParsingOptions), Arc<ParsedValue>>>,
}

impl ValueParser {
    /// Build a parser with the standard one-million-entry cache.
    pub fn new() -> Self {
        ValueParser {
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(1_000_000).unwrap())),
        }
    }

    /// Parse a single scalar's text against `options`, consulting and
    /// populating the cache.
    pub fn parse_value(&self, value: &str, options: &ParsingOptions) -> Arc<ParsedValue> {
        let key = (value.to_string(), options.clone());
        {
            let mut cache = self.cache.lock();
            if let Some(hit) = cache.get(&key) {
                return hit.clone();
            }
        }
        let parsed = Arc::new(parse_scalar(value, options));
        self.cache.lock().put(key, parsed.clone());
        parsed
    }
}

impl Default for ValueParser {
    fn default() -> Self {
        Self::new()
    }
}

static VALUE_CACHE: Lazy<ValueParser> = Lazy::new(ValueParser::new);

/// Parse a single scalar's text into every typed interpretation we
/// recognize for it. Not memoized; callers on a hot path should go through
/// [`VALUE_CACHE`] via [`parse`]/[`parse_dict`]/[`parse_list`] instead.
fn parse_scalar(value: &str, options: &ParsingOptions) -> ParsedValue {
    let truncate_len = options.keyword_length as usize;
    let truncated: String = value.chars().take(truncate_len).collect();

    let mut parsed = ParsedValue {
        text: Some(value.to_string()),
        keyword_cs: Some(truncated.clone()),
        keyword_ci: Some(truncated.to_lowercase()),
        ..ParsedValue::default()
    };

    if let Some(geo) = crate::geo::match_wkt(value) {
        parsed.geo_point = Some(geo.point_wkt);
        parsed.geo_shape = Some(geo.shape_wkt);
    }

    let lower = value.to_lowercase();
    if options.true_values.contains(&lower) {
        parsed.boolean = Some(true);
    } else if options.false_values.contains(&lower) {
        parsed.boolean = Some(false);
    }

    if let Ok(n) = value.trim().parse::<f64>() {
        if n.is_finite() {
            parsed.number = Some(n);
        }
    }

    for format in &options.date_formats {
        if let Some(ts) = try_parse_date(value, format) {
            parsed.date = Some(ts);
            break;
        }
    }

    parsed
}

/// Try every reasonable interpretation of `format` as a chrono strptime
/// pattern: with an offset, without one (assumed UTC), and date-only.
fn try_parse_date(value: &str, format: &str) -> Option<i64> {
    if let Ok(dt) = chrono::DateTime::parse_from_str(value, format) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(value, format) {
        return Some(Utc.from_utc_datetime(&ndt).timestamp_millis());
    }
    if let Ok(nd) = NaiveDate::parse_from_str(value, format) {
        let ndt = nd.and_hms_opt(0, 0, 0)?;
        return Some(Utc.from_utc_datetime(&ndt).timestamp_millis());
    }
    None
}

/// Parse a whole record's normalized data, returning the searchable
/// `parsed` tree and its compressed field/type catalogs.
pub fn parse(data: &Value, options: &ParsingOptions) -> ParsedData {
    let hints: Vec<GeoFieldHint> = options.geo_hints.iter().cloned().collect();
    let (parsed, mut data_types, mut parsed_types) = parse_dict(data, options, &hints, false);

    parsed_types.sort();
    let parsed_types = compress_paths(parsed_types);
    data_types.sort();
    let data_types = compress_paths(data_types);

    ParsedData { parsed, data_types, parsed_types }
}

fn parse_dict(
    node: &Value,
    options: &ParsingOptions,
    hints: &[GeoFieldHint],
    check_geojson: bool,
) -> (serde_json::Value, Vec<String>, Vec<String>) {
    let map = node.as_map().expect("parse_dict called on a non-map value");
    let mut parsed = serde_json::Map::new();
    let mut data_types: Vec<String> = map
        .iter()
        .map(|(key, value)| format!("{}.{}", key, DataType::type_for(value)))
        .collect();
    let mut parsed_types: Vec<String> = Vec::new();

    if check_geojson {
        if let Some(geo) = match_geojson(node) {
            parsed.insert(ParsedType::GeoPoint.tag().to_string(), serde_json::Value::String(geo.point_wkt));
            parsed.insert(ParsedType::GeoShape.tag().to_string(), serde_json::Value::String(geo.shape_wkt));
            parsed_types.push(ParsedType::GeoPoint.tag().to_string());
            parsed_types.push(ParsedType::GeoShape.tag().to_string());
        }
    }

    for (key, value) in map {
        match value {
            Value::Map(child) if !child.is_empty() => {
                let (child_parsed, dts, pts) = parse_dict(value, options, hints, true);
                parsed.insert(key.clone(), child_parsed);
                data_types.extend(dts.into_iter().map(|dt| format!("{}.{}", key, dt)));
                parsed_types.extend(pts.into_iter().map(|pt| format!("{}.{}", key, pt)));
            }
            Value::List(items) if !items.is_empty() => {
                let (child_parsed, dts, pts) = parse_list(value, options, hints);
                parsed.insert(key.clone(), child_parsed);
                data_types.extend(dts.into_iter().map(|dt| format!("{}.{}", key, dt)));
                parsed_types.extend(pts.into_iter().map(|pt| format!("{}.{}", key, pt)));
            }
            Value::Map(_) | Value::List(_) | Value::Null => {
                // empty container or null, nothing to index
            }
            Value::Str(s) => {
                if s.is_empty() {
                    continue;
                }
                let parsed_value = VALUE_CACHE.parse_value(s, options);
                let leaf = parsed_value.to_json_map();
                if !leaf.is_empty() {
                    for tag in parsed_value.parsed_types() {
                        parsed_types.push(format!("{}.{}", key, tag.tag()));
                    }
                    parsed.insert(key.clone(), serde_json::Value::Object(leaf));
                }
            }
        }
    }

    for (key, geo) in match_hints(node, hints) {
        let entry = parsed
            .entry(key.clone())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        if let serde_json::Value::Object(obj) = entry {
            obj.insert(ParsedType::GeoPoint.tag().to_string(), serde_json::Value::String(geo.point_wkt));
            obj.insert(ParsedType::GeoShape.tag().to_string(), serde_json::Value::String(geo.shape_wkt));
        }
        parsed_types.push(format!("{}.{}", key, ParsedType::GeoPoint.tag()));
        parsed_types.push(format!("{}.{}", key, ParsedType::GeoShape.tag()));
    }

    (serde_json::Value::Object(parsed), data_types, parsed_types)
}

fn parse_list(
    node: &Value,
    options: &ParsingOptions,
    hints: &[GeoFieldHint],
) -> (serde_json::Value, Vec<String>, Vec<String>) {
    let items = node.as_list().expect("parse_list called on a non-list value");
    let mut parsed: Vec<serde_json::Value> = vec![serde_json::Value::Null; items.len()];
    // Elasticsearch flattens lists entirely, so positions are discarded for
    // the type catalogs and only the leading `.` placeholder segment is kept.
    let mut data_types: BTreeSet<String> = BTreeSet::new();
    let mut parsed_types: BTreeSet<String> = BTreeSet::new();

    for (index, value) in items.iter().enumerate() {
        data_types.insert(format!(".{}", DataType::type_for(value)));
        match value {
            Value::Map(child) if !child.is_empty() => {
                let (child_parsed, dts, pts) = parse_dict(value, options, hints, true);
                parsed[index] = child_parsed;
                data_types.extend(dts.into_iter().map(|dt| format!(".{}", dt)));
                parsed_types.extend(pts);
            }
            Value::List(l) if !l.is_empty() => {
                let (child_parsed, dts, pts) = parse_list(value, options, hints);
                parsed[index] = child_parsed;
                data_types.extend(dts.into_iter().map(|dt| format!(".{}", dt)));
                parsed_types.extend(pts);
            }
            Value::Str(s) if !s.is_empty() => {
                let parsed_value = VALUE_CACHE.parse_value(s, options);
                let leaf = parsed_value.to_json_map();
                if !leaf.is_empty() {
                    parsed[index] = serde_json::Value::Object(leaf);
                    parsed_types.extend(parsed_value.parsed_types().into_iter().map(|pt| pt.tag().to_string()));
                }
            }
            _ => {}
        }
    }

    (
        serde_json::Value::Array(parsed),
        data_types.into_iter().collect(),
        parsed_types.into_iter().collect(),
    )
}

/// Compress a sorted list of `"path.type"` catalog entries by grouping
/// entries that share a path and joining their types with commas, e.g.
/// `["a.str", "a.dict"]` becomes `["a.str,dict"]`.
fn compress_paths(entries: Vec<String>) -> Vec<String> {
    let mut out = Vec::new();
    let mut iter = entries.into_iter().peekable();
    while let Some(first) = iter.next() {
        let (path, suffix) = first
            .rsplit_once('.')
            .expect("catalog entries always have a path and a type suffix");
        let path = path.to_string();
        let mut suffixes = vec![suffix.to_string()];
        while let Some(next) = iter.peek() {
            match next.rsplit_once('.') {
                Some((next_path, next_suffix)) if next_path == path => {
                    suffixes.push(next_suffix.to_string());
                    iter.next();
                }
                _ => break,
            }
        }
        out.push(format!("{}.{}", path, suffixes.join(",")));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn opts() -> ParsingOptions {
        crate::model::ParsingOptionsBuilder::new().with_defaults().build()
    }

    fn v(raw: serde_json::Value) -> Value {
        Value::normalize(&raw).unwrap()
    }

    #[test]
    fn scalar_recognizes_text_keyword_number_boolean() {
        let options = opts();
        let parsed = parse_scalar("42.5", &options);
        assert_eq!(parsed.text.as_deref(), Some("42.5"));
        assert_eq!(parsed.keyword_cs.as_deref(), Some("42.5"));
        assert_eq!(parsed.keyword_ci.as_deref(), Some("42.5"));
        assert_eq!(parsed.number, Some(42.5));
        assert_eq!(parsed.boolean, None);

        let parsed = parse_scalar("Yes", &options);
        assert_eq!(parsed.boolean, Some(true));
        assert_eq!(parsed.number, None);
    }

    #[test]
    fn scalar_keyword_is_truncated_and_lowercased() {
        let options = crate::model::ParsingOptionsBuilder::new()
            .with_keyword_length(3)
            .build();
        let parsed = parse_scalar("ABCDEF", &options);
        assert_eq!(parsed.keyword_cs.as_deref(), Some("ABC"));
        assert_eq!(parsed.keyword_ci.as_deref(), Some("abc"));
        assert_eq!(parsed.text.as_deref(), Some("ABCDEF"));
    }

    #[test]
    fn scalar_recognizes_date() {
        let options = opts();
        let parsed = parse_scalar("2024-01-15", &options);
        assert!(parsed.date.is_some());
    }

    #[test]
    fn scalar_recognizes_wkt_point() {
        let options = opts();
        let parsed = parse_scalar("POINT (30 10)", &options);
        assert!(parsed.geo_point.is_some());
        assert!(parsed.geo_shape.is_some());
    }

    #[test]
    fn dict_skips_empty_strings_and_empty_containers() {
        let options = opts();
        let data = v(json!({"empty_str": "", "empty_list": [], "empty_dict": {}, "name": "bob"}));
        let result = parse(&data, &options);
        let obj = result.parsed.as_object().unwrap();
        assert!(!obj.contains_key("empty_str"));
        assert!(!obj.contains_key("empty_list"));
        assert!(!obj.contains_key("empty_dict"));
        assert!(obj.contains_key("name"));
    }

    #[test]
    fn dict_recurses_into_nested_maps_and_lists() {
        let options = opts();
        let data = v(json!({"a": {"b": "1"}, "c": ["x", "y"]}));
        let result = parse(&data, &options);
        let obj = result.parsed.as_object().unwrap();
        let a = obj.get("a").unwrap().as_object().unwrap();
        assert!(a.get("b").unwrap().is_object());
        let c = obj.get("c").unwrap().as_array().unwrap();
        assert_eq!(c.len(), 2);
        assert!(c[0].is_object());
    }

    #[test]
    fn list_preserves_positions_with_null_for_skipped_entries() {
        let options = opts();
        let data = v(json!({"tags": ["a", "", "b"]}));
        let result = parse(&data, &options);
        let tags = result.parsed["tags"].as_array().unwrap();
        assert_eq!(tags.len(), 3);
        assert!(tags[0].is_object());
        assert!(tags[1].is_null());
        assert!(tags[2].is_object());
    }

    #[test]
    fn nested_dict_recognized_as_geojson() {
        let options = opts();
        let data = v(json!({"location": {"type": "Point", "coordinates": [30.0, 10.0]}}));
        let result = parse(&data, &options);
        let location = result.parsed["location"].as_object().unwrap();
        assert!(location.contains_key(ParsedType::GeoPoint.tag()));
        assert!(location.contains_key(ParsedType::GeoShape.tag()));
        // "type" and "coordinates" are still indexed as ordinary fields too
        assert!(location.contains_key("type"));
    }

    #[test]
    fn geo_hints_merge_into_existing_scalar_leaf() {
        let options = crate::model::ParsingOptionsBuilder::new()
            .with_geo_hint("lat", "lon", None)
            .build();
        let data = v(json!({"lat": "10.0", "lon": "20.0"}));
        let result = parse(&data, &options);
        let lat = result.parsed["lat"].as_object().unwrap();
        // the plain text/keyword entries from parsing "10.0" as a scalar...
        assert!(lat.contains_key(ParsedType::Text.tag()));
        // ...plus the geo point/shape added by the hint match
        assert!(lat.contains_key(ParsedType::GeoPoint.tag()));
        assert!(lat.contains_key(ParsedType::GeoShape.tag()));
    }

    #[test]
    fn compress_paths_groups_shared_prefixes() {
        let entries = vec![
            "a.dict".to_string(),
            "a.str".to_string(),
            "b.str".to_string(),
        ];
        let mut entries = entries;
        entries.sort();
        let compressed = compress_paths(entries);
        assert_eq!(compressed, vec!["a.dict,str".to_string(), "b.str".to_string()]);
    }

    #[test]
    fn parse_catalogs_are_compressed_and_sorted() {
        let options = opts();
        let data = v(json!({"a": "1", "b": {"c": "2"}}));
        let result = parse(&data, &options);
        // every entry in the catalogs is a compressed "path.type[,type]" string
        assert!(result.data_types.iter().all(|e| e.contains('.')));
        let mut sorted = result.data_types.clone();
        sorted.sort();
        assert_eq!(result.data_types, sorted);
    }

    #[test]
    fn value_parser_cache_returns_equal_results_for_repeated_values() {
        let parser = ValueParser::new();
        let options = opts();
        let a = parser.parse_value("42", &options);
        let b = parser.parse_value("42", &options);
        assert_eq!(a, b);
    }
}
