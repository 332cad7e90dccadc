//! Field catalog: the parsed-type and data-type tags attached to every field
//! path, and the aggregate [`FieldInfo`] structure built from a database's
//! `data_types`/`parsed_types` counts.

use std::collections::BTreeMap;
use std::fmt;

use crate::model::value::Value;

/// Checks that a field name is safe to use as a record key: non-empty, and
/// free of `^` (reserved for parsed-type tags) and `.` (reserved as a path
/// separator).
pub fn is_field_valid(name: &str) -> bool {
    !name.is_empty() && !name.contains('^') && !name.contains('.')
}

/// Names of the top-level fields in an indexed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentField {
    /// the record ID
    Id,
    /// the version of this document
    Version,
    /// the next version of this record, if any
    Next,
    /// the `[version, next)` range this document is valid for
    Versions,
    /// the record's raw data, not indexed
    Data,
    /// the parsed, searchable version of the data
    Parsed,
    /// type information about the fields found in the data
    DataTypes,
    /// type information about the fields found in the parsed data
    ParsedTypes,
    /// catch-all text field for "search everything" queries
    AllText,
    /// catch-all geo point field
    AllPoints,
    /// catch-all geo shape field
    AllShapes,
}

impl DocumentField {
    /// The field's name as it appears in an indexed document.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentField::Id => "id",
            DocumentField::Version => "version",
            DocumentField::Next => "next",
            DocumentField::Versions => "versions",
            DocumentField::Data => "data",
            DocumentField::Parsed => "parsed",
            DocumentField::DataTypes => "data_types",
            DocumentField::ParsedTypes => "parsed_types",
            DocumentField::AllText => "all_text",
            DocumentField::AllPoints => "all_points",
            DocumentField::AllShapes => "all_shapes",
        }
    }
}

impl fmt::Display for DocumentField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The possible parsed representations a value can be indexed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParsedType {
    /// numeric value
    Number,
    /// date value, stored as epoch millis
    Date,
    /// boolean value
    Boolean,
    /// full text, analyzed for free-text search
    Text,
    /// keyword, compared case-insensitively
    KeywordCaseInsensitive,
    /// keyword, compared case-sensitively
    KeywordCaseSensitive,
    /// geo point (a shape's centroid)
    GeoPoint,
    /// geo shape (the full geometry)
    GeoShape,
}

impl ParsedType {
    /// All parsed type variants, in a stable order.
    pub const ALL: [ParsedType; 8] = [
        ParsedType::Number,
        ParsedType::Date,
        ParsedType::Boolean,
        ParsedType::Text,
        ParsedType::KeywordCaseInsensitive,
        ParsedType::KeywordCaseSensitive,
        ParsedType::GeoPoint,
        ParsedType::GeoShape,
    ];

    /// The `^`-prefixed tag used as the parsed field's dynamic-template
    /// suffix and map key (e.g. `"^ki"`).
    pub fn tag(&self) -> &'static str {
        match self {
            ParsedType::Number => "^n",
            ParsedType::Date => "^d",
            ParsedType::Boolean => "^b",
            ParsedType::Text => "^t",
            ParsedType::KeywordCaseInsensitive => "^ki",
            ParsedType::KeywordCaseSensitive => "^ks",
            ParsedType::GeoPoint => "^gp",
            ParsedType::GeoShape => "^gs",
        }
    }

    /// Parse a tag (with or without the leading `^`) back into a variant.
    pub fn from_tag(tag: &str) -> Option<ParsedType> {
        let tag = tag.trim_start_matches('^');
        Some(match tag {
            "n" => ParsedType::Number,
            "d" => ParsedType::Date,
            "b" => ParsedType::Boolean,
            "t" => ParsedType::Text,
            "ki" => ParsedType::KeywordCaseInsensitive,
            "ks" => ParsedType::KeywordCaseSensitive,
            "gp" => ParsedType::GeoPoint,
            "gs" => ParsedType::GeoShape,
            _ => return None,
        })
    }

    /// Build the full path to a field indexed with this parsed type, e.g.
    /// `"parsed.occurrenceID.^ki"`.
    pub fn path_to(&self, field: &str) -> String {
        parsed_path(field, Some(*self))
    }
}

impl fmt::Display for ParsedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Build the path to `field` under the `parsed` document root, optionally
/// suffixed with a parsed type's tag.
pub fn parsed_path(field: &str, parsed_type: Option<ParsedType>) -> String {
    match parsed_type {
        Some(pt) => format!("{}.{}.{}", DocumentField::Parsed, field, pt),
        None => format!("{}.{}", DocumentField::Parsed, field),
    }
}

/// The type tags a value's raw (pre-parse) form can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DataType {
    /// absence of a value
    Null,
    /// a string
    Str,
    /// an integer (reserved; normalized values never carry this directly)
    Int,
    /// a float (reserved; normalized values never carry this directly)
    Float,
    /// a boolean (reserved; normalized values never carry this directly)
    Bool,
    /// a list
    List,
    /// a nested map
    Dict,
}

impl DataType {
    /// The lowercase name used in `data_types` catalog entries.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Null => "nonetype",
            DataType::Str => "str",
            DataType::Int => "int",
            DataType::Float => "float",
            DataType::Bool => "bool",
            DataType::List => "list",
            DataType::Dict => "dict",
        }
    }

    /// Parse a `data_types` catalog entry's type name back into a variant.
    pub fn from_str_name(name: &str) -> Option<DataType> {
        Some(match name {
            "nonetype" => DataType::Null,
            "str" => DataType::Str,
            "int" => DataType::Int,
            "float" => DataType::Float,
            "bool" => DataType::Bool,
            "list" => DataType::List,
            "dict" => DataType::Dict,
            _ => return None,
        })
    }

    /// Determine the data type tag for a normalized value. Since
    /// normalization already reduces every scalar to a string, this only
    /// ever returns `Null`, `Str`, `List`, or `Dict` in practice.
    pub fn type_for(value: &Value) -> DataType {
        match value {
            Value::Null => DataType::Null,
            Value::Str(_) => DataType::Str,
            Value::List(_) => DataType::List,
            Value::Map(_) => DataType::Dict,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-record-count information about the types seen at a single field path.
#[derive(Debug, Clone, Default)]
pub struct Field<T: Ord + Copy> {
    /// the dotted path this field information describes
    pub path: String,
    counts: BTreeMap<T, i64>,
}

impl<T: Ord + Copy> Field<T> {
    fn new(path: impl Into<String>) -> Self {
        Field {
            path: path.into(),
            counts: BTreeMap::new(),
        }
    }

    /// Record that `count` documents have this field with type `field_type`.
    pub fn add_type(&mut self, field_type: T, count: i64) {
        self.counts.insert(field_type, count);
    }

    /// The number of documents with this field as `field_type`, or 0 if the
    /// type wasn't seen at all.
    pub fn count(&self, field_type: T) -> i64 {
        self.counts.get(&field_type).copied().unwrap_or(0)
    }

    /// True if at least one of `types` has a nonzero count.
    pub fn is_types(&self, types: &[T]) -> bool {
        types.iter().any(|t| self.count(*t) > 0)
    }

    /// The depth of this field in the record structure: a root field has
    /// depth 0, `"a.b.c"` has depth 2.
    pub fn depth(&self) -> usize {
        self.path.matches('.').count()
    }

    /// The field's own name, i.e. the last path segment.
    pub fn name(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path)
    }

    /// All types seen at this field, in no particular order.
    pub fn types(&self) -> Vec<T> {
        self.counts.keys().copied().collect()
    }

    /// Total documents with this field present, across every type it was
    /// ever seen as.
    pub fn total_count(&self) -> i64 {
        self.counts.values().sum()
    }

    /// The dotted path of this field's parent, or `None` at the root.
    pub fn parent_path(&self) -> Option<&str> {
        self.path.rsplit_once('.').map(|(parent, _)| parent)
    }
}

/// Field information for the parsed, searchable side of a record.
pub type ParsedField = Field<ParsedType>;

/// Field information for a record's raw (pre-parse) data.
pub type DataField = Field<DataType>;

impl DataField {
    /// Checks if this field is a direct member of a list, i.e. its path has
    /// an empty segment (the placeholder used for list positions).
    pub fn is_list_member(&self) -> bool {
        self.path.split('.').any(|segment| segment.is_empty())
    }
}

/// Aggregate catalog of every field path seen in a database, at both the
/// data (pre-parse) and parsed (searchable) levels.
#[derive(Debug, Clone, Default)]
pub struct FieldInfo {
    data_fields: BTreeMap<String, DataField>,
    parsed_fields: BTreeMap<String, ParsedField>,
}

impl FieldInfo {
    /// Build an empty catalog.
    pub fn new() -> Self {
        FieldInfo::default()
    }

    /// Record a `data_types` catalog entry (`"field.path.str"`) and its count.
    pub fn add_data_type(&mut self, full_path: &str, count: i64) {
        if let Some((path, type_name)) = full_path.rsplit_once('.') {
            if let Some(data_type) = DataType::from_str_name(type_name) {
                self.data_fields
                    .entry(path.to_string())
                    .or_insert_with(|| DataField::new(path))
                    .add_type(data_type, count);
            }
        }
    }

    /// Record a `parsed_types` catalog entry (`"field.path.^ki"`) and its count.
    pub fn add_parsed_type(&mut self, full_path: &str, count: i64) {
        if let Some((path, tag)) = full_path.rsplit_once('.') {
            if let Some(parsed_type) = ParsedType::from_tag(tag) {
                self.parsed_fields
                    .entry(path.to_string())
                    .or_insert_with(|| ParsedField::new(path))
                    .add_type(parsed_type, count);
            }
        }
    }

    /// Iterate over all known data fields.
    pub fn iter_data_fields(&self) -> impl Iterator<Item = &DataField> {
        self.data_fields.values()
    }

    /// Iterate over all known parsed fields.
    pub fn iter_parsed_fields(&self) -> impl Iterator<Item = &ParsedField> {
        self.parsed_fields.values()
    }

    /// Look up a data field by path.
    pub fn get_data_field(&self, path: &str) -> Option<&DataField> {
        self.data_fields.get(path)
    }

    /// Look up a parsed field by path.
    pub fn get_parsed_field(&self, path: &str) -> Option<&ParsedField> {
        self.parsed_fields.get(path)
    }

    /// Every data field, sorted by total document count descending, then by
    /// path ascending to break ties - the order `get_data_fields` presents a
    /// database's schema surface in.
    pub fn data_fields_sorted(&self) -> Vec<&DataField> {
        sorted_by_count(self.data_fields.values())
    }

    /// Every parsed field, sorted the same way as [`FieldInfo::data_fields_sorted`].
    pub fn parsed_fields_sorted(&self) -> Vec<&ParsedField> {
        sorted_by_count(self.parsed_fields.values())
    }

    /// The parent of a data field in the hierarchy, if any.
    pub fn data_field_parent(&self, field: &DataField) -> Option<&DataField> {
        self.data_fields.get(field.parent_path()?)
    }

    /// The parent of a parsed field in the hierarchy, if any.
    pub fn parsed_field_parent(&self, field: &ParsedField) -> Option<&ParsedField> {
        self.parsed_fields.get(field.parent_path()?)
    }

    /// The immediate children of `parent` in the data field tree, or the
    /// root fields if `parent` is `None`.
    pub fn get_data_field_children(&self, parent: Option<&DataField>) -> Vec<&DataField> {
        match parent {
            None => self
                .data_fields
                .values()
                .filter(|f| f.depth() == 0)
                .collect(),
            Some(parent) => {
                if !parent.is_types(&[DataType::List, DataType::Dict]) {
                    return Vec::new();
                }
                let prefix = format!("{}.", parent.path);
                self.data_fields
                    .values()
                    .filter(|f| f.depth() == parent.depth() + 1 && f.path.starts_with(&prefix))
                    .collect()
            }
        }
    }
}

/// Sort fields by total document count descending, then path ascending, as
/// `get_data_fields`/`get_parsed_fields` present a database's schema surface.
fn sorted_by_count<'a, T: Ord + Copy + 'a>(
    fields: impl Iterator<Item = &'a Field<T>>,
) -> Vec<&'a Field<T>> {
    let mut fields: Vec<&Field<T>> = fields.collect();
    fields.sort_by(|a, b| b.total_count().cmp(&a.total_count()).then_with(|| a.path.cmp(&b.path)));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_field_names() {
        assert!(is_field_valid("occurrenceID"));
        assert!(!is_field_valid(""));
        assert!(!is_field_valid("a^b"));
        assert!(!is_field_valid("a.b"));
    }

    #[test]
    fn parsed_type_tag_round_trips() {
        for pt in ParsedType::ALL {
            assert_eq!(ParsedType::from_tag(pt.tag()), Some(pt));
        }
    }

    #[test]
    fn field_info_aggregates_counts() {
        let mut info = FieldInfo::new();
        info.add_data_type("a.b.str", 5);
        info.add_data_type("a.b.dict", 2);
        info.add_parsed_type("a.b.^t", 5);
        info.add_parsed_type("a.b.^n", 3);

        let data_field = info.get_data_field("a.b").unwrap();
        assert_eq!(data_field.count(DataType::Str), 5);
        assert_eq!(data_field.count(DataType::Dict), 2);
        assert_eq!(data_field.count(DataType::Bool), 0);
        assert_eq!(data_field.depth(), 1);
        assert_eq!(data_field.name(), "b");

        let parsed_field = info.get_parsed_field("a.b").unwrap();
        assert!(parsed_field.is_types(&[ParsedType::Text]));
    }

    #[test]
    fn sorted_fields_rank_by_total_count_then_path() {
        let mut info = FieldInfo::new();
        info.add_data_type("scientificName.str", 3);
        info.add_data_type("country.str", 10);
        info.add_data_type("locality.str", 10);

        let sorted = info.data_fields_sorted();
        let paths: Vec<&str> = sorted.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["country", "locality", "scientificName"]);
    }

    #[test]
    fn data_field_parent_links_up_the_hierarchy() {
        let mut info = FieldInfo::new();
        info.add_data_type("event.location.str", 4);
        info.add_data_type("event.str", 1);

        let child = info.get_data_field("event.location").unwrap();
        let parent = info.data_field_parent(child).unwrap();
        assert_eq!(parent.path, "event");
        assert!(info.data_field_parent(parent).is_none());
    }

    #[test]
    fn list_member_detection() {
        let field = DataField::new("a..b");
        assert!(field.is_list_member());
        let field = DataField::new("a.b");
        assert!(!field.is_list_member());
    }

    #[test]
    fn data_field_children_requires_container_type() {
        let mut info = FieldInfo::new();
        info.add_data_type("a.str", 1);
        info.add_data_type("b.str", 1);
        let root_children = info.get_data_field_children(None);
        assert_eq!(root_children.len(), 2);

        let scalar_field = info.get_data_field("a").unwrap().clone();
        assert!(info.get_data_field_children(Some(&scalar_field)).is_empty());
    }
}
