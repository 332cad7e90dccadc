//! Parsing options: the per-database-and-time-range settings that tell the
//! value parser how to recognize booleans, dates, and geo fields, and how to
//! index keywords and floats.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// lowercase string values accepted as boolean `true`
pub const DEFAULT_TRUE_VALUES: &[&str] = &["true", "yes", "y"];
/// lowercase string values accepted as boolean `false`
pub const DEFAULT_FALSE_VALUES: &[&str] = &["false", "no", "n"];

/// strptime-style date formats tried, in order, when recognizing a date value
pub const DEFAULT_DATE_FORMATS: &[&str] = &[
    "%Y",
    "%Y-%m-%d",
    "%Y-%m",
    "%Y%m%d",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];

/// Names the fields in a record that together describe a latitude/longitude
/// point, and optionally an uncertainty radius around it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GeoFieldHint {
    /// the field holding the latitude component
    pub lat_field: String,
    /// the field holding the longitude component
    pub lon_field: String,
    /// the field holding an uncertainty radius, in meters, if any
    pub radius_field: Option<String>,
    /// number of segments used when approximating a circle as a polygon;
    /// higher values produce a more accurate but more complex polygon
    pub segments: u32,
}

impl GeoFieldHint {
    /// Build a hint with the default segment count (16, giving a 65-vertex
    /// polygon once the closing vertex is repeated).
    pub fn new(lat_field: impl Into<String>, lon_field: impl Into<String>, radius_field: Option<String>) -> Self {
        GeoFieldHint {
            lat_field: lat_field.into(),
            lon_field: lon_field.into(),
            radius_field,
            segments: 16,
        }
    }
}

/// Default hints: the common `lat`/`lon` pair, `latitude`/`longitude` with
/// and without a radius, and the Darwin Core decimal lat/lon fields with and
/// without their coordinate uncertainty field.
pub fn default_geo_hints() -> Vec<GeoFieldHint> {
    vec![
        GeoFieldHint::new("lat", "lon", None),
        GeoFieldHint::new("latitude", "longitude", None),
        GeoFieldHint::new("latitude", "longitude", Some("radius".to_string())),
        GeoFieldHint::new("decimalLatitude", "decimalLongitude", None),
        GeoFieldHint::new(
            "decimalLatitude",
            "decimalLongitude",
            Some("coordinateUncertaintyInMeters".to_string()),
        ),
    ]
}

/// Immutable parsing options. Used directly as a memoization cache key, so
/// every field must hash deterministically regardless of the order options
/// were added to the builder in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParsingOptions {
    /// lowercase strings parsed as boolean `true`
    pub true_values: BTreeSet<String>,
    /// lowercase strings parsed as boolean `false`
    pub false_values: BTreeSet<String>,
    /// date formats tried, in sorted order, when recognizing a date value
    pub date_formats: BTreeSet<String>,
    /// hints used to recognize geo fields in a record
    pub geo_hints: BTreeSet<GeoFieldHint>,
    /// maximum length of keyword strings (both case-sensitive and
    /// case-insensitive); longer strings are truncated before indexing.
    /// Must be in `0..=i32::MAX`.
    pub keyword_length: u32,
    /// format string used to render a float for indexing
    pub float_format: String,
}

/// Builds a [`ParsingOptions`], deduplicating repeated calls and enforcing
/// at most one geo hint per latitude field name.
#[derive(Debug, Clone, Default)]
pub struct ParsingOptionsBuilder {
    true_values: BTreeSet<String>,
    false_values: BTreeSet<String>,
    date_formats: BTreeSet<String>,
    geo_hints: Vec<GeoFieldHint>,
    keyword_length: u32,
    float_format: String,
}

impl ParsingOptionsBuilder {
    /// Start a builder with no options set (keyword length and float format
    /// default to the same values `with_defaults` would apply, since an
    /// options object needs them to be well-formed even if a caller never
    /// calls the `with_default_*` methods for them).
    pub fn new() -> Self {
        ParsingOptionsBuilder {
            true_values: BTreeSet::new(),
            false_values: BTreeSet::new(),
            date_formats: BTreeSet::new(),
            geo_hints: Vec::new(),
            keyword_length: 2_147_483_647,
            float_format: "{0:.15g}".to_string(),
        }
    }

    /// Finish building, producing an immutable [`ParsingOptions`].
    pub fn build(self) -> ParsingOptions {
        ParsingOptions {
            true_values: self.true_values,
            false_values: self.false_values,
            date_formats: self.date_formats,
            geo_hints: self.geo_hints.into_iter().collect(),
            keyword_length: self.keyword_length,
            float_format: self.float_format,
        }
    }

    /// Add a value recognized as boolean `true`. Lowercased before storing.
    pub fn with_true_value(mut self, value: impl AsRef<str>) -> Self {
        self.true_values.insert(value.as_ref().to_lowercase());
        self
    }

    /// Add a value recognized as boolean `false`. Lowercased before storing.
    pub fn with_false_value(mut self, value: impl AsRef<str>) -> Self {
        self.false_values.insert(value.as_ref().to_lowercase());
        self
    }

    /// Add a date format string to try when recognizing dates.
    pub fn with_date_format(mut self, format: impl Into<String>) -> Self {
        let format = format.into();
        if !format.is_empty() {
            self.date_formats.insert(format);
        }
        self
    }

    /// Add a lat/lon/radius field combination as a geo hint. At most one
    /// hint is kept per latitude field name; a later call with the same
    /// `lat_field` is ignored and the earlier one wins, matching a set's
    /// insert-if-absent semantics over hints equal-by-`lat_field`.
    pub fn with_geo_hint(
        mut self,
        lat_field: impl Into<String>,
        lon_field: impl Into<String>,
        radius_field: Option<String>,
    ) -> Self {
        let lat_field = lat_field.into();
        let lon_field = lon_field.into();
        if lat_field.is_empty() || lon_field.is_empty() {
            return self;
        }
        if self.geo_hints.iter().any(|h| h.lat_field == lat_field) {
            return self;
        }
        self.geo_hints.push(GeoFieldHint::new(lat_field, lon_field, radius_field));
        self
    }

    /// Set the maximum keyword length, clamped to `0..=2147483647`.
    pub fn with_keyword_length(mut self, keyword_length: u32) -> Self {
        self.keyword_length = keyword_length.min(2_147_483_647);
        self
    }

    /// Set the float rendering format string.
    pub fn with_float_format(mut self, float_format: impl Into<String>) -> Self {
        self.float_format = float_format.into();
        self
    }

    /// Apply the default booleans, date formats, geo hints, keyword length
    /// and float format in one call.
    pub fn with_defaults(self) -> Self {
        self.with_default_boolean_values()
            .with_default_date_formats()
            .with_default_geo_hints()
            .with_default_keyword_length()
            .with_default_float_format()
    }

    /// Add [`DEFAULT_TRUE_VALUES`] and [`DEFAULT_FALSE_VALUES`].
    pub fn with_default_boolean_values(mut self) -> Self {
        for v in DEFAULT_TRUE_VALUES {
            self = self.with_true_value(v);
        }
        for v in DEFAULT_FALSE_VALUES {
            self = self.with_false_value(v);
        }
        self
    }

    /// Add [`DEFAULT_DATE_FORMATS`].
    pub fn with_default_date_formats(mut self) -> Self {
        for f in DEFAULT_DATE_FORMATS {
            self = self.with_date_format(*f);
        }
        self
    }

    /// Add the default geo hints (see [`default_geo_hints`]).
    pub fn with_default_geo_hints(mut self) -> Self {
        for hint in default_geo_hints() {
            self = self.with_geo_hint(hint.lat_field, hint.lon_field, hint.radius_field);
        }
        self
    }

    /// Set the keyword length to its default, `2147483647`.
    pub fn with_default_keyword_length(self) -> Self {
        self.with_keyword_length(2_147_483_647)
    }

    /// Set the float format to its default, `"{0:.15g}"`.
    pub fn with_default_float_format(self) -> Self {
        self.with_float_format("{0:.15g}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_expected_values() {
        let opts = ParsingOptionsBuilder::new().with_defaults().build();
        assert_eq!(opts.true_values.len(), 3);
        assert_eq!(opts.false_values.len(), 3);
        assert_eq!(opts.date_formats.len(), DEFAULT_DATE_FORMATS.len());
        assert_eq!(opts.geo_hints.len(), 3);
        assert_eq!(opts.keyword_length, 2_147_483_647);
        assert_eq!(opts.float_format, "{0:.15g}");
    }

    #[test]
    fn keyword_length_is_clamped() {
        let opts = ParsingOptionsBuilder::new()
            .with_keyword_length(u32::MAX)
            .build();
        assert_eq!(opts.keyword_length, 2_147_483_647);
    }

    #[test]
    fn geo_hint_dedupes_by_lat_field() {
        let opts = ParsingOptionsBuilder::new()
            .with_geo_hint("lat", "lon", None)
            .with_geo_hint("lat", "lng", Some("radius".to_string()))
            .build();
        assert_eq!(opts.geo_hints.len(), 1);
        let hint = opts.geo_hints.iter().next().unwrap();
        assert_eq!(hint.lon_field, "lon");
        assert_eq!(hint.radius_field, None);
    }

    #[test]
    fn empty_lat_or_lon_is_ignored() {
        let opts = ParsingOptionsBuilder::new()
            .with_geo_hint("", "lon", None)
            .build();
        assert!(opts.geo_hints.is_empty());
    }
}
