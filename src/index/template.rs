//! The search store index template applied to every `data-*` index:
//! settings (shard count, the lowercase normalizer used by case-insensitive
//! keywords) and dynamic mappings driven off the parsed-type tags in
//! [`crate::fields`].

use serde_json::{json, Value};

use crate::fields::{DocumentField, ParsedType};

/// Build the index template document for the `data-*` index pattern.
///
/// `number_of_shards`/`number_of_replicas` are left at modest defaults
/// suitable for a single-node development deployment; production
/// deployments should override them via the search store's own template
/// management rather than by editing this function.
pub fn data_index_template() -> Value {
    json!({
        "index_patterns": ["data-*"],
        "template": {
            "settings": {
                "analysis": {
                    "normalizer": {
                        "lowercase_normalizer": {
                            "type": "custom",
                            "char_filter": [],
                            "filter": ["lowercase"],
                        }
                    }
                },
                "index": {
                    "number_of_shards": 5,
                    "number_of_replicas": 1,
                },
            },
            "mappings": {
                "_source": {
                    "includes": [
                        DocumentField::Id.as_str(),
                        DocumentField::Data.as_str(),
                        DocumentField::Version.as_str(),
                        DocumentField::Next.as_str(),
                        DocumentField::Versions.as_str(),
                    ],
                    "excludes": [
                        format!("{}.*", DocumentField::Parsed),
                        DocumentField::DataTypes.as_str(),
                        DocumentField::ParsedTypes.as_str(),
                    ],
                },
                "properties": {
                    (DocumentField::Id.as_str()): { "type": "keyword" },
                    (DocumentField::Data.as_str()): {
                        "type": "object",
                        "enabled": false,
                    },
                    (DocumentField::Versions.as_str()): {
                        "type": "date_range",
                        "format": "epoch_millis",
                    },
                    (DocumentField::Version.as_str()): {
                        "type": "date",
                        "format": "epoch_millis",
                    },
                    (DocumentField::Next.as_str()): {
                        "type": "date",
                        "format": "epoch_millis",
                    },
                    (DocumentField::AllText.as_str()): { "type": "text" },
                    (DocumentField::AllPoints.as_str()): { "type": "geo_point" },
                    (DocumentField::AllShapes.as_str()): { "type": "geo_shape" },
                },
                "dynamic_templates": [
                    {
                        "keyword_ci_field": {
                            "path_match": format!("{}.*.{}", DocumentField::Parsed, ParsedType::KeywordCaseInsensitive),
                            "mapping": {
                                "type": "keyword",
                                "normalizer": "lowercase_normalizer",
                                "ignore_above": 256,
                                "copy_to": DocumentField::AllText.as_str(),
                            },
                        },
                    },
                    {
                        "keyword_cs_field": {
                            "path_match": format!("{}.*.{}", DocumentField::Parsed, ParsedType::KeywordCaseSensitive),
                            "mapping": {
                                "type": "keyword",
                                "ignore_above": 256,
                            },
                        },
                    },
                    {
                        "text_field": {
                            "path_match": format!("{}.*.{}", DocumentField::Parsed, ParsedType::Text),
                            "mapping": {
                                "type": "text",
                                "copy_to": DocumentField::AllText.as_str(),
                            },
                        },
                    },
                    {
                        "number_field": {
                            "path_match": format!("{}.*.{}", DocumentField::Parsed, ParsedType::Number),
                            "mapping": { "type": "double" },
                        },
                    },
                    {
                        "date_field": {
                            "path_match": format!("{}.*.{}", DocumentField::Parsed, ParsedType::Date),
                            "mapping": {
                                "type": "date",
                                "format": "epoch_millis",
                            },
                        },
                    },
                    {
                        "boolean_field": {
                            "path_match": format!("{}.*.{}", DocumentField::Parsed, ParsedType::Boolean),
                            "mapping": { "type": "boolean" },
                        },
                    },
                    {
                        "geo_point_field": {
                            "path_match": format!("{}.*.{}", DocumentField::Parsed, ParsedType::GeoPoint),
                            "mapping": {
                                "type": "geo_point",
                                "copy_to": DocumentField::AllPoints.as_str(),
                            },
                        },
                    },
                    {
                        "geo_shape_field": {
                            "path_match": format!("{}.*.{}", DocumentField::Parsed, ParsedType::GeoShape),
                            "mapping": {
                                "type": "geo_shape",
                                "copy_to": DocumentField::AllShapes.as_str(),
                            },
                        },
                    },
                ],
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_matches_data_wildcard() {
        let template = data_index_template();
        assert_eq!(template["index_patterns"][0], "data-*");
    }

    #[test]
    fn template_has_a_dynamic_mapping_per_parsed_type() {
        let template = data_index_template();
        let templates = template["template"]["mappings"]["dynamic_templates"].as_array().unwrap();
        assert_eq!(templates.len(), 8);
    }
}
