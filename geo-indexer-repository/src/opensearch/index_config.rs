//! OpenSearch index configuration and mappings.
//!
//! This module defines the index settings and mappings for the geographic
//! lookup index.

use serde_json::{json, Value};

/// Configuration for the search index.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// The alias name for the search index (used for all writes).
    pub alias: String,
    /// The version number for the index (e.g., 0 for "geo_lookup_v0").
    pub version: u32,
}

impl IndexConfig {
    /// Create a new index configuration.
    ///
    /// # Arguments
    ///
    /// * `alias` - The index alias name
    /// * `version` - The version number
    pub fn new(alias: impl Into<String>, version: u32) -> Self {
        Self {
            alias: alias.into(),
            version,
        }
    }

    /// The concrete index behind the alias, e.g. `geo_lookup_v3`.
    pub fn versioned_name(&self) -> String {
        format!("{}_v{}", self.alias, self.version)
    }
}

/// Get the index settings and mappings for the geographic lookup index.
///
/// The configuration includes:
/// - **autocomplete**: edge n-gram tokenizer (3 to 10 letters) on `textbag`,
///   searched with a plain lowercase analyzer
/// - **geo fields**: `point` as a geo point and `shape` as a geo shape
/// - **keyword fields**: place names, administrative codes and the category
pub fn get_index_settings() -> Value {
    json!({
        "settings": {
            "number_of_shards": 1,
            "number_of_replicas": 1,
            "analysis": {
                "analyzer": {
                    "autocomplete": {
                        "tokenizer": "autocomplete",
                        "filter": ["lowercase"]
                    },
                    "autocomplete_search": {
                        "tokenizer": "lowercase"
                    }
                },
                "tokenizer": {
                    "autocomplete": {
                        "type": "edge_ngram",
                        "min_gram": 3,
                        "max_gram": 10,
                        "token_chars": ["letter"]
                    }
                }
            }
        },
        "mappings": {
            "properties": {
                "type": { "type": "keyword" },
                "place": { "type": "keyword" },
                "textbag": {
                    "type": "text",
                    "analyzer": "autocomplete",
                    "search_analyzer": "autocomplete_search"
                },
                "point": { "type": "geo_point" },
                "shape": { "type": "geo_shape" },
                "district": { "type": "keyword" },
                "ward": { "type": "keyword" },
                "nuts_3": { "type": "keyword" },
                "county": { "type": "keyword" },
                "country": { "type": "keyword" }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_settings_structure() {
        let settings = get_index_settings();
        let properties = &settings["mappings"]["properties"];

        assert!(settings["settings"]["number_of_shards"].is_number());
        let tokenizer = &settings["settings"]["analysis"]["tokenizer"]["autocomplete"];
        assert_eq!(tokenizer["type"], "edge_ngram");
        assert_eq!(tokenizer["min_gram"], 3);
        assert_eq!(tokenizer["max_gram"], 10);

        assert_eq!(properties["place"]["type"], "keyword");
        assert_eq!(properties["textbag"]["analyzer"], "autocomplete");
        assert_eq!(properties["textbag"]["search_analyzer"], "autocomplete_search");
        assert_eq!(properties["point"]["type"], "geo_point");
        assert_eq!(properties["shape"]["type"], "geo_shape");
        assert_eq!(properties["ward"]["type"], "keyword");
    }

    #[test]
    fn test_versioned_index_name() {
        assert_eq!(IndexConfig::new("geo_lookup", 0).versioned_name(), "geo_lookup_v0");
        assert_eq!(IndexConfig::new("places", 7).versioned_name(), "places_v7");
    }
}
