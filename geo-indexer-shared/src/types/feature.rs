//! Raw feature records as emitted by the source adapters.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One record from a geographic data source.
///
/// The record is kept as the JSON object the source produced so that
/// templates can address it with the source's own field names. GeoJSON
/// features carry their attributes under `properties`, paged API features
/// under `attributes`, and CSV rows are wrapped under `properties`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawFeature(Value);

impl RawFeature {
    /// Wrap a JSON value as a feature.
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Build a feature from a flat attribute map (a CSV row).
    pub fn from_properties(properties: Map<String, Value>) -> Self {
        let mut feature = Map::new();
        feature.insert("properties".to_string(), Value::Object(properties));
        Self(Value::Object(feature))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// The attribute map, whichever of `properties` or `attributes` is present.
    pub fn attributes(&self) -> Option<&Map<String, Value>> {
        self.0
            .get("properties")
            .and_then(Value::as_object)
            .or_else(|| self.0.get("attributes").and_then(Value::as_object))
    }

    /// A single attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes().and_then(|attrs| attrs.get(name))
    }

    /// The geometry object, if any.
    pub fn geometry(&self) -> Option<&Value> {
        self.0.get("geometry").filter(|g| !g.is_null())
    }

    /// The GeoJSON geometry type (`Polygon`, `MultiPolygon`, ...).
    pub fn geometry_type(&self) -> Option<&str> {
        self.geometry()
            .and_then(|g| g.get("type"))
            .and_then(Value::as_str)
    }

    /// Replace the geometry.
    pub fn set_geometry(&mut self, geometry: Value) {
        if let Value::Object(map) = &mut self.0 {
            map.insert("geometry".to_string(), geometry);
        }
    }
}

impl From<Value> for RawFeature {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
