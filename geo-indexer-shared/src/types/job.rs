//! Job descriptors: one configured dataset ingestion task per entry.

use serde::{Deserialize, Serialize};

use crate::types::template::Template;

/// Kind of record source a job reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Paged JSON feature API with a count query.
    PagedApi,
    /// One-shot GeoJSON feature collection download.
    #[serde(rename = "geojson")]
    GeoJson,
    /// Streamed CSV download.
    Csv,
    /// Zipped shapefile converted to GeoJSON.
    ZippedShapefile,
    /// Previously persisted failure records.
    Recovery,
}

/// Immutable configuration for one dataset.
///
/// Jobs are read from the job file in declared order; that order is a
/// dependency contract, since later jobs read maps built by earlier ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    /// Unique job type name, also the document category and maps table key.
    #[serde(rename = "type")]
    pub job_type: String,
    pub source: SourceKind,
    /// URL or file path of the source.
    pub location: String,
    /// Page size for paged API sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
    /// Rows per batch for CSV sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    /// Shapefile inside a zipped archive, when it holds more than one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_template: Option<Template>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maps_template: Option<Template>,
    /// Number of simplification rounds; absent disables the stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry_reduce: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simplify_tolerance: Option<f64>,
    /// Resolve self-intersecting polygons and merge parts per `id_property`.
    #[serde(default)]
    pub unkink_polygons: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_property: Option<String>,
    /// Body field whose value becomes the head's parent reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_field: Option<String>,
}

impl JobDescriptor {
    /// Create a job with no templates and no geometry repair.
    pub fn new(job_type: impl Into<String>, source: SourceKind, location: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            source,
            location: location.into(),
            page_size: None,
            batch_size: None,
            shape_filename: None,
            document_template: None,
            maps_template: None,
            geometry_reduce: None,
            simplify_tolerance: None,
            unkink_polygons: false,
            id_property: None,
            parent_field: None,
        }
    }

    pub fn with_document_template(mut self, template: Template) -> Self {
        self.document_template = Some(template);
        self
    }

    pub fn with_maps_template(mut self, template: Template) -> Self {
        self.maps_template = Some(template);
        self
    }

    /// Whether the job requests any geometry repair.
    pub fn wants_geometry_repair(&self) -> bool {
        self.unkink_polygons || self.geometry_reduce.unwrap_or(0) > 0
    }
}
