//! Record source adapters.
//!
//! Every source kind is exposed through [`RecordSource`]: a pull-based,
//! finite sequence of batches. Sources are opened per job by a
//! [`SourceFactory`], which the orchestrator holds behind a trait object so
//! tests can substitute in-memory sources.

mod csv;
mod geojson;
mod paged_api;
mod recovery;
mod shapefile;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use geo_indexer_shared::{Document, JobDescriptor, RawFeature, SourceKind};
use serde_json::Value;
use tracing::info;

use crate::errors::IngestError;

pub use self::csv::CsvSource;
pub use self::geojson::GeoJsonSource;
pub use self::paged_api::PagedApiSource;
pub use self::recovery::RecoverySource;
pub use self::shapefile::{Ogr2OgrConverter, ShapefileConverter, ShapefileSource};

/// Default records per page for paged API sources.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Default rows per batch for CSV sources.
pub const DEFAULT_CSV_BATCH_SIZE: usize = 1000;

/// One batch from a source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceBatch {
    /// Raw features to transform.
    Features(Vec<RawFeature>),
    /// Ready-made documents (recovery replay), indexed unchanged.
    Documents(Vec<Document>),
}

impl SourceBatch {
    pub fn len(&self) -> usize {
        match self {
            Self::Features(features) => features.len(),
            Self::Documents(documents) => documents.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A finite, pull-based sequence of record batches.
#[async_trait]
pub trait RecordSource: Send {
    /// Produce the next batch, or `None` once the source is exhausted.
    async fn next_batch(&mut self) -> Result<Option<SourceBatch>, IngestError>;

    /// Number of batches the source expects to produce, when known up front.
    fn expected_batches(&self) -> Option<u64> {
        None
    }
}

/// Opens the source for a job.
#[async_trait]
pub trait SourceFactory: Send + Sync {
    async fn open(&self, job: &JobDescriptor) -> Result<Box<dyn RecordSource>, IngestError>;
}

/// Settings shared by the network and file sources.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Directory for cached paged-API pages.
    pub cache_dir: PathBuf,
    /// Serialized-size bound for recovery replay chunks.
    pub batch_max_bytes: usize,
    /// Timeout for a single source request.
    pub request_timeout: Duration,
}

/// Opens sources over HTTP or the local filesystem.
pub struct HttpSourceFactory {
    client: reqwest::Client,
    settings: SourceSettings,
    converter: Arc<dyn ShapefileConverter>,
}

impl HttpSourceFactory {
    /// Create a factory with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(
        settings: SourceSettings,
        converter: Arc<dyn ShapefileConverter>,
    ) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| IngestError::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            settings,
            converter,
        })
    }
}

#[async_trait]
impl SourceFactory for HttpSourceFactory {
    async fn open(&self, job: &JobDescriptor) -> Result<Box<dyn RecordSource>, IngestError> {
        info!(job_type = %job.job_type, source = ?job.source, location = %job.location, "Opening source");
        let source: Box<dyn RecordSource> = match job.source {
            SourceKind::PagedApi => Box::new(
                PagedApiSource::open(self.client.clone(), job, self.settings.cache_dir.clone())
                    .await?,
            ),
            SourceKind::GeoJson => Box::new(GeoJsonSource::new(self.client.clone(), job)),
            SourceKind::Csv => Box::new(CsvSource::open(&self.client, job).await?),
            SourceKind::ZippedShapefile => Box::new(ShapefileSource::new(
                self.client.clone(),
                job,
                Arc::clone(&self.converter),
            )),
            SourceKind::Recovery => {
                Box::new(RecoverySource::open(job, self.settings.batch_max_bytes).await?)
            }
        };
        Ok(source)
    }
}

/// Whether a job location is fetched over HTTP rather than read from disk.
pub(crate) fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Read the whole body of a location, remote or local.
pub(crate) async fn fetch_bytes(
    client: &reqwest::Client,
    job_type: &str,
    location: &str,
) -> Result<Vec<u8>, IngestError> {
    if !is_remote(location) {
        return tokio::fs::read(location)
            .await
            .map_err(|e| IngestError::source(job_type, format!("{}: {}", location, e)));
    }

    let response = client
        .get(location)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| IngestError::source(job_type, e.to_string()))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| IngestError::source(job_type, e.to_string()))?;
    Ok(bytes.to_vec())
}

/// Fetch a location and parse it as JSON.
pub(crate) async fn fetch_json(
    client: &reqwest::Client,
    job_type: &str,
    location: &str,
) -> Result<Value, IngestError> {
    let bytes = fetch_bytes(client, job_type, location).await?;
    serde_json::from_slice(&bytes).map_err(|e| {
        IngestError::source(job_type, format!("malformed JSON from {}: {}", location, e))
    })
}

/// The `features` of a feature collection.
pub(crate) fn collection_features(
    job_type: &str,
    collection: Value,
) -> Result<Vec<RawFeature>, IngestError> {
    match collection {
        Value::Object(mut map) => match map.remove("features") {
            Some(Value::Array(features)) => Ok(features.into_iter().map(RawFeature::new).collect()),
            _ => Err(IngestError::source(
                job_type,
                "response is not a feature collection",
            )),
        },
        _ => Err(IngestError::source(
            job_type,
            "response is not a feature collection",
        )),
    }
}

/// Append query parameters to a URL that may already carry some.
pub(crate) fn with_query(location: &str, query: &str) -> String {
    let separator = if location.contains('?') { '&' } else { '?' };
    format!("{}{}{}", location, separator, query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_with_query_appends_separator() {
        assert_eq!(with_query("http://x/query", "a=1"), "http://x/query?a=1");
        assert_eq!(with_query("http://x/query?f=json", "a=1"), "http://x/query?f=json&a=1");
    }

    #[test]
    fn test_collection_features_requires_feature_array() {
        let features =
            collection_features("ward", json!({"type": "FeatureCollection", "features": [{"a": 1}]}))
                .unwrap();
        assert_eq!(features.len(), 1);

        assert!(collection_features("ward", json!({"error": {"code": 400}})).is_err());
        assert!(collection_features("ward", json!([])).is_err());
    }

    #[test]
    fn test_is_remote() {
        assert!(is_remote("https://services1.arcgis.com/x"));
        assert!(!is_remote("./data/failed/recovery.json"));
    }
}
