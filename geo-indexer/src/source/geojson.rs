//! One-shot GeoJSON feature collection download.

use async_trait::async_trait;
use geo_indexer_shared::JobDescriptor;

use super::{collection_features, fetch_json, RecordSource, SourceBatch};
use crate::errors::IngestError;

/// Downloads a whole feature collection and yields it as a single batch.
pub struct GeoJsonSource {
    client: reqwest::Client,
    job_type: String,
    location: String,
    done: bool,
}

impl GeoJsonSource {
    pub fn new(client: reqwest::Client, job: &JobDescriptor) -> Self {
        Self {
            client,
            job_type: job.job_type.clone(),
            location: job.location.clone(),
            done: false,
        }
    }
}

#[async_trait]
impl RecordSource for GeoJsonSource {
    async fn next_batch(&mut self) -> Result<Option<SourceBatch>, IngestError> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let collection = fetch_json(&self.client, &self.job_type, &self.location).await?;
        let features = collection_features(&self.job_type, collection)?;
        Ok(Some(SourceBatch::Features(features)))
    }

    fn expected_batches(&self) -> Option<u64> {
        Some(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_indexer_shared::SourceKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_reads_local_collection_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("places.geojson");
        let collection = json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {"name": "Leeds"}, "geometry": {"type": "Point", "coordinates": [-1.54, 53.8]}},
                {"type": "Feature", "properties": {"name": "York"}, "geometry": {"type": "Point", "coordinates": [-1.08, 53.96]}}
            ]
        });
        std::fs::write(&path, collection.to_string()).unwrap();

        let job = JobDescriptor::new("place", SourceKind::GeoJson, path.to_string_lossy());
        let mut source = GeoJsonSource::new(reqwest::Client::new(), &job);

        match source.next_batch().await.unwrap() {
            Some(SourceBatch::Features(features)) => assert_eq!(features.len(), 2),
            other => panic!("unexpected batch: {other:?}"),
        }
        assert!(source.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_file_is_a_source_error() {
        let job = JobDescriptor::new("place", SourceKind::GeoJson, "/nonexistent/places.geojson");
        let mut source = GeoJsonSource::new(reqwest::Client::new(), &job);
        assert!(matches!(
            source.next_batch().await,
            Err(IngestError::SourceError { .. })
        ));
    }
}
