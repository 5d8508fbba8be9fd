//! Zipped shapefile source.
//!
//! The archive is downloaded whole and handed to an external converter that
//! emits GeoJSON; the converter's output is accumulated in memory and parsed
//! as one feature collection.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use geo_indexer_shared::JobDescriptor;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::{collection_features, fetch_bytes, RecordSource, SourceBatch};
use crate::errors::IngestError;

/// Converts a zipped shapefile archive to GeoJSON bytes.
#[async_trait]
pub trait ShapefileConverter: Send + Sync {
    async fn convert(
        &self,
        job_type: &str,
        archive: Vec<u8>,
        shape_filename: Option<&str>,
    ) -> Result<Vec<u8>, IngestError>;
}

/// Runs `ogr2ogr`, feeding the archive on stdin and reading GeoJSON from stdout.
#[derive(Debug, Clone)]
pub struct Ogr2OgrConverter {
    program: PathBuf,
}

impl Ogr2OgrConverter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn input_path(shape_filename: Option<&str>) -> String {
        match shape_filename {
            Some(name) => format!("/vsizip/{{/vsistdin/}}/{}", name.trim_start_matches('/')),
            None => "/vsizip/{/vsistdin/}".to_string(),
        }
    }
}

impl Default for Ogr2OgrConverter {
    fn default() -> Self {
        Self::new("ogr2ogr")
    }
}

#[async_trait]
impl ShapefileConverter for Ogr2OgrConverter {
    #[instrument(skip(self, archive), fields(archive_bytes = archive.len()))]
    async fn convert(
        &self,
        job_type: &str,
        archive: Vec<u8>,
        shape_filename: Option<&str>,
    ) -> Result<Vec<u8>, IngestError> {
        let mut child = Command::new(&self.program)
            .args(["-f", "GeoJSON", "/vsistdout/"])
            .arg(Self::input_path(shape_filename))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                IngestError::source(
                    job_type,
                    format!("failed to start {}: {}", self.program.display(), e),
                )
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| IngestError::source(job_type, "converter stdin unavailable"))?;
        let writer = tokio::spawn(async move {
            stdin.write_all(&archive).await?;
            stdin.shutdown().await
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| IngestError::source(job_type, format!("converter failed: {}", e)))?;

        if !output.status.success() {
            return Err(IngestError::source(
                job_type,
                format!(
                    "converter exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Converter closed stdin early"),
            Err(e) => warn!(error = %e, "Converter stdin task failed"),
        }

        debug!(geojson_bytes = output.stdout.len(), "Converted shapefile");
        Ok(output.stdout)
    }
}

/// Downloads a zipped shapefile and yields its features as a single batch.
pub struct ShapefileSource {
    client: reqwest::Client,
    job: JobDescriptor,
    converter: Arc<dyn ShapefileConverter>,
    done: bool,
}

impl ShapefileSource {
    pub fn new(
        client: reqwest::Client,
        job: &JobDescriptor,
        converter: Arc<dyn ShapefileConverter>,
    ) -> Self {
        Self {
            client,
            job: job.clone(),
            converter,
            done: false,
        }
    }
}

#[async_trait]
impl RecordSource for ShapefileSource {
    async fn next_batch(&mut self) -> Result<Option<SourceBatch>, IngestError> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let job_type = &self.job.job_type;
        let archive = fetch_bytes(&self.client, job_type, &self.job.location).await?;
        info!(job_type = %job_type, archive_bytes = archive.len(), "Downloaded shapefile archive");

        let geojson = self
            .converter
            .convert(job_type, archive, self.job.shape_filename.as_deref())
            .await?;
        let collection = serde_json::from_slice(&geojson).map_err(|e| {
            IngestError::source(job_type, format!("converter output is not GeoJSON: {}", e))
        })?;

        Ok(Some(SourceBatch::Features(collection_features(
            job_type, collection,
        )?)))
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
    use std::sync::Mutex;

    struct MockConverter {
        output: Vec<u8>,
        calls: Mutex<Vec<(usize, Option<String>)>>,
    }

    #[async_trait]
    impl ShapefileConverter for MockConverter {
        async fn convert(
            &self,
            _job_type: &str,
            archive: Vec<u8>,
            shape_filename: Option<&str>,
        ) -> Result<Vec<u8>, IngestError> {
            self.calls
                .lock()
                .unwrap()
                .push((archive.len(), shape_filename.map(str::to_string)));
            Ok(self.output.clone())
        }
    }

    fn archive_job(dir: &tempfile::TempDir) -> JobDescriptor {
        let path = dir.path().join("nuts.zip");
        std::fs::write(&path, b"PK\x03\x04 not really a zip").unwrap();
        JobDescriptor {
            shape_filename: Some("NUTS_Level_3.shp".to_string()),
            ..JobDescriptor::new("nuts_3", SourceKind::ZippedShapefile, path.to_string_lossy())
        }
    }

    #[test]
    fn test_input_path_addresses_file_inside_archive() {
        assert_eq!(
            Ogr2OgrConverter::input_path(Some("NUTS_Level_3.shp")),
            "/vsizip/{/vsistdin/}/NUTS_Level_3.shp"
        );
        assert_eq!(Ogr2OgrConverter::input_path(None), "/vsizip/{/vsistdin/}");
    }

    #[tokio::test]
    async fn test_converter_output_parsed_as_collection() {
        let dir = tempfile::tempdir().unwrap();
        let converter = Arc::new(MockConverter {
            output: json!({"type": "FeatureCollection", "features": [{"properties": {"nuts318cd": "UKC11"}}]})
                .to_string()
                .into_bytes(),
            calls: Mutex::new(Vec::new()),
        });
        let mut source =
            ShapefileSource::new(reqwest::Client::new(), &archive_job(&dir), converter.clone());

        let Some(SourceBatch::Features(features)) = source.next_batch().await.unwrap() else {
            panic!("expected a feature batch");
        };
        assert_eq!(features.len(), 1);
        assert!(source.next_batch().await.unwrap().is_none());

        let calls = converter.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.as_deref(), Some("NUTS_Level_3.shp"));
    }

    #[tokio::test]
    async fn test_unparseable_output_aborts_job() {
        let dir = tempfile::tempdir().unwrap();
        let converter = Arc::new(MockConverter {
            output: b"ERROR 1: not a zip".to_vec(),
            calls: Mutex::new(Vec::new()),
        });
        let mut source = ShapefileSource::new(reqwest::Client::new(), &archive_job(&dir), converter);

        assert!(matches!(
            source.next_batch().await,
            Err(IngestError::SourceError { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_converter_program_is_an_error() {
        let converter = Ogr2OgrConverter::new("/nonexistent/ogr2ogr");
        let result = converter.convert("nuts_3", vec![1, 2, 3], None).await;
        assert!(matches!(result, Err(IngestError::SourceError { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_an_error() {
        let converter = Ogr2OgrConverter::new("false");
        let result = converter.convert("nuts_3", vec![1, 2, 3], None).await;
        match result {
            Err(IngestError::SourceError { message, .. }) => assert!(message.contains("exited")),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
