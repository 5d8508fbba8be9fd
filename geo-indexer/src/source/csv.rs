//! Streamed CSV source.
//!
//! Rows are decoded only when the next batch is requested, so a download of
//! millions of rows is held in memory one batch at a time.

use async_trait::async_trait;
use csv_async::{AsyncReader, AsyncReaderBuilder, StringRecord};
use futures::TryStreamExt;
use geo_indexer_shared::{JobDescriptor, RawFeature};
use serde_json::{Map, Value};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::debug;

use super::{is_remote, RecordSource, SourceBatch, DEFAULT_CSV_BATCH_SIZE};
use crate::errors::IngestError;

type BoxedRead = Box<dyn AsyncRead + Unpin + Send>;

/// Reads CSV rows in fixed-size batches.
///
/// Each row becomes a feature whose `properties` map header names to the
/// row's string values.
pub struct CsvSource {
    job_type: String,
    reader: AsyncReader<BoxedRead>,
    headers: Option<StringRecord>,
    batch_size: usize,
    rows: u64,
    done: bool,
}

impl CsvSource {
    /// Start the download (or open the file) without reading any rows.
    pub async fn open(client: &reqwest::Client, job: &JobDescriptor) -> Result<Self, IngestError> {
        let input: BoxedRead = if is_remote(&job.location) {
            let response = client
                .get(&job.location)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| IngestError::source(&job.job_type, e.to_string()))?;
            let stream = response.bytes_stream().map_err(std::io::Error::other);
            Box::new(StreamReader::new(Box::pin(stream)))
        } else {
            let file = tokio::fs::File::open(&job.location)
                .await
                .map_err(|e| IngestError::source(&job.job_type, format!("{}: {}", job.location, e)))?;
            Box::new(file)
        };

        Ok(Self::from_reader(job, input))
    }

    /// Read CSV from any async reader.
    pub fn from_reader(job: &JobDescriptor, input: BoxedRead) -> Self {
        Self {
            job_type: job.job_type.clone(),
            reader: AsyncReaderBuilder::new().flexible(true).create_reader(input),
            headers: None,
            batch_size: job.batch_size.unwrap_or(DEFAULT_CSV_BATCH_SIZE).max(1),
            rows: 0,
            done: false,
        }
    }

    fn csv_error(&self, e: csv_async::Error) -> IngestError {
        IngestError::source(&self.job_type, format!("CSV row {}: {}", self.rows + 1, e))
    }

    fn to_feature(headers: &StringRecord, record: &StringRecord) -> RawFeature {
        let properties: Map<String, Value> = headers
            .iter()
            .zip(record.iter())
            .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
            .collect();
        RawFeature::from_properties(properties)
    }
}

#[async_trait]
impl RecordSource for CsvSource {
    async fn next_batch(&mut self) -> Result<Option<SourceBatch>, IngestError> {
        if self.done {
            return Ok(None);
        }

        let headers = match &self.headers {
            Some(headers) => headers.clone(),
            None => {
                let read = self.reader.headers().await.map(StringRecord::clone);
                let headers = read.map_err(|e| self.csv_error(e))?;
                self.headers = Some(headers.clone());
                headers
            }
        };

        let mut features = Vec::with_capacity(self.batch_size);
        let mut record = StringRecord::new();
        while features.len() < self.batch_size {
            match self.reader.read_record(&mut record).await {
                Ok(true) => {
                    self.rows += 1;
                    features.push(Self::to_feature(&headers, &record));
                }
                Ok(false) => {
                    self.done = true;
                    break;
                }
                Err(e) => return Err(self.csv_error(e)),
            }
        }

        debug!(job_type = %self.job_type, rows = self.rows, batch = features.len(), "Read CSV batch");
        if features.is_empty() {
            return Ok(None);
        }
        Ok(Some(SourceBatch::Features(features)))
    }
}
