//! Paged feature API source with an on-disk page cache.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use geo_indexer_shared::JobDescriptor;
use serde_json::Value;
use tracing::{debug, info, instrument};

use super::{collection_features, fetch_json, with_query, RecordSource, SourceBatch, DEFAULT_PAGE_SIZE};
use crate::errors::IngestError;

/// Reads a feature API page by page.
///
/// The total count is queried once when the source is opened. Pages are
/// requested at increasing offsets while the service reports
/// `exceededTransferLimit`. A page found in the cache directory is used
/// instead of a request; fetched pages are written back to it.
pub struct PagedApiSource {
    client: reqwest::Client,
    job_type: String,
    location: String,
    page_size: usize,
    cache_dir: PathBuf,
    offset: usize,
    total: u64,
    exhausted: bool,
}

impl PagedApiSource {
    /// Open the source and run the count query.
    #[instrument(skip(client, job, cache_dir), fields(job_type = %job.job_type))]
    pub async fn open(
        client: reqwest::Client,
        job: &JobDescriptor,
        cache_dir: PathBuf,
    ) -> Result<Self, IngestError> {
        let count_url = with_query(&job.location, "returnCountOnly=true");
        let response = fetch_json(&client, &job.job_type, &count_url).await?;
        let total = response.get("count").and_then(Value::as_u64).ok_or_else(|| {
            IngestError::source(&job.job_type, format!("count query returned {}", response))
        })?;

        let page_size = job.page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
        info!(
            total_records = total,
            page_size = page_size,
            expected_pages = total.div_ceil(page_size as u64),
            "Counted source records"
        );

        Ok(Self {
            client,
            job_type: job.job_type.clone(),
            location: job.location.clone(),
            page_size,
            cache_dir,
            offset: 0,
            total,
            exhausted: false,
        })
    }

    fn cache_path(&self) -> PathBuf {
        self.cache_dir
            .join(format!("{}-{}.json", self.job_type, self.offset))
    }

    async fn read_cached(&self, path: &Path) -> Result<Option<Value>, IngestError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                debug!(path = %path.display(), "Using cached page");
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_cache(&self, path: &Path, page: &Value) -> Result<(), IngestError> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        tokio::fs::write(path, serde_json::to_vec(page)?).await?;
        Ok(())
    }

    /// A page must carry a `features` array; an empty one ends the source.
    /// Service errors reported in a 200 body are source errors.
    fn validate_page(&self, page: &Value) -> Result<(), IngestError> {
        if let Some(error) = page.get("error") {
            return Err(IngestError::source(
                &self.job_type,
                format!("service error at offset {}: {}", self.offset, error),
            ));
        }
        if !page.get("features").is_some_and(Value::is_array) {
            return Err(IngestError::source(
                &self.job_type,
                format!("page at offset {} has no features array", self.offset),
            ));
        }
        Ok(())
    }

    async fn fetch_page(&self) -> Result<Value, IngestError> {
        let path = self.cache_path();
        if let Some(page) = self.read_cached(&path).await? {
            self.validate_page(&page)?;
            return Ok(page);
        }

        let url = with_query(
            &self.location,
            &format!(
                "resultRecordCount={}&resultOffset={}",
                self.page_size, self.offset
            ),
        );
        let page = fetch_json(&self.client, &self.job_type, &url).await?;
        self.validate_page(&page)?;
        self.write_cache(&path, &page).await?;
        Ok(page)
    }
}

#[async_trait]
impl RecordSource for PagedApiSource {
    async fn next_batch(&mut self) -> Result<Option<SourceBatch>, IngestError> {
        if self.exhausted {
            return Ok(None);
        }

        let mut page = self.fetch_page().await?;
        let more = page
            .get("exceededTransferLimit")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let is_empty = page
            .get("features")
            .and_then(Value::as_array)
            .map_or(true, Vec::is_empty);

        if is_empty {
            self.exhausted = true;
            return Ok(None);
        }

        let features = collection_features(&self.job_type, page.take())?;
        debug!(
            job_type = %self.job_type,
            offset = self.offset,
            count = features.len(),
            more = more,
            "Fetched page"
        );

        self.offset += features.len();
        self.exhausted = !more;
        Ok(Some(SourceBatch::Features(features)))
    }

    fn expected_batches(&self) -> Option<u64> {
        Some(self.total.div_ceil(self.page_size as u64))
    }
}
