//! Durable record of documents the sink rejected.

use std::path::{Path, PathBuf};

use chrono::Local;
use geo_indexer_shared::FailureRecord;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::errors::IngestError;

/// Accumulates every failure of the run and rewrites the whole set to the
/// recovery artifact on each new failure event.
///
/// The artifact is replaced atomically (temp file, then rename), so it is
/// always a complete JSON array that the recovery source can replay.
pub struct FailureRecorder {
    path: PathBuf,
    records: Mutex<Vec<FailureRecord>>,
}

impl FailureRecorder {
    /// Create a recorder writing to a timestamped artifact in `failed_dir`.
    pub fn new(failed_dir: impl AsRef<Path>) -> Self {
        let name = format!("recovery-{}.json", Local::now().format("%Y-%m-%d-%H-%M-%S"));
        Self::with_path(failed_dir.as_ref().join(name))
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Mutex::new(Vec::new()),
        }
    }

    /// Location of the recovery artifact.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of failures recorded so far.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Append failures and persist the full accumulated set.
    ///
    /// Returns the total number of recorded failures.
    #[instrument(skip(self, failures), fields(new_failures = failures.len()))]
    pub async fn record(&self, failures: Vec<FailureRecord>) -> Result<usize, IngestError> {
        let mut records = self.records.lock().await;
        if failures.is_empty() {
            return Ok(records.len());
        }
        records.extend(failures);

        if let Err(e) = self.persist(&records).await {
            warn!(path = %self.path.display(), error = %e, "Failed to persist failure records");
            return Err(e);
        }

        info!(
            path = %self.path.display(),
            total_failures = records.len(),
            "Recovery artifact updated"
        );
        Ok(records.len())
    }

    async fn persist(&self, records: &[FailureRecord]) -> Result<(), IngestError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| IngestError::recorder(format!("{}: {}", parent.display(), e)))?;
        }

        let json = serde_json::to_vec(records)
            .map_err(|e| IngestError::recorder(format!("Failed to serialize records: {}", e)))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| IngestError::recorder(format!("{}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| IngestError::recorder(format!("{}: {}", self.path.display(), e)))
    }
}
