//! The job file: an ordered list of job descriptors.

use std::collections::HashSet;
use std::path::Path;

use geo_indexer_shared::JobDescriptor;
use serde::Deserialize;

use crate::IndexingError;

#[derive(Debug, Deserialize)]
struct JobFile {
    jobs: Vec<JobDescriptor>,
}

/// Read the job file at `path`.
pub async fn load_jobs(path: &Path) -> Result<Vec<JobDescriptor>, IndexingError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        IndexingError::config(format!("Failed to read job file {}: {}", path.display(), e))
    })?;
    parse_jobs(&bytes)
}

/// Parse a job file, keeping declared order.
///
/// Job types must be unique since each names a maps table.
pub fn parse_jobs(bytes: &[u8]) -> Result<Vec<JobDescriptor>, IndexingError> {
    let file: JobFile = serde_json::from_slice(bytes)
        .map_err(|e| IndexingError::config(format!("Invalid job file: {}", e)))?;

    if file.jobs.is_empty() {
        return Err(IndexingError::config("Job file declares no jobs"));
    }

    let mut seen = HashSet::new();
    for job in &file.jobs {
        if !seen.insert(job.job_type.as_str()) {
            return Err(IndexingError::config(format!(
                "Duplicate job type '{}'",
                job.job_type
            )));
        }
    }
    Ok(file.jobs)
}
