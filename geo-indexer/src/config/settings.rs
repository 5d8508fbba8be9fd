//! Run parameters read from the environment.

use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::loader::{QueueConfig, DEFAULT_BATCH_MAX_BYTES, DEFAULT_BENIGN_PATTERNS};
use crate::IndexingError;

const DEFAULT_OPENSEARCH_URL: &str = "http://localhost:9200";
const DEFAULT_INDEX_ALIAS: &str = "geo_lookup";
const DEFAULT_RETRY_INTERVAL_SECS: u64 = 15;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;
const DEFAULT_SOURCE_TIMEOUT_SECS: u64 = 600;
const DEFAULT_COOLDOWN_SECS: u64 = 10;
const DEFAULT_TICK_INTERVAL_MS: u64 = 500;
const DEFAULT_MAX_PENDING_DOCUMENTS: usize = 250_000;
const DEFAULT_PROGRESS_INTERVAL_SECS: u64 = 10;

/// Connection mode for OpenSearch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Fail immediately if connection fails.
    FailFast,
    /// Retry connection at the retry interval until successful.
    Retry,
}

impl ConnectionMode {
    /// Valid values: "fail-fast" or "retry" (case-insensitive).
    /// Defaults to "retry" if not set or invalid.
    fn parse(value: Option<String>) -> Self {
        match value
            .unwrap_or_else(|| "retry".to_string())
            .to_lowercase()
            .as_str()
        {
            "fail-fast" | "failfast" | "fail_fast" => Self::FailFast,
            "retry" => Self::Retry,
            _ => {
                warn!("Invalid OPENSEARCH_CONNECTION_MODE, defaulting to 'retry'");
                Self::Retry
            }
        }
    }
}

/// Every run parameter, with defaults applied.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub opensearch_url: String,
    pub connection_mode: ConnectionMode,
    pub retry_interval: Duration,
    pub index_alias: String,
    pub index_version: u32,
    /// Drop and recreate the index before the run.
    pub fresh_index: bool,
    pub only_job_types: Option<HashSet<String>>,
    pub start_index: u64,
    pub request_timeout: Duration,
    pub source_timeout: Duration,
    pub batch_max_bytes: usize,
    pub cooldown: Duration,
    pub tick_interval: Duration,
    pub max_pending_documents: usize,
    pub benign_patterns: Vec<String>,
    pub jobs_file: PathBuf,
    pub cache_dir: PathBuf,
    pub failed_dir: PathBuf,
    pub maps_file: PathBuf,
    pub ogr2ogr_path: PathBuf,
    pub progress_interval: Duration,
}

impl RunSettings {
    /// Read settings from the process environment.
    ///
    /// # Environment Variables
    ///
    /// - `OPENSEARCH_URL`: OpenSearch server URL (default: http://localhost:9200)
    /// - `OPENSEARCH_CONNECTION_MODE`: "fail-fast" or "retry" (default: retry)
    /// - `OPENSEARCH_RETRY_INTERVAL_SECS`: Retry interval in seconds (default: 15)
    /// - `INDEX_ALIAS`: Index alias name (default: "geo_lookup")
    /// - `INDEX_VERSION`: Index version number (default: 0)
    /// - `FRESH_INDEX`: Drop and recreate the index (default: false)
    /// - `ONLY_JOB_TYPES`: Comma separated job types that produce documents (default: all)
    /// - `START_INDEX`: Number of documents to skip when resuming (default: 0)
    /// - `REQUEST_TIMEOUT_SECS`: Bulk request timeout (default: 300)
    /// - `SOURCE_TIMEOUT_SECS`: Source download timeout (default: 600)
    /// - `BATCH_MAX_BYTES`: Serialized size of one bulk write (default: 10000000)
    /// - `COOLDOWN_SECS`: Pause after a failed write (default: 10)
    /// - `TICK_INTERVAL_MS`: Drain tick period (default: 500)
    /// - `MAX_PENDING_DOCUMENTS`: Queue high-water mark (default: 250000)
    /// - `BENIGN_REJECTION_PATTERNS`: Comma separated benign rejection substrings
    /// - `JOBS_FILE`: Job file (default: jobs.json)
    /// - `CACHE_DIR`, `FAILED_DIR`, `MAPS_FILE`: Artifact locations
    /// - `OGR2OGR_PATH`: Shapefile converter (default: ogr2ogr)
    /// - `PROGRESS_INTERVAL_SECS`: Progress log period (default: 10)
    pub fn from_env() -> Result<Self, IndexingError> {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Read settings through a variable lookup.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, IndexingError> {
        let parsed = |name: &str, default: u64| parse_var(&var, name, default);

        let benign_patterns = match list_var(&var, "BENIGN_REJECTION_PATTERNS") {
            Some(patterns) => patterns,
            None => DEFAULT_BENIGN_PATTERNS.iter().map(|p| p.to_string()).collect(),
        };

        let batch_max_bytes = parse_var(&var, "BATCH_MAX_BYTES", DEFAULT_BATCH_MAX_BYTES)?;
        if batch_max_bytes == 0 {
            return Err(IndexingError::config("BATCH_MAX_BYTES must be positive"));
        }

        Ok(Self {
            opensearch_url: var("OPENSEARCH_URL").unwrap_or_else(|| DEFAULT_OPENSEARCH_URL.to_string()),
            connection_mode: ConnectionMode::parse(var("OPENSEARCH_CONNECTION_MODE")),
            retry_interval: Duration::from_secs(parsed(
                "OPENSEARCH_RETRY_INTERVAL_SECS",
                DEFAULT_RETRY_INTERVAL_SECS,
            )?),
            index_alias: var("INDEX_ALIAS").unwrap_or_else(|| DEFAULT_INDEX_ALIAS.to_string()),
            index_version: parse_var(&var, "INDEX_VERSION", 0)?,
            fresh_index: parse_var(&var, "FRESH_INDEX", false)?,
            only_job_types: list_var(&var, "ONLY_JOB_TYPES").map(|types| types.into_iter().collect()),
            start_index: parsed("START_INDEX", 0)?,
            request_timeout: Duration::from_secs(parsed(
                "REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
            source_timeout: Duration::from_secs(parsed(
                "SOURCE_TIMEOUT_SECS",
                DEFAULT_SOURCE_TIMEOUT_SECS,
            )?),
            batch_max_bytes,
            cooldown: Duration::from_secs(parsed("COOLDOWN_SECS", DEFAULT_COOLDOWN_SECS)?),
            tick_interval: Duration::from_millis(parsed("TICK_INTERVAL_MS", DEFAULT_TICK_INTERVAL_MS)?.max(1)),
            max_pending_documents: parse_var(
                &var,
                "MAX_PENDING_DOCUMENTS",
                DEFAULT_MAX_PENDING_DOCUMENTS,
            )?
            .max(1),
            benign_patterns,
            jobs_file: path_var(&var, "JOBS_FILE", "jobs.json"),
            cache_dir: path_var(&var, "CACHE_DIR", "data/cache"),
            failed_dir: path_var(&var, "FAILED_DIR", "data/failed"),
            maps_file: path_var(&var, "MAPS_FILE", "data/maps.json"),
            ogr2ogr_path: path_var(&var, "OGR2OGR_PATH", "ogr2ogr"),
            progress_interval: Duration::from_secs(
                parsed("PROGRESS_INTERVAL_SECS", DEFAULT_PROGRESS_INTERVAL_SECS)?.max(1),
            ),
        })
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            batch_max_bytes: self.batch_max_bytes,
            cooldown: self.cooldown,
            tick_interval: self.tick_interval,
            max_pending: self.max_pending_documents,
            start_index: self.start_index,
            benign_patterns: self.benign_patterns.clone(),
        }
    }
}

fn parse_var<T>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, IndexingError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(value) => value
            .parse()
            .map_err(|e| IndexingError::config(format!("Invalid {} '{}': {}", name, value, e))),
        None => Ok(default),
    }
}

fn list_var(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<Vec<String>> {
    let items: Vec<String> = var(name)?
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect();
    (!items.is_empty()).then_some(items)
}

fn path_var(var: &impl Fn(&str) -> Option<String>, name: &str, default: &str) -> PathBuf {
    PathBuf::from(var(name).unwrap_or_else(|| default.to_string()))
}
