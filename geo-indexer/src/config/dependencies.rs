//! Dependency initialization and wiring for the geo indexer.

use std::sync::Arc;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::jobs::load_jobs;
use crate::config::settings::{ConnectionMode, RunSettings};
use crate::loader::{FailureRecorder, IndexingQueue};
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::source::{HttpSourceFactory, Ogr2OgrConverter, SourceSettings};
use crate::IndexingError;
use geo_indexer_repository::opensearch::IndexConfig;
use geo_indexer_repository::{OpenSearchProvider, SearchIndexError, SearchIndexProvider};

/// Container for all initialized dependencies.
pub struct Dependencies {
    /// The configured orchestrator ready to run.
    pub orchestrator: Orchestrator,
    pub settings: RunSettings,
}

impl Dependencies {
    /// Initialize all dependencies from environment variables.
    ///
    /// See [`RunSettings::from_env`] for the variables read.
    ///
    /// # Returns
    ///
    /// * `Ok(Dependencies)` - Initialized dependencies
    /// * `Err(IndexingError)` - If configuration is invalid or the index cannot
    ///   be prepared
    pub async fn new() -> Result<Self, IndexingError> {
        Self::from_settings(RunSettings::from_env()?).await
    }

    pub async fn from_settings(settings: RunSettings) -> Result<Self, IndexingError> {
        info!(
            opensearch_url = %settings.opensearch_url,
            connection_mode = ?settings.connection_mode,
            retry_interval_secs = settings.retry_interval.as_secs(),
            index_alias = %settings.index_alias,
            index_version = settings.index_version,
            fresh_index = settings.fresh_index,
            start_index = settings.start_index,
            jobs_file = %settings.jobs_file.display(),
            "Initializing dependencies"
        );

        let jobs = load_jobs(&settings.jobs_file).await?;
        if let Some(only) = &settings.only_job_types {
            for job_type in only {
                if !jobs.iter().any(|job| &job.job_type == job_type) {
                    warn!(job_type = %job_type, "ONLY_JOB_TYPES names a job that is not configured");
                }
            }
        }

        let index_config = IndexConfig::new(&settings.index_alias, settings.index_version);
        let search_provider = Self::connect_to_opensearch(&settings, index_config).await?;
        info!("OpenSearch index ready");

        let recorder = Arc::new(FailureRecorder::new(&settings.failed_dir));
        info!(path = %recorder.path().display(), "Failures will be recorded");

        let queue = Arc::new(IndexingQueue::new(
            Arc::new(search_provider),
            recorder,
            settings.queue_config(),
        ));

        let sources = HttpSourceFactory::new(
            SourceSettings {
                cache_dir: settings.cache_dir.clone(),
                batch_max_bytes: settings.batch_max_bytes,
                request_timeout: settings.source_timeout,
            },
            Arc::new(Ogr2OgrConverter::new(&settings.ogr2ogr_path)),
        )?;

        let orchestrator = Orchestrator::new(
            jobs,
            Arc::new(sources),
            queue,
            OrchestratorConfig {
                index: settings.index_alias.clone(),
                only_job_types: settings.only_job_types.clone(),
                maps_file: settings.maps_file.clone(),
                progress_interval: settings.progress_interval,
            },
        );

        Ok(Self {
            orchestrator,
            settings,
        })
    }

    /// Connect to OpenSearch and prepare the index, retrying transient
    /// failures according to the connection mode.
    async fn connect_to_opensearch(
        settings: &RunSettings,
        index_config: IndexConfig,
    ) -> Result<OpenSearchProvider, IndexingError> {
        loop {
            match Self::try_connect_opensearch(settings, index_config.clone()).await {
                Ok(provider) => return Ok(provider),
                Err(e) if settings.connection_mode == ConnectionMode::Retry && e.is_transient() => {
                    warn!(
                        opensearch_url = %settings.opensearch_url,
                        error = %e,
                        retry_interval_secs = settings.retry_interval.as_secs(),
                        "Failed to connect to OpenSearch, retrying..."
                    );
                    sleep(settings.retry_interval).await;
                }
                Err(e) => {
                    return Err(IndexingError::config(format!(
                        "Failed to prepare OpenSearch index: {}",
                        e
                    )));
                }
            }
        }
    }

    /// Create the provider and ensure the index and alias exist.
    async fn try_connect_opensearch(
        settings: &RunSettings,
        index_config: IndexConfig,
    ) -> Result<OpenSearchProvider, SearchIndexError> {
        let provider = OpenSearchProvider::new(
            &settings.opensearch_url,
            index_config,
            settings.request_timeout,
        )
        .await?;
        provider.ensure_index_exists(settings.fresh_index).await?;
        Ok(provider)
    }
}
