//! Orchestrator module for the geo indexer.
//!
//! Runs the configured jobs in declared order, routing every source batch
//! through geometry repair and the feature processor into the indexing
//! queue, while the queue's ticker writes to the sink in the background.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use geo_indexer_shared::JobDescriptor;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::errors::IngestError;
use crate::loader::IndexingQueue;
use crate::processor::{FeatureProcessor, GeometryRepair, MapsStore};
use crate::source::{SourceBatch, SourceFactory};

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Target collection written into every document head.
    pub index: String,
    /// Only these job types produce documents; all jobs still build maps.
    pub only_job_types: Option<HashSet<String>>,
    /// Where the maps artifact is written at the end of the run.
    pub maps_file: PathBuf,
    /// Period of the progress log line.
    pub progress_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            index: "geo_lookup".to_string(),
            only_job_types: None,
            maps_file: PathBuf::from("data/maps.json"),
            progress_interval: Duration::from_secs(10),
        }
    }
}

impl OrchestratorConfig {
    fn emits_documents(&self, job: &JobDescriptor) -> bool {
        self.only_job_types
            .as_ref()
            .map_or(true, |only| only.contains(&job.job_type))
    }
}

/// Totals for a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub jobs: usize,
    pub features: u64,
    /// Documents produced by templates or read from recovery artifacts.
    pub documents: u64,
    pub batches: u64,
    pub skipped: u64,
    pub queued: u64,
    pub written: u64,
    pub failed: u64,
    pub benign_rejections: u64,
    pub maps_entries: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct RunProgress {
    features: AtomicU64,
    documents: AtomicU64,
    batches: AtomicU64,
    expected_batches: AtomicU64,
}

/// Drives a run over all jobs.
pub struct Orchestrator {
    jobs: Vec<JobDescriptor>,
    sources: Arc<dyn SourceFactory>,
    queue: Arc<IndexingQueue>,
    maps: MapsStore,
    config: OrchestratorConfig,
    progress: Arc<RunProgress>,
}

impl Orchestrator {
    pub fn new(
        jobs: Vec<JobDescriptor>,
        sources: Arc<dyn SourceFactory>,
        queue: Arc<IndexingQueue>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            jobs,
            sources,
            queue,
            maps: MapsStore::new(),
            config,
            progress: Arc::new(RunProgress::default()),
        }
    }

    /// Maps built so far.
    pub fn maps(&self) -> &MapsStore {
        &self.maps
    }

    pub fn queue(&self) -> &Arc<IndexingQueue> {
        &self.queue
    }

    /// Run every job to completion, drain the queue and write the maps
    /// artifact.
    ///
    /// The first fatal error stops the run; queued documents are not
    /// flushed in that case.
    #[instrument(skip(self), fields(job_count = self.jobs.len()))]
    pub async fn run(&mut self) -> Result<RunSummary, IngestError> {
        let started = Instant::now();
        info!(
            jobs = ?self.jobs.iter().map(|j| j.job_type.as_str()).collect::<Vec<_>>(),
            only_job_types = ?self.config.only_job_types,
            "Starting run"
        );

        for job in &self.jobs {
            self.maps.ensure_table(&job.job_type);
        }

        let ticker = self.queue.start_ticker();
        let (shutdown_tx, reporter) = self.start_progress_reporter();

        let mut result = Ok(());
        for job in self.jobs.clone() {
            if let Err(e) = self.run_job(&job).await {
                error!(job_type = %job.job_type, error = %e, "Job failed");
                result = Err(e);
                break;
            }
        }
        if result.is_ok() {
            info!(pending = self.queue.snapshot().pending, "All jobs finished, draining queue");
            result = self.queue.flush().await;
        }

        ticker.stop().await;
        if let Some(e) = self.queue.take_ticker_error() {
            if result.is_ok() {
                result = Err(e);
            }
        }
        let _ = shutdown_tx.send(());
        if let Err(e) = reporter.await {
            warn!(error = %e, "Progress reporter panicked");
        }
        result?;

        self.maps.persist(&self.config.maps_file).await?;

        let summary = self.summary(started.elapsed());
        info!(
            jobs = summary.jobs,
            features = summary.features,
            documents = summary.documents,
            batches = summary.batches,
            skipped = summary.skipped,
            written = summary.written,
            failed = summary.failed,
            benign_rejections = summary.benign_rejections,
            maps_entries = summary.maps_entries,
            elapsed_secs = summary.elapsed.as_secs(),
            "Run complete"
        );
        Ok(summary)
    }

    async fn run_job(&mut self, job: &JobDescriptor) -> Result<(), IngestError> {
        let emit = self.config.emits_documents(job);
        let processor = FeatureProcessor::new(job.clone(), &self.config.index, emit)?;
        let repair = GeometryRepair::for_job(job);

        let mut source = self.sources.open(job).await?;
        let expected = source.expected_batches();
        if let Some(expected) = expected {
            self.progress.expected_batches.fetch_add(expected, Ordering::Relaxed);
        }
        info!(
            job_type = %job.job_type,
            emits_documents = processor.emits_documents(),
            geometry_repair = repair.is_some(),
            expected_batches = ?expected,
            "Running job"
        );

        let mut job_features = 0u64;
        let mut job_documents = 0u64;
        while let Some(batch) = source.next_batch().await? {
            self.progress.batches.fetch_add(1, Ordering::Relaxed);

            let documents = match batch {
                SourceBatch::Features(features) => {
                    job_features += features.len() as u64;
                    self.progress
                        .features
                        .fetch_add(features.len() as u64, Ordering::Relaxed);

                    let features = match &repair {
                        Some(repair) => repair.apply(features)?,
                        None => features,
                    };
                    processor.process_batch(features, &mut self.maps)?
                }
                SourceBatch::Documents(documents) if emit => documents,
                SourceBatch::Documents(documents) => {
                    debug!(count = documents.len(), "Job excluded, dropping replayed documents");
                    Vec::new()
                }
            };

            job_documents += documents.len() as u64;
            self.progress
                .documents
                .fetch_add(documents.len() as u64, Ordering::Relaxed);
            self.queue.push(documents).await;
        }

        info!(
            job_type = %job.job_type,
            features = job_features,
            documents = job_documents,
            "Job finished"
        );
        Ok(())
    }

    fn start_progress_reporter(&self) -> (broadcast::Sender<()>, JoinHandle<()>) {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let progress = Arc::clone(&self.progress);
        let queue = Arc::clone(&self.queue);
        let period = self.config.progress_interval;

        let handle = tokio::spawn(async move {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            timer.tick().await;

            let mut prev_features = 0u64;
            let mut prev_written = 0u64;
            let mut prev_time = Instant::now();

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = timer.tick() => {
                        let features = progress.features.load(Ordering::Relaxed);
                        let queue_stats = queue.snapshot();

                        let now = Instant::now();
                        let elapsed_secs = now.duration_since(prev_time).as_secs_f64();
                        let rate = |current: u64, previous: u64| {
                            if elapsed_secs > 0.0 {
                                current.saturating_sub(previous) as f64 / elapsed_secs
                            } else {
                                0.0
                            }
                        };

                        info!(
                            batches = progress.batches.load(Ordering::Relaxed),
                            expected_batches = progress.expected_batches.load(Ordering::Relaxed),
                            features = features,
                            documents = progress.documents.load(Ordering::Relaxed),
                            queue_len = queue_stats.pending,
                            skipped = queue_stats.skipped,
                            written = queue_stats.written,
                            failed = queue_stats.failed,
                            features_per_sec = format!("{:.2}", rate(features, prev_features)),
                            written_per_sec = format!("{:.2}", rate(queue_stats.written, prev_written)),
                            "Run progress"
                        );

                        prev_features = features;
                        prev_written = queue_stats.written;
                        prev_time = now;
                    }
                }
            }
        });

        (shutdown_tx, handle)
    }

    fn summary(&self, elapsed: Duration) -> RunSummary {
        let queue = self.queue.snapshot();
        RunSummary {
            jobs: self.jobs.len(),
            features: self.progress.features.load(Ordering::Relaxed),
            documents: self.progress.documents.load(Ordering::Relaxed),
            batches: self.progress.batches.load(Ordering::Relaxed),
            skipped: queue.skipped,
            queued: queue.queued,
            written: queue.written,
            failed: queue.failed,
            benign_rejections: queue.benign_rejections,
            maps_entries: self.maps.entry_count(),
            elapsed,
        }
    }
}
