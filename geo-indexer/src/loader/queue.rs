//! The indexing queue: a FIFO buffer of pending documents drained in
//! size-bounded bulk writes by a ticking background task.
//!
//! Producers (the job orchestrator) `push` documents; the ticker calls
//! `drain`, which is single-flight: while one bulk write is unresolved every
//! other drain attempt returns [`DrainOutcome::Busy`] without touching the
//! queue. A document is therefore always queued, in one in-flight batch, or
//! resolved (written, dropped as a benign rejection, or recorded as failed).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use geo_indexer_repository::SearchIndexProvider;
use geo_indexer_shared::{Document, FailureRecord};
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::errors::IngestError;
use crate::loader::failure_recorder::FailureRecorder;

/// Default serialized-size threshold of one bulk write.
pub const DEFAULT_BATCH_MAX_BYTES: usize = 10_000_000;

/// Default rejection substrings treated as expected noise.
pub const DEFAULT_BENIGN_PATTERNS: [&str; 4] =
    ["illegal latitude", "illegal longitude", "illegal lat", "illegal lon"];

/// Configuration for the indexing queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// A batch is closed once its serialized size reaches this many bytes.
    pub batch_max_bytes: usize,
    /// Pause after any failure event, taken while still holding the
    /// in-flight guard.
    pub cooldown: Duration,
    /// Period of the drain ticker.
    pub tick_interval: Duration,
    /// `push` waits while at least this many documents are queued.
    pub max_pending: usize,
    /// Resume offset: documents are dropped until this many were skipped.
    pub start_index: u64,
    /// Rejection reasons containing any of these are dropped, not recorded.
    pub benign_patterns: Vec<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_max_bytes: DEFAULT_BATCH_MAX_BYTES,
            cooldown: Duration::from_secs(10),
            tick_interval: Duration::from_millis(500),
            max_pending: 250_000,
            start_index: 0,
            benign_patterns: DEFAULT_BENIGN_PATTERNS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Result of one drain attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Another write is in flight; nothing was done.
    Busy,
    /// The queue was empty.
    Idle,
    /// One batch was written.
    Written(DrainReport),
}

/// Outcome of a single bulk write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub documents: usize,
    pub bytes: usize,
    pub written: usize,
    pub benign_rejections: usize,
    pub failed: usize,
    /// The request failed as a whole.
    pub request_failed: bool,
}

impl DrainReport {
    pub fn is_failure_event(&self) -> bool {
        self.failed > 0
    }
}

/// Point-in-time counters of the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub pending: usize,
    pub in_flight: bool,
    pub skipped: u64,
    pub queued: u64,
    pub written: u64,
    pub benign_rejections: u64,
    pub failed: u64,
    pub batches: u64,
}

#[derive(Debug, Default)]
struct QueueStats {
    pending: AtomicUsize,
    skipped: AtomicU64,
    queued: AtomicU64,
    written: AtomicU64,
    benign_rejections: AtomicU64,
    failed: AtomicU64,
    batches: AtomicU64,
}

/// Clears the in-flight flag when the drain that set it ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Buffer between document production and bulk writes.
pub struct IndexingQueue {
    provider: Arc<dyn SearchIndexProvider>,
    recorder: Arc<FailureRecorder>,
    config: QueueConfig,
    pending: Mutex<VecDeque<Document>>,
    in_flight: AtomicBool,
    /// Still dropping leading batches for the resume offset.
    resuming: AtomicBool,
    drained: Notify,
    /// First error a background drain hit, returned by `flush`.
    ticker_error: StdMutex<Option<IngestError>>,
    stats: QueueStats,
}

impl IndexingQueue {
    pub fn new(
        provider: Arc<dyn SearchIndexProvider>,
        recorder: Arc<FailureRecorder>,
        config: QueueConfig,
    ) -> Self {
        Self {
            provider,
            recorder,
            pending: Mutex::new(VecDeque::new()),
            in_flight: AtomicBool::new(false),
            resuming: AtomicBool::new(config.start_index > 0),
            drained: Notify::new(),
            ticker_error: StdMutex::new(None),
            stats: QueueStats::default(),
            config,
        }
    }

    pub fn recorder(&self) -> &FailureRecorder {
        &self.recorder
    }

    /// Append documents to the tail of the queue.
    ///
    /// Leading batches that fit entirely within `start_index` are counted and
    /// dropped; the first batch that would cross it ends the resume, so an
    /// offset inside a batch resumes from that batch's start. Waits while the
    /// queue is at its high-water mark. Returns the number of documents
    /// enqueued.
    pub async fn push(&self, documents: Vec<Document>) -> usize {
        if documents.is_empty() {
            return 0;
        }

        let count = documents.len();
        if self.resuming.load(Ordering::Relaxed) {
            let skipped = self.stats.skipped.load(Ordering::Relaxed);
            if skipped + count as u64 <= self.config.start_index {
                let skipped = self.stats.skipped.fetch_add(count as u64, Ordering::Relaxed) + count as u64;
                debug!(count = count, skipped = skipped, start_index = self.config.start_index, "Skipped documents");
                if skipped == self.config.start_index {
                    self.resuming.store(false, Ordering::Relaxed);
                }
                return 0;
            }
            self.resuming.store(false, Ordering::Relaxed);
            info!(skipped = skipped, start_index = self.config.start_index, "Resuming at batch boundary");
        }

        let mut pending = loop {
            let drained = self.drained.notified();
            let pending = self.pending.lock().await;
            if pending.len() < self.config.max_pending {
                break pending;
            }
            warn!(
                queue_len = pending.len(),
                max_pending = self.config.max_pending,
                "Indexing queue full, waiting for a drain"
            );
            drop(pending);
            drained.await;
        };

        pending.extend(documents);
        self.stats.pending.store(pending.len(), Ordering::Relaxed);
        self.stats.queued.fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    /// Write the next batch if no other write is in flight.
    ///
    /// # Errors
    ///
    /// Only a failure to persist the recovery artifact is an error; sink
    /// failures are recorded and reported in the [`DrainReport`].
    pub async fn drain(&self) -> Result<DrainOutcome, IngestError> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            return Ok(DrainOutcome::Busy);
        };

        let (batch, bytes) = self.next_batch().await;
        if batch.is_empty() {
            return Ok(DrainOutcome::Idle);
        }
        self.drained.notify_waiters();

        let report = self.write(batch, bytes).await?;
        if report.is_failure_event() {
            warn!(
                failed = report.failed,
                cooldown_secs = self.config.cooldown.as_secs_f64(),
                "Bulk write failures recorded, cooling down"
            );
            tokio::time::sleep(self.config.cooldown).await;
        }

        Ok(DrainOutcome::Written(report))
    }

    /// Drain until the queue is empty and no write is in flight.
    ///
    /// # Errors
    ///
    /// Fails if the recovery artifact could not be written, whether by this
    /// flush or by an earlier background drain.
    #[instrument(skip(self))]
    pub async fn flush(&self) -> Result<(), IngestError> {
        loop {
            if let Some(e) = self.take_ticker_error() {
                return Err(e);
            }
            match self.drain().await? {
                DrainOutcome::Idle => {
                    return match self.take_ticker_error() {
                        Some(e) => Err(e),
                        None => Ok(()),
                    }
                }
                DrainOutcome::Written(_) => {}
                DrainOutcome::Busy => tokio::time::sleep(self.config.tick_interval).await,
            }
        }
    }

    /// Spawn the background task that drains on every tick.
    pub fn start_ticker(self: &Arc<Self>) -> TickerHandle {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let queue = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(queue.config.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = queue.drain().await {
                            error!(error = %e, "Drain failed");
                            queue.keep_ticker_error(e);
                        }
                    }
                }
            }
            debug!("Drain ticker stopped");
        });

        TickerHandle {
            shutdown_tx,
            handle,
        }
    }

    /// Take the first error raised by a background drain, if any.
    pub fn take_ticker_error(&self) -> Option<IngestError> {
        self.ticker_error.lock().ok().and_then(|mut slot| slot.take())
    }

    fn keep_ticker_error(&self, e: IngestError) {
        if let Ok(mut slot) = self.ticker_error.lock() {
            if slot.is_none() {
                *slot = Some(e);
            }
        }
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            pending: self.stats.pending.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Acquire),
            skipped: self.stats.skipped.load(Ordering::Relaxed),
            queued: self.stats.queued.load(Ordering::Relaxed),
            written: self.stats.written.load(Ordering::Relaxed),
            benign_rejections: self.stats.benign_rejections.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            batches: self.stats.batches.load(Ordering::Relaxed),
        }
    }

    /// Pop documents off the head until the queue is empty or the batch's
    /// serialized size reaches the threshold.
    async fn next_batch(&self) -> (Vec<Document>, usize) {
        let mut pending = self.pending.lock().await;
        let mut batch = Vec::new();
        let mut bytes = 0;

        while bytes < self.config.batch_max_bytes {
            let Some(document) = pending.pop_front() else {
                break;
            };
            bytes += document.serialized_len();
            batch.push(document);
        }

        self.stats.pending.store(pending.len(), Ordering::Relaxed);
        (batch, bytes)
    }

    async fn write(&self, batch: Vec<Document>, bytes: usize) -> Result<DrainReport, IngestError> {
        let mut report = DrainReport {
            documents: batch.len(),
            bytes,
            ..DrainReport::default()
        };
        debug!(batch_size = batch.len(), bytes = bytes, "Writing batch");

        let failures = match self.provider.bulk_index_documents(&batch).await {
            Ok(summary) if summary.items.len() == batch.len() => {
                let mut failures = Vec::new();
                for (document, item) in batch.into_iter().zip(summary.items) {
                    match item.error {
                        None => report.written += 1,
                        Some(reason) if self.is_benign(&reason) => {
                            debug!(id = %item.id, reason = %reason, "Dropped benign rejection");
                            report.benign_rejections += 1;
                        }
                        Some(reason) => failures.push(FailureRecord::new(document, reason)),
                    }
                }
                failures
            }
            Ok(summary) => {
                let reason = format!(
                    "bulk response had {} items for {} documents",
                    summary.items.len(),
                    batch.len()
                );
                report.request_failed = true;
                Self::fail_all(batch, &reason)
            }
            Err(e) => {
                error!(error = %e, batch_size = batch.len(), "Bulk write failed");
                report.request_failed = true;
                Self::fail_all(batch, &e.to_string())
            }
        };

        report.failed = failures.len();
        self.stats.batches.fetch_add(1, Ordering::Relaxed);
        self.stats.written.fetch_add(report.written as u64, Ordering::Relaxed);
        self.stats
            .benign_rejections
            .fetch_add(report.benign_rejections as u64, Ordering::Relaxed);
        self.stats.failed.fetch_add(report.failed as u64, Ordering::Relaxed);

        if !failures.is_empty() {
            for failure in failures.iter().take(5) {
                warn!(
                    id = %failure.head.id,
                    doc_type = %failure.head.doc_type,
                    reason = failure.reason.as_deref().unwrap_or_default(),
                    "Document rejected"
                );
            }
            self.recorder.record(failures).await?;
        } else {
            info!(
                written = report.written,
                benign_rejections = report.benign_rejections,
                bytes = bytes,
                "Batch written"
            );
        }

        Ok(report)
    }

    fn fail_all(batch: Vec<Document>, reason: &str) -> Vec<FailureRecord> {
        batch
            .into_iter()
            .map(|document| FailureRecord::new(document, reason))
            .collect()
    }

    fn is_benign(&self, reason: &str) -> bool {
        self.config
            .benign_patterns
            .iter()
            .any(|pattern| reason.contains(pattern.as_str()))
    }
}

/// Handle to the background drain task.
pub struct TickerHandle {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl TickerHandle {
    /// Stop ticking; an in-progress drain completes first.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.handle.await {
            error!(error = %e, "Drain ticker panicked");
        }
    }
}
