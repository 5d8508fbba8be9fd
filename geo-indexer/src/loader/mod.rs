//! Loader module for the geo indexer.
//!
//! Buffers documents in the [`IndexingQueue`], writes them to the search
//! index in bulk and hands rejected documents to the [`FailureRecorder`].

mod failure_recorder;
mod queue;

pub use failure_recorder::FailureRecorder;
pub use queue::{
    DrainOutcome, DrainReport, IndexingQueue, QueueConfig, QueueSnapshot, TickerHandle,
    DEFAULT_BATCH_MAX_BYTES, DEFAULT_BENIGN_PATTERNS,
};
