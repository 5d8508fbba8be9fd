//! # Geo Indexer
//!
//! Batch ETL for UK geographic reference data: downloads boundary, postcode
//! and place datasets, reshapes each record into a search document with
//! per-job templates, builds cross-reference lookup tables and bulk-loads the
//! documents into OpenSearch.
//!
//! ## Architecture
//!
//! 1. **Source**: Pulls batches of raw features from paged APIs, GeoJSON,
//!    CSV, zipped shapefiles or a recovery artifact
//! 2. **Processor**: Repairs polygon geometry and evaluates the job's
//!    templates against the feature, the job and the maps built so far
//! 3. **Loader**: Queues documents and writes them in size-bounded bulk
//!    requests, recording rejected documents for replay
//! 4. **Orchestrator**: Runs jobs in declared order and reports progress
//!
//! ## Modules
//!
//! - [`config`]: Run settings, job file and dependency wiring
//! - [`source`]: Record source adapters
//! - [`processor`]: Template engine, maps store and geometry repair
//! - [`loader`]: Indexing queue and failure recorder
//! - [`orchestrator`]: Job runner
//! - [`errors`]: Error types for the pipeline

pub mod config;
pub mod errors;
pub mod loader;
pub mod orchestrator;
pub mod processor;
pub mod source;

pub use config::Dependencies;
pub use errors::IngestError;

use thiserror::Error;

/// Errors that can occur during indexer initialization or execution.
#[derive(Error, Debug)]
pub enum IndexingError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Ingest error.
    #[error("Ingest error: {0}")]
    IngestError(#[from] IngestError),
}

impl IndexingError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
