//! Error types for the geo indexer pipeline.

use thiserror::Error;

/// Errors that can occur while running ingestion jobs.
///
/// Everything here is fatal to the run except where a component explicitly
/// degrades (self-intersection resolution) or records instead of failing
/// (sink rejections go to the failure recorder, not into this type).
#[derive(Error, Debug)]
pub enum IngestError {
    /// A record source could not be fetched or read.
    #[error("Source error for job '{job_type}': {message}")]
    SourceError { job_type: String, message: String },

    /// A template failed to evaluate. Carries the partially rendered output
    /// for diagnosis.
    #[error("Template error for job '{job_type}': {message}; rendered: {rendered}")]
    TemplateError {
        job_type: String,
        message: String,
        rendered: String,
    },

    /// Geometry simplification or ring repair failed.
    #[error("Geometry error: {0}")]
    GeometryError(String),

    /// The recovery artifact could not be written.
    #[error("Recorder error: {0}")]
    RecorderError(String),

    /// Filesystem error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error parsing or decoding data.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Invalid job or run configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl IngestError {
    /// Create a source error.
    pub fn source(job_type: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::SourceError {
            job_type: job_type.into(),
            message: msg.into(),
        }
    }

    /// Create a template error.
    pub fn template(
        job_type: impl Into<String>,
        msg: impl Into<String>,
        rendered: impl Into<String>,
    ) -> Self {
        Self::TemplateError {
            job_type: job_type.into(),
            message: msg.into(),
            rendered: rendered.into(),
        }
    }

    /// Create a geometry error.
    pub fn geometry(msg: impl Into<String>) -> Self {
        Self::GeometryError(msg.into())
    }

    /// Create a recorder error.
    pub fn recorder(msg: impl Into<String>) -> Self {
        Self::RecorderError(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}
