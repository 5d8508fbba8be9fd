//! Error types for the geo indexer repository.
//!
//! This module provides a unified error type for all sink operations.

mod search_index_error;

pub use search_index_error::SearchIndexError;
