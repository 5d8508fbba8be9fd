//! # Geo Indexer Repository
//!
//! This crate provides the bulk-write sink used by the geo indexer: the
//! `SearchIndexProvider` trait, its error type, the bulk request/response
//! types and a concrete implementation for OpenSearch.

pub mod errors;
pub mod interfaces;
pub mod opensearch;
pub mod types;
pub mod utils;

pub use errors::SearchIndexError;
pub use interfaces::SearchIndexProvider;
pub use opensearch::OpenSearchProvider;
pub use types::{BulkItemResult, BulkWriteSummary};
pub use utils::{bulk_operations, parse_bulk_response};
