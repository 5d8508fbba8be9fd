//! Search index provider trait definition.
//!
//! This module defines the abstract interface for the bulk-write sink,
//! allowing for different backend implementations (OpenSearch, Elasticsearch,
//! or an in-memory mock in tests).

use async_trait::async_trait;
use geo_indexer_shared::Document;

use crate::errors::SearchIndexError;
use crate::types::BulkWriteSummary;

/// Abstracts the underlying search index implementation.
///
/// The indexing queue only ever needs two things from the sink: an index to
/// write into and a bulk write. Implementations are injected into the queue
/// behind an `Arc<dyn SearchIndexProvider>` so tests can substitute mocks.
#[async_trait]
pub trait SearchIndexProvider: Send + Sync {
    /// Ensure the target index and its alias exist, creating them if necessary.
    ///
    /// When `fresh` is set an existing index is deleted and recreated first.
    /// Called once at startup, before any write.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If the index is ready for use
    /// * `Err(SearchIndexError)` - If initialization fails
    async fn ensure_index_exists(&self, fresh: bool) -> Result<(), SearchIndexError>;

    /// Write a batch of documents in a single bulk request.
    ///
    /// # Arguments
    ///
    /// * `documents` - The batch, in queue order
    ///
    /// # Returns
    ///
    /// * `Ok(BulkWriteSummary)` - One item result per document, in the same order.
    ///   Items may carry a rejection reason.
    /// * `Err(SearchIndexError)` - If the request failed as a whole (timeout,
    ///   unreachable sink, unreadable response)
    async fn bulk_index_documents(
        &self,
        documents: &[Document],
    ) -> Result<BulkWriteSummary, SearchIndexError>;
}
