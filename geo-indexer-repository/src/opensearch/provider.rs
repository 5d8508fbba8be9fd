//! OpenSearch provider implementation.
//!
//! This module provides the concrete implementation of `SearchIndexProvider`
//! using the OpenSearch Rust crate.

use std::time::Duration;

use async_trait::async_trait;
use geo_indexer_shared::Document;
use opensearch::{
    http::request::JsonBody,
    http::transport::{SingleNodeConnectionPool, TransportBuilder},
    indices::{
        IndicesCreateParts, IndicesDeleteParts, IndicesExistsParts, IndicesPutAliasParts,
    },
    BulkParts, OpenSearch,
};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::errors::SearchIndexError;
use crate::interfaces::SearchIndexProvider;
use crate::opensearch::index_config::{get_index_settings, IndexConfig};
use crate::types::BulkWriteSummary;
use crate::utils;

/// OpenSearch provider implementation.
///
/// Writes go through the alias; the versioned index behind it is created on
/// startup by [`SearchIndexProvider::ensure_index_exists`].
///
/// # Example
///
/// ```ignore
/// use std::time::Duration;
/// use geo_indexer_repository::opensearch::{IndexConfig, OpenSearchProvider};
///
/// let config = IndexConfig::new("geo_lookup", 0);
/// let provider =
///     OpenSearchProvider::new("http://localhost:9200", config, Duration::from_secs(300)).await?;
/// provider.ensure_index_exists(false).await?;
/// let summary = provider.bulk_index_documents(&documents).await?;
/// ```
pub struct OpenSearchProvider {
    client: OpenSearch,
    index_config: IndexConfig,
}

impl OpenSearchProvider {
    /// Create a new OpenSearch provider connected to the specified URL.
    ///
    /// # Arguments
    ///
    /// * `url` - The OpenSearch server URL (e.g., "http://localhost:9200")
    /// * `index_config` - The index configuration containing alias and version
    /// * `request_timeout` - Upper bound on a single request, bulk writes included
    ///
    /// # Returns
    ///
    /// * `Ok(OpenSearchProvider)` - A new provider instance
    /// * `Err(SearchIndexError)` - If connection setup fails
    pub async fn new(
        url: &str,
        index_config: IndexConfig,
        request_timeout: Duration,
    ) -> Result<Self, SearchIndexError> {
        let parsed_url =
            Url::parse(url).map_err(|e| SearchIndexError::connection(e.to_string()))?;

        let conn_pool = SingleNodeConnectionPool::new(parsed_url);
        let transport = TransportBuilder::new(conn_pool)
            .disable_proxy()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        let client = OpenSearch::new(transport);

        info!(
            url = %url,
            alias = %index_config.alias,
            version = index_config.version,
            timeout_secs = request_timeout.as_secs(),
            "Created OpenSearch provider"
        );

        Ok(Self {
            client,
            index_config,
        })
    }

    fn request_error(e: opensearch::Error) -> SearchIndexError {
        if e.is_timeout() {
            SearchIndexError::timeout(e.to_string())
        } else {
            SearchIndexError::connection(e.to_string())
        }
    }

    async fn index_exists(&self, index: &str) -> Result<bool, SearchIndexError> {
        let response = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[index]))
            .send()
            .await
            .map_err(Self::request_error)?;

        match response.status_code().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            other => Err(SearchIndexError::index_creation(format!(
                "Unexpected status {} checking index {}",
                other, index
            ))),
        }
    }

    async fn delete_index(&self, index: &str) -> Result<(), SearchIndexError> {
        let response = self
            .client
            .indices()
            .delete(IndicesDeleteParts::Index(&[index]))
            .send()
            .await
            .map_err(Self::request_error)?;

        let status = response.status_code();
        if !status.is_success() && status.as_u16() != 404 {
            let error_body = response.text().await.unwrap_or_default();
            return Err(SearchIndexError::index_creation(format!(
                "Delete of {} failed with status {}: {}",
                index, status, error_body
            )));
        }
        Ok(())
    }

    async fn create_index(&self, index: &str) -> Result<(), SearchIndexError> {
        let response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(index))
            .body(get_index_settings())
            .send()
            .await
            .map_err(Self::request_error)?;

        let status = response.status_code();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %error_body, "Create index request failed");
            return Err(SearchIndexError::index_creation(format!(
                "Create of {} failed with status {}: {}",
                index, status, error_body
            )));
        }

        let response = self
            .client
            .indices()
            .put_alias(IndicesPutAliasParts::IndexName(
                &[index],
                &self.index_config.alias,
            ))
            .send()
            .await
            .map_err(Self::request_error)?;

        let status = response.status_code();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(SearchIndexError::index_creation(format!(
                "Alias {} -> {} failed with status {}: {}",
                self.index_config.alias, index, status, error_body
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SearchIndexProvider for OpenSearchProvider {
    async fn ensure_index_exists(&self, fresh: bool) -> Result<(), SearchIndexError> {
        let index = self.index_config.versioned_name();
        let exists = self.index_exists(&index).await?;

        if exists && !fresh {
            debug!(index = %index, "Index already exists");
            return Ok(());
        }

        if exists {
            warn!(index = %index, "Deleting existing index for a fresh run");
            self.delete_index(&index).await?;
        }

        self.create_index(&index).await?;
        info!(index = %index, alias = %self.index_config.alias, "Created index");
        Ok(())
    }

    /// Write a batch in one `_bulk` request.
    ///
    /// A non-success HTTP status fails the whole batch; otherwise the
    /// per-item results are returned in batch order.
    async fn bulk_index_documents(
        &self,
        documents: &[Document],
    ) -> Result<BulkWriteSummary, SearchIndexError> {
        if documents.is_empty() {
            return Ok(BulkWriteSummary::default());
        }

        let body: Vec<JsonBody<Value>> = utils::bulk_operations(documents)
            .into_iter()
            .map(JsonBody::new)
            .collect();

        let response = self
            .client
            .bulk(BulkParts::Index(&self.index_config.alias))
            .body(body)
            .send()
            .await
            .map_err(Self::request_error)?;

        let status = response.status_code();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %error_body, "Bulk request failed");
            return Err(SearchIndexError::bulk_index(format!(
                "Bulk write failed with status {}: {}",
                status, error_body
            )));
        }

        let json = response
            .json::<Value>()
            .await
            .map_err(|e| SearchIndexError::parse(e.to_string()))?;

        let summary = utils::parse_bulk_response(&json, documents.len())?;
        debug!(
            count = documents.len(),
            succeeded = summary.succeeded(),
            took_ms = summary.took_ms,
            "Bulk write completed"
        );
        Ok(summary)
    }
}
