//! Utility functions for building bulk requests and reading bulk responses.
//!
//! Kept free of any client type so the wire format can be tested without a
//! running search engine.

use geo_indexer_shared::Document;
use serde_json::{json, Map, Value};

use crate::errors::SearchIndexError;
use crate::types::{BulkItemResult, BulkWriteSummary};

/// Build the newline-delimited bulk body for a batch: one action line and
/// one source line per document.
///
/// The sink has no mapping types, so the head's category is written into the
/// body as `type` unless the body already has one. The parent reference is
/// sent as the routing key.
///
/// # Example
///
/// ```
/// use geo_indexer_repository::bulk_operations;
/// use geo_indexer_shared::Document;
///
/// let doc = Document::new("geo_lookup", "ward", "E05000001", Default::default());
/// let lines = bulk_operations(&[doc]);
/// assert_eq!(lines.len(), 2);
/// assert_eq!(lines[0]["index"]["_id"], "E05000001");
/// ```
pub fn bulk_operations(documents: &[Document]) -> Vec<Value> {
    let mut lines = Vec::with_capacity(documents.len() * 2);
    for document in documents {
        let mut action = Map::new();
        action.insert("_index".to_string(), json!(document.head.index));
        action.insert("_id".to_string(), json!(document.head.id));
        if let Some(ref parent) = document.head.parent {
            action.insert("routing".to_string(), json!(parent));
        }
        lines.push(json!({ "index": action }));

        let mut body = document.body.clone();
        if !body.contains_key("type") {
            body.insert("type".to_string(), json!(document.head.doc_type));
        }
        lines.push(Value::Object(body));
    }
    lines
}

/// Read the per-item results out of a bulk response.
///
/// Items are matched to the batch by position. The rejection reason is the
/// most specific one the sink gives: `caused_by.reason`, then `reason`, then
/// the error `type`.
///
/// # Arguments
///
/// * `response` - The parsed bulk response body
/// * `expected` - Number of documents in the batch
///
/// # Returns
///
/// * `Ok(BulkWriteSummary)` - One item per document
/// * `Err(SearchIndexError)` - If the response is malformed or the item count
///   does not match the batch
pub fn parse_bulk_response(
    response: &Value,
    expected: usize,
) -> Result<BulkWriteSummary, SearchIndexError> {
    let items = response
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| SearchIndexError::parse("Bulk response has no items array"))?;

    if items.len() != expected {
        return Err(SearchIndexError::parse(format!(
            "Bulk response has {} items for a batch of {}",
            items.len(),
            expected
        )));
    }

    let mut results = Vec::with_capacity(items.len());
    for item in items {
        // Each item is keyed by its action name: {"index": {...}}
        let outcome = item
            .as_object()
            .and_then(|obj| obj.values().next())
            .ok_or_else(|| SearchIndexError::parse("Bulk response item is empty"))?;

        let id = match outcome.get("_id") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let status = outcome
            .get("status")
            .and_then(Value::as_u64)
            .and_then(|status| u16::try_from(status).ok())
            .unwrap_or(0);

        results.push(BulkItemResult {
            id,
            status,
            error: outcome.get("error").map(error_reason),
        });
    }

    Ok(BulkWriteSummary {
        took_ms: response.get("took").and_then(Value::as_u64).unwrap_or(0),
        items: results,
    })
}

fn error_reason(error: &Value) -> String {
    if let Some(reason) = error.as_str() {
        return reason.to_string();
    }
    error
        .pointer("/caused_by/reason")
        .or_else(|| error.get("reason"))
        .or_else(|| error.get("type"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}
