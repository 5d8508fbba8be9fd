//! Response types for bulk write operations.

/// Result of a bulk write for a single document.
///
/// The sink accepted the document when `error` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemResult {
    /// The document identifier echoed by the sink.
    pub id: String,
    /// HTTP-style status of the item.
    pub status: u16,
    /// Rejection reason if the item failed.
    pub error: Option<String>,
}

impl BulkItemResult {
    /// A successful item.
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: 201,
            error: None,
        }
    }

    /// A rejected item.
    pub fn rejected(id: impl Into<String>, status: u16, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status,
            error: Some(reason.into()),
        }
    }
}

/// Summary of a bulk write: per-item results in batch order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkWriteSummary {
    /// Time the sink reports spending on the request, in milliseconds.
    pub took_ms: u64,
    pub items: Vec<BulkItemResult>,
}

impl BulkWriteSummary {
    /// Build a summary in which every document was accepted.
    pub fn all_ok<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            took_ms: 0,
            items: ids.into_iter().map(BulkItemResult::ok).collect(),
        }
    }

    /// Number of items without an error.
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|item| item.error.is_none()).count()
    }
}
