//! Document types for the search index.
//!
//! A [`Document`] is the unit of work handed to the indexing queue: a write
//! head that says where the document goes and a free-form JSON body.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where a document is written.
///
/// Serializes in the bulk action shape used by the recovery artifact:
/// `{"index": {"_index": .., "_type": .., "_id": .., "parent": ..}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireHead", into = "WireHead")]
pub struct DocumentHead {
    /// Target collection (index or alias) name.
    pub index: String,
    /// Category of the document, the job type that produced it.
    pub doc_type: String,
    /// Stable identifier, derived from the source feature.
    pub id: String,
    /// Parent reference for hierarchical datasets.
    pub parent: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct WireHead {
    index: WireAction,
}

#[derive(Serialize, Deserialize)]
struct WireAction {
    #[serde(rename = "_index")]
    index: String,
    #[serde(rename = "_type")]
    doc_type: String,
    #[serde(rename = "_id")]
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<String>,
}

impl From<WireHead> for DocumentHead {
    fn from(head: WireHead) -> Self {
        Self {
            index: head.index.index,
            doc_type: head.index.doc_type,
            id: head.index.id,
            parent: head.index.parent,
        }
    }
}

impl From<DocumentHead> for WireHead {
    fn from(head: DocumentHead) -> Self {
        Self {
            index: WireAction {
                index: head.index,
                doc_type: head.doc_type,
                id: head.id,
                parent: head.parent,
            },
        }
    }
}

/// Document representation for the search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub head: DocumentHead,
    pub body: Map<String, Value>,
}

impl Document {
    /// Create a new document without a parent reference.
    pub fn new(
        index: impl Into<String>,
        doc_type: impl Into<String>,
        id: impl Into<String>,
        body: Map<String, Value>,
    ) -> Self {
        Self {
            head: DocumentHead {
                index: index.into(),
                doc_type: doc_type.into(),
                id: id.into(),
                parent: None,
            },
            body,
        }
    }

    /// Set the parent reference of the document.
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.head.parent = Some(parent.into());
        self
    }

    /// The document identifier.
    pub fn id(&self) -> &str {
        &self.head.id
    }

    /// Size in bytes of the document as it travels to the sink (head and body JSON).
    ///
    /// Used to cut drain batches by payload size rather than document count.
    pub fn serialized_len(&self) -> usize {
        let head = serde_json::to_string(&self.head).map(|s| s.len()).unwrap_or(0);
        let body = serde_json::to_string(&self.body).map(|s| s.len()).unwrap_or(0);
        head + body + 2
    }
}

/// A document the sink rejected, together with the reason.
///
/// The recovery artifact is a JSON array of these. The reason is optional on
/// read so that hand-edited artifacts without one still replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub head: DocumentHead,
    pub body: Map<String, Value>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl FailureRecord {
    /// Tag a document with the reason it failed.
    pub fn new(document: Document, reason: impl Into<String>) -> Self {
        Self {
            head: document.head,
            body: document.body,
            reason: Some(reason.into()),
        }
    }

    /// Strip the reason and return the original document.
    pub fn into_document(self) -> Document {
        Document {
            head: self.head,
            body: self.body,
        }
    }
}
