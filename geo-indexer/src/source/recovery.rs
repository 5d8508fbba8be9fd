//! Replays a recovery artifact written by the failure recorder.

use std::collections::VecDeque;

use async_trait::async_trait;
use geo_indexer_shared::{Document, FailureRecord, JobDescriptor};
use tracing::info;

use super::{RecordSource, SourceBatch};
use crate::errors::IngestError;

/// Yields the documents of a recovery artifact, without their reasons, in
/// chunks bounded by serialized size.
pub struct RecoverySource {
    chunks: VecDeque<Vec<Document>>,
    expected: u64,
}

impl RecoverySource {
    /// Read and parse the artifact at the job's location.
    pub async fn open(job: &JobDescriptor, batch_max_bytes: usize) -> Result<Self, IngestError> {
        let bytes = tokio::fs::read(&job.location)
            .await
            .map_err(|e| IngestError::source(&job.job_type, format!("{}: {}", job.location, e)))?;
        let records: Vec<FailureRecord> = serde_json::from_slice(&bytes).map_err(|e| {
            IngestError::source(&job.job_type, format!("malformed recovery artifact: {}", e))
        })?;

        info!(job_type = %job.job_type, records = records.len(), "Loaded recovery artifact");
        Ok(Self::from_records(records, batch_max_bytes))
    }

    pub fn from_records(records: Vec<FailureRecord>, batch_max_bytes: usize) -> Self {
        let documents = records.into_iter().map(FailureRecord::into_document);
        let chunks: VecDeque<_> = chunks_of_size(documents, batch_max_bytes).into();
        Self {
            expected: chunks.len() as u64,
            chunks,
        }
    }
}

#[async_trait]
impl RecordSource for RecoverySource {
    async fn next_batch(&mut self) -> Result<Option<SourceBatch>, IngestError> {
        Ok(self.chunks.pop_front().map(SourceBatch::Documents))
    }

    fn expected_batches(&self) -> Option<u64> {
        Some(self.expected)
    }
}

/// Group documents into chunks, starting a new chunk once the current one's
/// serialized size exceeds `max_bytes`.
fn chunks_of_size(
    documents: impl IntoIterator<Item = Document>,
    max_bytes: usize,
) -> Vec<Vec<Document>> {
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut size = 0;

    for document in documents {
        size += document.serialized_len();
        current.push(document);
        if size > max_bytes {
            chunks.push(std::mem::take(&mut current));
            size = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_indexer_shared::SourceKind;
    use serde_json::{json, Map, Value};

    fn document(id: &str) -> Document {
        let body: Map<String, Value> = json!({"id": id, "place": "Leeds"}).as_object().cloned().unwrap();
        Document::new("geo_lookup", "place", id, body)
    }

    #[test]
    fn test_chunks_close_after_crossing_threshold() {
        let docs: Vec<_> = (0..5).map(|i| document(&format!("p{i}"))).collect();
        let one = docs[0].serialized_len();

        let chunks = chunks_of_size(docs, one * 2);
        let sizes: Vec<_> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 2]);
    }

    #[tokio::test]
    async fn test_replay_strips_reasons() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recovery.json");
        let records = vec![
            FailureRecord::new(document("p1"), "mapper_parsing_exception"),
            FailureRecord::new(document("p2"), "timeout"),
        ];
        std::fs::write(&path, serde_json::to_vec(&records).unwrap()).unwrap();

        let job = JobDescriptor::new("recovery", SourceKind::Recovery, path.to_string_lossy());
        let mut source = RecoverySource::open(&job, 10_000_000).await.unwrap();
        assert_eq!(source.expected_batches(), Some(1));

        let Some(SourceBatch::Documents(docs)) = source.next_batch().await.unwrap() else {
            panic!("expected a document batch");
        };
        assert_eq!(docs, vec![document("p1"), document("p2")]);
        assert!(source.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_without_reason_still_replays() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recovery.json");
        std::fs::write(
            &path,
            json!([{"head": {"index": {"_index": "geo_lookup", "_type": "ward", "_id": "E05000001"}}, "body": {"id": "E05000001"}}])
                .to_string(),
        )
        .unwrap();

        let job = JobDescriptor::new("recovery", SourceKind::Recovery, path.to_string_lossy());
        let mut source = RecoverySource::open(&job, 1000).await.unwrap();
        let Some(SourceBatch::Documents(docs)) = source.next_batch().await.unwrap() else {
            panic!("expected a document batch");
        };
        assert_eq!(docs[0].id(), "E05000001");
        assert_eq!(docs[0].head.doc_type, "ward");
    }
}
