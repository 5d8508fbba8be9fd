//! # Geo Indexer Shared
//!
//! This crate defines shared data structures used across the geo indexer
//! ecosystem: the documents written to the search index, the job
//! descriptors that drive a run, raw source features and the typed
//! template expressions that turn one into the other.

pub mod types;

pub use types::document::{Document, DocumentHead, FailureRecord};
pub use types::feature::RawFeature;
pub use types::job::{JobDescriptor, SourceKind};
pub use types::template::{CompareOp, EntryKey, Template, TemplateEntry};
