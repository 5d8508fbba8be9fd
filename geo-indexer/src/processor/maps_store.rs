//! Cross-reference lookup tables built while jobs run.
//!
//! One table per job type, each a JSON object of lookup key to enrichment
//! record. Tables only grow: merges are deep and there is no removal.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::errors::IngestError;

/// The maps store. Owned by the orchestrator and lent to the template
/// engine for each feature.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(transparent)]
pub struct MapsStore {
    tables: BTreeMap<String, Value>,
}

impl MapsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure a table exists for `job_type`, so lookups into a job that
    /// produced nothing resolve to null rather than failing.
    pub fn ensure_table(&mut self, job_type: &str) {
        self.tables
            .entry(job_type.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    /// The record stored under `key` in the `job_type` table.
    pub fn get(&self, job_type: &str, key: &str) -> Option<&Value> {
        self.tables.get(job_type).and_then(|table| table.get(key))
    }

    /// A whole table.
    pub fn table(&self, job_type: &str) -> Option<&Value> {
        self.tables.get(job_type)
    }

    /// Deep-merge `partial` into the `job_type` table.
    ///
    /// Nested objects accumulate fields; any other value replaces what was
    /// there.
    pub fn merge(&mut self, job_type: &str, partial: Map<String, Value>) {
        let table = self
            .tables
            .entry(job_type.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        deep_merge(table, Value::Object(partial));
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Total entries across all tables.
    pub fn entry_count(&self) -> usize {
        self.tables
            .values()
            .filter_map(Value::as_object)
            .map(Map::len)
            .sum()
    }

    /// The whole store as one JSON object keyed by job type.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.tables
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Write the maps artifact as pretty JSON, creating parent directories.
    pub async fn persist(&self, path: &Path) -> Result<(), IngestError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, json).await?;

        info!(
            path = %path.display(),
            tables = self.table_count(),
            entries = self.entry_count(),
            "Wrote maps artifact"
        );
        Ok(())
    }
}

/// Merge `patch` into `target` recursively.
pub fn deep_merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        deep_merge(existing, value)
                    }
                    _ => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}
