//! Turns raw features into documents and maps entries for one job.

use geo_indexer_shared::{Document, JobDescriptor, RawFeature, Template};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::errors::IngestError;
use crate::processor::maps_store::MapsStore;
use crate::processor::template::{self, TemplateContext, TemplateError};

/// Per-job transform: evaluates the document template and the maps template
/// for every feature of the job.
///
/// Per feature the document is rendered first and the maps entries are
/// merged afterwards, so a feature never sees its own maps entries.
#[derive(Debug)]
pub struct FeatureProcessor {
    job: JobDescriptor,
    job_value: Value,
    index: String,
    emit_documents: bool,
}

impl FeatureProcessor {
    /// Create the processor for a job.
    ///
    /// `emit_documents` is false when the job is excluded by the run's
    /// allow-list; its maps are still built.
    ///
    /// # Errors
    ///
    /// Returns a template error if either template refers to an unknown
    /// context root.
    pub fn new(
        job: JobDescriptor,
        index: impl Into<String>,
        emit_documents: bool,
    ) -> Result<Self, IngestError> {
        for template in [&job.document_template, &job.maps_template]
            .into_iter()
            .flatten()
        {
            template::validate(template).map_err(|e| Self::error(&job, e))?;
        }
        let job_value = serde_json::to_value(&job)?;

        Ok(Self {
            emit_documents: emit_documents && job.document_template.is_some(),
            job,
            job_value,
            index: index.into(),
        })
    }

    pub fn job(&self) -> &JobDescriptor {
        &self.job
    }

    /// Whether this job produces documents in this run.
    pub fn emits_documents(&self) -> bool {
        self.emit_documents
    }

    /// Process one batch of features, merging maps entries into `maps` and
    /// returning the documents to index.
    #[instrument(skip(self, features, maps), fields(job_type = %self.job.job_type, feature_count = features.len()))]
    pub fn process_batch(
        &self,
        features: Vec<RawFeature>,
        maps: &mut MapsStore,
    ) -> Result<Vec<Document>, IngestError> {
        let mut documents = Vec::with_capacity(if self.emit_documents { features.len() } else { 0 });

        for feature in &features {
            if let Some(document) = self.render_document(feature, maps)? {
                documents.push(document);
            }
            if let Some(entries) = self.render_maps(feature, maps)? {
                maps.merge(&self.job.job_type, entries);
            }
        }

        debug!(documents = documents.len(), "Processed feature batch");
        Ok(documents)
    }

    fn render_document(
        &self,
        feature: &RawFeature,
        maps: &MapsStore,
    ) -> Result<Option<Document>, IngestError> {
        let Some(template) = self.document_template() else {
            return Ok(None);
        };
        let ctx = TemplateContext::new(feature.as_value(), &self.job_value, maps);
        let Some(body) =
            template::evaluate_object(template, &ctx).map_err(|e| Self::error(&self.job, e))?
        else {
            return Ok(None);
        };

        let id = template::document_id(&body).ok_or_else(|| {
            IngestError::template(
                &self.job.job_type,
                "document has no id",
                Value::Object(body.clone()).to_string(),
            )
        })?;

        let parent = self
            .job
            .parent_field
            .as_deref()
            .and_then(|field| body.get(field))
            .and_then(|value| match value {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });

        let document = Document::new(&self.index, &self.job.job_type, id, body);
        Ok(Some(match parent {
            Some(parent) => document.with_parent(parent),
            None => document,
        }))
    }

    fn render_maps(
        &self,
        feature: &RawFeature,
        maps: &MapsStore,
    ) -> Result<Option<serde_json::Map<String, Value>>, IngestError> {
        let Some(template) = &self.job.maps_template else {
            return Ok(None);
        };
        let ctx = TemplateContext::new(feature.as_value(), &self.job_value, maps);
        template::evaluate_object(template, &ctx).map_err(|e| Self::error(&self.job, e))
    }

    fn document_template(&self) -> Option<&Template> {
        self.job
            .document_template
            .as_ref()
            .filter(|_| self.emit_documents)
    }

    fn error(job: &JobDescriptor, e: TemplateError) -> IngestError {
        IngestError::template(&job.job_type, e.message, e.rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_indexer_shared::{SourceKind, TemplateEntry};
    use serde_json::json;

    fn ward_job() -> JobDescriptor {
        JobDescriptor::new("ward", SourceKind::PagedApi, "http://example.test/wards")
            .with_document_template(Template::object(vec![
                TemplateEntry::fixed("id", Template::field("feature.attributes.wd17cd")),
                TemplateEntry::fixed("place", Template::field("feature.attributes.wd17nm")),
                TemplateEntry::fixed(
                    "district",
                    Template::lookup(
                        Template::field("feature.attributes.lad17cd"),
                        Template::field("maps.district"),
                    ),
                ),
            ]))
            .with_maps_template(Template::object(vec![TemplateEntry::computed(
                Template::field("feature.attributes.wd17cd"),
                Template::field("feature.attributes.wd17nm"),
            )]))
    }

    fn ward(code: &str, name: &str) -> RawFeature {
        RawFeature::new(json!({"attributes": {"wd17cd": code, "wd17nm": name, "lad17cd": "E07000001"}}))
    }

    #[test]
    fn test_documents_and_maps_from_one_batch() {
        let processor = FeatureProcessor::new(ward_job(), "geo_lookup", true).unwrap();
        let mut maps = MapsStore::new();
        maps.merge("district", json!({"E07000001": "Dover"}).as_object().cloned().unwrap());

        let docs = processor
            .process_batch(vec![ward("E05000001", "Some Ward"), ward("E05000002", "Other Ward")], &mut maps)
            .unwrap();

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id(), "E05000001");
        assert_eq!(docs[0].head.doc_type, "ward");
        assert_eq!(docs[0].head.index, "geo_lookup");
        assert_eq!(docs[0].body["district"], json!("Dover"));
        assert_eq!(maps.get("ward", "E05000002"), Some(&json!("Other Ward")));
    }

    #[test]
    fn test_ids_are_stable_across_runs() {
        let processor = FeatureProcessor::new(ward_job(), "geo_lookup", true).unwrap();
        let first = processor
            .process_batch(vec![ward("E05000001", "Some Ward")], &mut MapsStore::new())
            .unwrap();
        let second = processor
            .process_batch(vec![ward("E05000001", "Some Ward")], &mut MapsStore::new())
            .unwrap();
        assert_eq!(first[0].id(), second[0].id());
    }

    #[test]
    fn test_excluded_job_still_builds_maps() {
        let processor = FeatureProcessor::new(ward_job(), "geo_lookup", false).unwrap();
        let mut maps = MapsStore::new();

        let docs = processor
            .process_batch(vec![ward("E05000001", "Some Ward")], &mut maps)
            .unwrap();

        assert!(docs.is_empty());
        assert!(!processor.emits_documents());
        assert_eq!(maps.get("ward", "E05000001"), Some(&json!("Some Ward")));
    }

    #[test]
    fn test_missing_id_is_a_template_error() {
        let job = JobDescriptor::new("place", SourceKind::GeoJson, "x").with_document_template(
            Template::object(vec![TemplateEntry::fixed("place", Template::field("feature.properties.name"))]),
        );
        let processor = FeatureProcessor::new(job, "geo_lookup", true).unwrap();

        let err = processor
            .process_batch(
                vec![RawFeature::new(json!({"properties": {"name": "Leeds"}}))],
                &mut MapsStore::new(),
            )
            .unwrap_err();

        match err {
            IngestError::TemplateError { job_type, rendered, .. } => {
                assert_eq!(job_type, "place");
                assert!(rendered.contains("Leeds"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parent_field_sets_head_parent() {
        let job = JobDescriptor {
            parent_field: Some("district".to_string()),
            ..JobDescriptor::new("postcode", SourceKind::Csv, "x").with_document_template(Template::object(vec![
                TemplateEntry::fixed("id", Template::field("feature.properties.pcds")),
                TemplateEntry::fixed("district", Template::field("feature.properties.oslaua")),
            ]))
        };
        let processor = FeatureProcessor::new(job, "geo_lookup", true).unwrap();
        let feature = RawFeature::new(json!({"properties": {"pcds": "AB1 0AA", "oslaua": "S12000033"}}));

        let docs = processor.process_batch(vec![feature], &mut MapsStore::new()).unwrap();
        assert_eq!(docs[0].head.parent.as_deref(), Some("S12000033"));
    }

    #[test]
    fn test_unknown_root_fails_at_construction() {
        let job = JobDescriptor::new("ward", SourceKind::GeoJson, "x")
            .with_maps_template(Template::field("feat.attributes.wd17cd"));
        assert!(matches!(
            FeatureProcessor::new(job, "geo_lookup", true),
            Err(IngestError::TemplateError { .. })
        ));
    }
}
