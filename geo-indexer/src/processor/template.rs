//! Evaluation of typed template expressions.
//!
//! Templates are evaluated against three roots: `feature` (the raw record),
//! `job` (the job descriptor as JSON) and `maps` (the maps store). Values are
//! borrowed from the context wherever possible; only computed values
//! (concatenations, objects, replacements) allocate.

use std::borrow::Cow;

use geo_indexer_shared::{CompareOp, EntryKey, Template};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::processor::maps_store::MapsStore;

const ROOT_FEATURE: &str = "feature";
const ROOT_JOB: &str = "job";
const ROOT_MAPS: &str = "maps";

/// A template could not be evaluated.
///
/// `rendered` holds the offending output (or template node) so the
/// configuration bug can be located from the log line alone.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct TemplateError {
    pub message: String,
    pub rendered: String,
}

impl TemplateError {
    fn new(message: impl Into<String>, rendered: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            rendered: rendered.into(),
        }
    }

    fn at(message: impl Into<String>, node: &Template) -> Self {
        Self::new(
            message,
            serde_json::to_string(node).unwrap_or_else(|_| format!("{:?}", node)),
        )
    }
}

/// The values a template can reach.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub feature: &'a Value,
    pub job: &'a Value,
    pub maps: &'a MapsStore,
}

impl<'a> TemplateContext<'a> {
    pub fn new(feature: &'a Value, job: &'a Value, maps: &'a MapsStore) -> Self {
        Self { feature, job, maps }
    }

    fn resolve(&self, path: &str) -> Result<Cow<'a, Value>, String> {
        let mut segments = path.split('.');
        let root = segments.next().unwrap_or_default();
        let rest: Vec<&str> = segments.collect();

        match root {
            ROOT_FEATURE => Ok(borrowed_or_null(walk(self.feature, &rest))),
            ROOT_JOB => Ok(borrowed_or_null(walk(self.job, &rest))),
            ROOT_MAPS => match rest.split_first() {
                None => Ok(Cow::Owned(self.maps.to_value())),
                Some((table, rest)) => Ok(borrowed_or_null(
                    self.maps.table(table).and_then(|t| walk(t, rest)),
                )),
            },
            other => Err(format!("unknown template root '{}' in '{}'", other, path)),
        }
    }
}

/// Check every path in a template refers to a known root.
pub fn validate(template: &Template) -> Result<(), TemplateError> {
    for path in template.field_paths() {
        let root = path.split('.').next().unwrap_or_default();
        if ![ROOT_FEATURE, ROOT_JOB, ROOT_MAPS].contains(&root) {
            return Err(TemplateError::new(
                format!("unknown template root '{}'", root),
                path,
            ));
        }
        if path.split('.').any(str::is_empty) {
            return Err(TemplateError::new("empty path segment", path));
        }
    }
    Ok(())
}

/// Evaluate a template to a JSON value.
pub fn evaluate<'a>(
    template: &'a Template,
    ctx: &TemplateContext<'a>,
) -> Result<Cow<'a, Value>, TemplateError> {
    match template {
        Template::Literal(value) => Ok(Cow::Borrowed(value)),

        Template::Field(path) => ctx
            .resolve(path)
            .map_err(|message| TemplateError::at(message, template)),

        Template::Concat(parts) => {
            let mut out = String::new();
            for part in parts {
                append_text(&mut out, &evaluate(part, ctx)?);
            }
            Ok(Cow::Owned(Value::String(out)))
        }

        Template::If {
            condition,
            then,
            otherwise,
        } => {
            if is_truthy(&evaluate(condition, ctx)?) {
                evaluate(then, ctx)
            } else {
                match otherwise {
                    Some(otherwise) => evaluate(otherwise, ctx),
                    None => Ok(Cow::Owned(Value::Null)),
                }
            }
        }

        Template::Compare { left, op, right } => {
            let equal = values_equal(&evaluate(left, ctx)?, &evaluate(right, ctx)?);
            let result = match op {
                CompareOp::Eq => equal,
                CompareOp::Ne => !equal,
            };
            Ok(Cow::Owned(Value::Bool(result)))
        }

        Template::All(parts) => {
            for part in parts {
                if !is_truthy(&evaluate(part, ctx)?) {
                    return Ok(Cow::Owned(Value::Bool(false)));
                }
            }
            Ok(Cow::Owned(Value::Bool(true)))
        }

        Template::Lookup { path, within } => {
            let path = match evaluate(path, ctx)?.as_ref() {
                Value::Null => return Ok(Cow::Owned(Value::Null)),
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                other => {
                    return Err(TemplateError::new(
                        "lookup path must be a string",
                        other.to_string(),
                    ))
                }
            };
            let segments: Vec<&str> = path.split('.').collect();
            Ok(match evaluate(within, ctx)? {
                Cow::Borrowed(within) => borrowed_or_null(walk(within, &segments)),
                Cow::Owned(within) => {
                    Cow::Owned(walk(&within, &segments).cloned().unwrap_or(Value::Null))
                }
            })
        }

        Template::Replace { input, find, with } => {
            let input = evaluate(input, ctx)?;
            let text = match input.as_ref() {
                Value::Null => return Ok(Cow::Owned(Value::Null)),
                Value::String(s) => Cow::Borrowed(s.as_str()),
                other => Cow::Owned(text_of(other)),
            };
            if find.is_empty() {
                return Ok(Cow::Owned(Value::String(text.into_owned())));
            }
            Ok(Cow::Owned(Value::String(text.replace(find.as_str(), with))))
        }

        Template::Default { value, fallback } => {
            let value = evaluate(value, ctx)?;
            if value.is_null() {
                evaluate(fallback, ctx)
            } else {
                Ok(value)
            }
        }

        Template::Object(entries) => {
            let mut object = Map::with_capacity(entries.len());
            for entry in entries {
                if let Some(when) = &entry.when {
                    if !is_truthy(&evaluate(when, ctx)?) {
                        continue;
                    }
                }
                let key = match &entry.key {
                    EntryKey::Fixed(key) => key.clone(),
                    EntryKey::Computed(key_template) => {
                        match evaluate(key_template, ctx)?.as_ref() {
                            Value::String(s) => s.clone(),
                            Value::Number(n) => n.to_string(),
                            other => {
                                return Err(TemplateError::new(
                                    format!("computed object key evaluated to {}", other),
                                    Value::Object(object).to_string(),
                                ))
                            }
                        }
                    }
                };
                let value = evaluate(&entry.value, ctx)?.into_owned();
                object.insert(key, value);
            }
            Ok(Cow::Owned(Value::Object(object)))
        }

        Template::Array(items) => {
            let values = items
                .iter()
                .map(|item| evaluate(item, ctx).map(Cow::into_owned))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Cow::Owned(Value::Array(values)))
        }
    }
}

/// Evaluate a template that must produce an object, or nothing.
///
/// `null` means "no output for this feature"; anything else that is not an
/// object is a configuration error.
pub fn evaluate_object(
    template: &Template,
    ctx: &TemplateContext<'_>,
) -> Result<Option<Map<String, Value>>, TemplateError> {
    match evaluate(template, ctx)?.into_owned() {
        Value::Object(map) => Ok(Some(map)),
        Value::Null => Ok(None),
        other => Err(TemplateError::new(
            "template must evaluate to an object",
            other.to_string(),
        )),
    }
}

/// The document identifier: the body's `id`, or `Id`.
pub fn document_id(body: &Map<String, Value>) -> Option<String> {
    match body.get("id").or_else(|| body.get("Id"))? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Truthiness: `null`, `false`, `0`, `""` and `[]` are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn walk<'v>(mut value: &'v Value, segments: &[&str]) -> Option<&'v Value> {
    for segment in segments {
        value = match value {
            Value::Object(map) => map.get(*segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(value)
}

fn borrowed_or_null(value: Option<&Value>) -> Cow<'_, Value> {
    match value {
        Some(value) => Cow::Borrowed(value),
        None => Cow::Owned(Value::Null),
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn append_text(out: &mut String, value: &Value) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push_str(s),
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_indexer_shared::TemplateEntry;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn eval(template: &Template, feature: &Value, maps: &MapsStore) -> Value {
        let job = json!({"type": "test"});
        let ctx = TemplateContext::new(feature, &job, maps);
        evaluate(template, &ctx).unwrap().into_owned()
    }

    #[test]
    fn test_lookup_into_earlier_job_maps() {
        let mut maps = MapsStore::new();
        maps.merge("ward", object(json!({"E05000001": "Some Ward"})));

        let template = Template::object(vec![
            TemplateEntry::fixed("id", Template::field("feature.attributes.pcds")),
            TemplateEntry::fixed(
                "ward",
                Template::lookup(
                    Template::field("feature.attributes.osward"),
                    Template::field("maps.ward"),
                ),
            ),
            TemplateEntry::fixed(
                "other_ward",
                Template::lookup(
                    Template::field("feature.attributes.missing"),
                    Template::field("maps.ward"),
                ),
            ),
            TemplateEntry::fixed(
                "unknown_ward",
                Template::lookup(Template::literal("E05999999"), Template::field("maps.ward")),
            ),
        ]);

        let feature = json!({"attributes": {"pcds": "AB1 0AA", "osward": "E05000001"}});
        let body = eval(&template, &feature, &maps);

        assert_eq!(body["ward"], json!("Some Ward"));
        assert_eq!(body.get("other_ward"), Some(&Value::Null));
        assert_eq!(body.get("unknown_ward"), Some(&Value::Null));
    }

    #[test]
    fn test_chained_lookup_through_two_tables() {
        let mut maps = MapsStore::new();
        maps.merge(
            "county-lookup",
            object(json!({"ward": {"E05000001": {"districtCode": "E07000001"}}})),
        );
        maps.merge(
            "nuts-lookup",
            object(json!({"district": {"E07000001": {"nuts3Name": "Kent"}}})),
        );

        let district_code = Template::lookup(
            Template::concat(vec![
                Template::field("feature.attributes.wd17cd"),
                Template::literal(".districtCode"),
            ]),
            Template::field("maps.county-lookup.ward"),
        );
        let nuts = Template::lookup(
            Template::concat(vec![district_code, Template::literal(".nuts3Name")]),
            Template::field("maps.nuts-lookup.district"),
        );

        let feature = json!({"attributes": {"wd17cd": "E05000001"}});
        assert_eq!(eval(&nuts, &feature, &maps), json!("Kent"));
    }

    #[test]
    fn test_conditional_display_name() {
        let district = Template::replace(Template::field("feature.attributes.lad15nm"), "City of ", "");
        let display = Template::concat(vec![
            Template::field("feature.attributes.place15nm"),
            Template::when(
                Template::compare(
                    Template::field("feature.attributes.place15nm"),
                    CompareOp::Ne,
                    district.clone(),
                ),
                Template::concat(vec![Template::literal(", "), district]),
                None,
            ),
        ]);
        let maps = MapsStore::new();

        let same = json!({"attributes": {"place15nm": "Leeds", "lad15nm": "City of Leeds"}});
        assert_eq!(eval(&display, &same, &maps), json!("Leeds"));

        let different = json!({"attributes": {"place15nm": "Otley", "lad15nm": "City of Leeds"}});
        assert_eq!(eval(&display, &different, &maps), json!("Otley, Leeds"));
    }

    #[test]
    fn test_guarded_computed_keys() {
        let template = Template::object(vec![
            TemplateEntry::computed(
                Template::field("feature.attributes.pcon15cd"),
                Template::field("feature.attributes.pcon15nm"),
            )
            .when(Template::All(vec![
                Template::field("feature.attributes.pcon15cd"),
                Template::field("feature.attributes.pcon15nm"),
            ])),
        ]);
        let maps = MapsStore::new();

        let with = json!({"attributes": {"pcon15cd": "E14000530", "pcon15nm": "Aldershot"}});
        assert_eq!(eval(&template, &with, &maps), json!({"E14000530": "Aldershot"}));

        let without = json!({"attributes": {"pcon15cd": "E14000530", "pcon15nm": ""}});
        assert_eq!(eval(&template, &without, &maps), json!({}));
    }

    #[test]
    fn test_null_computed_key_is_an_error() {
        let template = Template::object(vec![TemplateEntry::computed(
            Template::field("feature.attributes.missing"),
            Template::literal(1),
        )]);
        let feature = json!({"attributes": {}});
        let job = json!({});
        let maps = MapsStore::new();
        let ctx = TemplateContext::new(&feature, &job, &maps);

        let err = evaluate(&template, &ctx).unwrap_err();
        assert!(err.message.contains("computed object key"));
    }

    #[test]
    fn test_default_and_job_root() {
        let template = Template::object(vec![
            TemplateEntry::fixed("type", Template::field("job.type")),
            TemplateEntry::fixed(
                "country",
                Template::or_default(
                    Template::field("feature.properties.ctry"),
                    Template::literal("England"),
                ),
            ),
        ]);
        let feature = json!({"properties": {}});
        assert_eq!(
            eval(&template, &feature, &MapsStore::new()),
            json!({"type": "test", "country": "England"})
        );
    }

    #[test]
    fn test_numbers_compare_by_value() {
        let template = Template::compare(Template::literal(1), CompareOp::Eq, Template::literal(1.0));
        assert_eq!(eval(&template, &json!({}), &MapsStore::new()), json!(true));
    }

    #[test]
    fn test_validate_rejects_unknown_root() {
        let template = Template::concat(vec![Template::field("feat.attributes.x")]);
        assert!(validate(&template).is_err());
        assert!(validate(&Template::field("feature.attributes.x")).is_ok());
        assert!(validate(&Template::field("feature..x")).is_err());
    }

    #[test]
    fn test_evaluate_object_rejects_scalars() {
        let feature = json!({});
        let job = json!({});
        let maps = MapsStore::new();
        let ctx = TemplateContext::new(&feature, &job, &maps);

        let err = evaluate_object(&Template::literal("x"), &ctx).unwrap_err();
        assert_eq!(err.rendered, "\"x\"");
        assert_eq!(evaluate_object(&Template::literal(Value::Null), &ctx), Ok(None));
    }

    #[test]
    fn test_document_id_accepts_either_case() {
        assert_eq!(document_id(&object(json!({"id": "E05000001"}))), Some("E05000001".to_string()));
        assert_eq!(document_id(&object(json!({"Id": 42}))), Some("42".to_string()));
        assert_eq!(document_id(&object(json!({"id": null}))), None);
        assert_eq!(document_id(&object(json!({"place": "x"}))), None);
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!([])));
        assert!(is_truthy(&json!("0")));
        assert!(is_truthy(&json!({})));
    }
}
