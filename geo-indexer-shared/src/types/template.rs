//! Typed template expressions.
//!
//! A job's document and maps templates are small expression trees read from
//! the job file. They are evaluated against a context with three roots:
//! `feature` (the raw record), `job` (the job descriptor) and `maps` (the
//! cross-reference tables built so far).
//!
//! In the job file each node is a single-key object:
//!
//! ```json
//! {"object": [
//!   {"key": "id", "value": {"field": "feature.attributes.wd17cd"}},
//!   {"key": "district", "value": {"lookup": {
//!       "path": {"concat": [{"field": "feature.attributes.wd17cd"}, {"literal": ".districtName"}]},
//!       "within": {"field": "maps.county-lookup.ward"}
//!   }}}
//! ]}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operator for [`Template::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

/// One node of a template expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    /// A constant JSON value.
    Literal(Value),
    /// A dotted path into the context, e.g. `feature.properties.lad18cd`.
    /// Resolves to `null` when any segment is missing.
    Field(String),
    /// String concatenation of every operand; `null` contributes nothing.
    Concat(Vec<Template>),
    /// Conditional inclusion.
    If {
        condition: Box<Template>,
        then: Box<Template>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        otherwise: Option<Box<Template>>,
    },
    /// Equality or inequality of two operands, yielding a boolean.
    Compare {
        left: Box<Template>,
        op: CompareOp,
        right: Box<Template>,
    },
    /// True when every operand is truthy.
    All(Vec<Template>),
    /// Look up the dotted path produced by `path` inside the value produced
    /// by `within`. Used to chain lookups through the maps tables.
    Lookup {
        path: Box<Template>,
        within: Box<Template>,
    },
    /// Replace every occurrence of `find` in the string operand.
    Replace {
        input: Box<Template>,
        find: String,
        with: String,
    },
    /// `value`, or `fallback` when `value` is null.
    Default {
        value: Box<Template>,
        fallback: Box<Template>,
    },
    /// A JSON object built from entries, in order.
    Object(Vec<TemplateEntry>),
    /// A JSON array.
    Array(Vec<Template>),
}

/// Object key: either a fixed name or an expression evaluated per feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryKey {
    Fixed(String),
    Computed(Template),
}

/// One entry of a [`Template::Object`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateEntry {
    pub key: EntryKey,
    pub value: Template,
    /// The entry is only emitted when this condition is truthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Template>,
}

impl TemplateEntry {
    pub fn fixed(key: impl Into<String>, value: Template) -> Self {
        Self {
            key: EntryKey::Fixed(key.into()),
            value,
            when: None,
        }
    }

    pub fn computed(key: Template, value: Template) -> Self {
        Self {
            key: EntryKey::Computed(key),
            value,
            when: None,
        }
    }

    pub fn when(mut self, condition: Template) -> Self {
        self.when = Some(condition);
        self
    }
}

impl Template {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn field(path: impl Into<String>) -> Self {
        Self::Field(path.into())
    }

    pub fn concat(parts: Vec<Template>) -> Self {
        Self::Concat(parts)
    }

    pub fn lookup(path: Template, within: Template) -> Self {
        Self::Lookup {
            path: Box::new(path),
            within: Box::new(within),
        }
    }

    pub fn compare(left: Template, op: CompareOp, right: Template) -> Self {
        Self::Compare {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn when(condition: Template, then: Template, otherwise: Option<Template>) -> Self {
        Self::If {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: otherwise.map(Box::new),
        }
    }

    pub fn replace(input: Template, find: impl Into<String>, with: impl Into<String>) -> Self {
        Self::Replace {
            input: Box::new(input),
            find: find.into(),
            with: with.into(),
        }
    }

    pub fn or_default(value: Template, fallback: Template) -> Self {
        Self::Default {
            value: Box::new(value),
            fallback: Box::new(fallback),
        }
    }

    pub fn object(entries: Vec<TemplateEntry>) -> Self {
        Self::Object(entries)
    }

    /// Every context path referenced by this template, in tree order.
    pub fn field_paths(&self) -> Vec<&str> {
        let mut paths = Vec::new();
        self.collect_paths(&mut paths);
        paths
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Literal(_) => {}
            Self::Field(path) => out.push(path),
            Self::Concat(parts) | Self::All(parts) | Self::Array(parts) => {
                parts.iter().for_each(|p| p.collect_paths(out))
            }
            Self::If {
                condition,
                then,
                otherwise,
            } => {
                condition.collect_paths(out);
                then.collect_paths(out);
                if let Some(otherwise) = otherwise {
                    otherwise.collect_paths(out);
                }
            }
            Self::Compare { left, right, .. } => {
                left.collect_paths(out);
                right.collect_paths(out);
            }
            Self::Lookup { path, within } => {
                path.collect_paths(out);
                within.collect_paths(out);
            }
            Self::Replace { input, .. } => input.collect_paths(out),
            Self::Default { value, fallback } => {
                value.collect_paths(out);
                fallback.collect_paths(out);
            }
            Self::Object(entries) => {
                for entry in entries {
                    if let EntryKey::Computed(key) = &entry.key {
                        key.collect_paths(out);
                    }
                    entry.value.collect_paths(out);
                    if let Some(when) = &entry.when {
                        when.collect_paths(out);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_nested_template() {
        let template: Template = serde_json::from_value(json!({
            "object": [
                {"key": "id", "value": {"field": "feature.attributes.pcds"}},
                {
                    "key": {"field": "feature.attributes.pcon15cd"},
                    "value": {"field": "feature.attributes.pcon15nm"},
                    "when": {"all": [{"field": "feature.attributes.pcon15cd"}]}
                },
                {"key": "country", "value": {"if": {
                    "condition": {"compare": {
                        "left": {"field": "feature.attributes.ctry"},
                        "op": "==",
                        "right": {"literal": "S92000003"}
                    }},
                    "then": {"literal": "Scotland"}
                }}}
            ]
        }))
        .unwrap();

        let Template::Object(entries) = &template else {
            panic!("expected object template");
        };
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].key, EntryKey::Fixed("id".to_string()));
        assert!(matches!(entries[1].key, EntryKey::Computed(Template::Field(_))));
        assert!(entries[1].when.is_some());
    }

    #[test]
    fn test_field_paths() {
        let template = Template::object(vec![
            TemplateEntry::fixed("id", Template::field("feature.attributes.wd17cd")),
            TemplateEntry::fixed(
                "district",
                Template::lookup(
                    Template::field("feature.attributes.wd17cd"),
                    Template::field("maps.ward"),
                ),
            ),
        ]);

        assert_eq!(
            template.field_paths(),
            vec![
                "feature.attributes.wd17cd",
                "feature.attributes.wd17cd",
                "maps.ward"
            ]
        );
    }

    #[test]
    fn test_serialize_round_trips_through_job_file_shape() {
        let template = Template::replace(Template::field("feature.properties.lad15nm"), "City of ", "");
        let value = serde_json::to_value(&template).unwrap();
        assert_eq!(
            value,
            json!({"replace": {"input": {"field": "feature.properties.lad15nm"}, "find": "City of ", "with": ""}})
        );
    }
}
