//! Metadata collaborator: localized labels for the fields a report displays.
//!
//! The model-schema endpoint answers a tree of sections, subsections and
//! fields. Fields are found by key anywhere in that tree; enumerated values
//! come either as a `values` list or a `valueTranslations` map.

use std::collections::BTreeMap;

use factsheet_core_types::EntityType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

use crate::errors::{LensError, LensResult};
use crate::report::{FieldTranslation, ReportDescriptor, ValueTranslation};
use crate::transport::ReportTransport;
use crate::visitor::{walk, Segment, Visitor, DEFAULT_MAX_DEPTH};

pub const ENTITY_TYPE_PLACEHOLDER: &str = "{entityType}";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub enabled: bool,
    /// Path on the report's origin; `{entityType}` is substituted.
    pub path_template: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path_template: "/services/pathfinder/v1/models/dataModel/factSheets/{entityType}"
                .to_string(),
        }
    }
}

impl MetadataConfig {
    /// Model-schema URL for `entity_type` on the same origin as `report_url`.
    pub fn schema_url(&self, report_url: &str, entity_type: &EntityType) -> LensResult<String> {
        let base = Url::parse(report_url)
            .map_err(|err| LensError::transport(report_url, format!("invalid report URL: {err}")))?;
        let path = self
            .path_template
            .replace(ENTITY_TYPE_PLACEHOLDER, entity_type.as_str());
        base.join(&path)
            .map(String::from)
            .map_err(|err| LensError::Config(format!("invalid metadata path '{path}': {err}")))
    }
}

struct FieldFinder<'a> {
    wanted: &'a [&'a str],
    found: BTreeMap<String, FieldTranslation>,
}

impl Visitor for FieldFinder<'_> {
    fn visit_object(&mut self, path: &[Segment], object: &Map<String, Value>) {
        let in_field_list = matches!(
            path,
            [.., Segment::Key(list), Segment::Index(_)] if list == "fields"
        );
        if !in_field_list {
            return;
        }
        let Some(key) = object.get("key").and_then(Value::as_str) else {
            return;
        };
        if self.wanted.contains(&key) && !self.found.contains_key(key) {
            self.found.insert(key.to_string(), field_translation(object));
        }
    }
}

fn text(object: &Map<String, Value>, field: &str) -> Option<String> {
    object.get(field).and_then(Value::as_str).map(str::to_string)
}

fn value_translation(object: &Map<String, Value>) -> ValueTranslation {
    ValueTranslation {
        label: text(object, "label").unwrap_or_default(),
        help_text: text(object, "helpText"),
    }
}

fn field_translation(object: &Map<String, Value>) -> FieldTranslation {
    let mut value_translations = BTreeMap::new();
    if let Some(values) = object.get("values").and_then(Value::as_array) {
        for value in values.iter().filter_map(Value::as_object) {
            if let Some(key) = text(value, "key") {
                value_translations.insert(key, value_translation(value));
            }
        }
    }
    if let Some(map) = object.get("valueTranslations").and_then(Value::as_object) {
        for (key, value) in map {
            if let Some(value) = value.as_object() {
                value_translations.insert(key.clone(), value_translation(value));
            }
        }
    }
    FieldTranslation {
        label: text(object, "label").unwrap_or_default(),
        help_text: text(object, "helpText"),
        value_translations,
    }
}

/// Looks up `fields` by key in a model-schema response.
pub fn extract_field_translations(
    schema: &Value,
    fields: &[&str],
) -> BTreeMap<String, FieldTranslation> {
    let mut finder = FieldFinder {
        wanted: fields,
        found: BTreeMap::new(),
    };
    walk(schema, DEFAULT_MAX_DEPTH, &mut finder);
    finder.found
}

/// Fetches translations for the fields `descriptor` references on its main
/// filter. Failures are logged and yield an empty map.
pub async fn fetch_field_translations(
    transport: &dyn ReportTransport,
    config: &MetadataConfig,
    report_url: &str,
    credential: &str,
    descriptor: &ReportDescriptor,
) -> BTreeMap<String, FieldTranslation> {
    if !config.enabled {
        return BTreeMap::new();
    }
    let fields = descriptor.referenced_fields();
    if fields.is_empty() {
        return BTreeMap::new();
    }
    let url = match config.schema_url(report_url, descriptor.main_filter()) {
        Ok(url) => url,
        Err(err) => {
            warn!(target: "metadata", error = %err, "cannot build metadata URL");
            return BTreeMap::new();
        }
    };
    match transport.get_json(&url, credential).await {
        Ok(schema) => {
            let translations = extract_field_translations(&schema, &fields);
            debug!(
                target: "metadata",
                entity_type = %descriptor.main_filter(),
                requested = fields.len(),
                found = translations.len(),
                "field translations attached"
            );
            translations
        }
        Err(err) => {
            warn!(target: "metadata", %url, error = %err, "metadata fetch failed");
            BTreeMap::new()
        }
    }
}
