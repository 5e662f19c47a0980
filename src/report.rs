//! Report descriptor parsed from the primary bookmark fetch.

use std::collections::BTreeMap;

use factsheet_core_types::EntityType;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{LensError, LensResult};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportProperties {
    pub left: Option<String>,
    pub right: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueTranslation {
    pub label: String,
    pub help_text: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldTranslation {
    pub label: String,
    pub help_text: Option<String>,
    pub value_translations: BTreeMap<String, ValueTranslation>,
}

/// Immutable once parsed; only the field translations are attached later.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDescriptor {
    id: String,
    name: String,
    view: Option<String>,
    filters: Vec<EntityType>,
    main_filter: EntityType,
    more_filters: Vec<EntityType>,
    properties: ReportProperties,
    field_translations: BTreeMap<String, FieldTranslation>,
}

impl ReportDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        view: Option<String>,
        filters: Vec<EntityType>,
        properties: ReportProperties,
    ) -> LensResult<Self> {
        let (main_filter, more_filters) = match filters.split_first() {
            Some((main, more)) => (main.clone(), more.to_vec()),
            None => {
                return Err(LensError::InvalidReport(
                    "report declares no entity filters".to_string(),
                ))
            }
        };
        Ok(Self {
            id: id.into(),
            name: name.into(),
            view,
            filters,
            main_filter,
            more_filters,
            properties,
            field_translations: BTreeMap::new(),
        })
    }

    /// Parses a bookmark response, either wrapped in `{"data": ...}` or bare.
    pub fn parse(response: &Value) -> LensResult<Self> {
        let data = response
            .get("data")
            .filter(|data| data.is_object())
            .unwrap_or(response);
        let id = data
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| LensError::InvalidReport("missing report id".to_string()))?;
        let name = data.get("name").and_then(Value::as_str).unwrap_or_default();

        let state = data.get("state");
        let custom = state.and_then(|state| state.get("customState"));
        let scopes = [custom, state, Some(data)];

        let view = first_string(&scopes, &["/view"]);
        let filters = scopes
            .iter()
            .flatten()
            .find_map(|scope| scope.get("filters").and_then(Value::as_array))
            .map(|items| items.iter().filter_map(filter_entry).collect())
            .unwrap_or_default();
        let properties = ReportProperties {
            left: first_string(&scopes, &["/leftProperty", "/properties/left"]),
            right: first_string(&scopes, &["/rightProperty", "/properties/right"]),
        };

        Self::new(id, name, view, filters, properties)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn view(&self) -> Option<&str> {
        self.view.as_deref()
    }

    pub fn filters(&self) -> &[EntityType] {
        &self.filters
    }

    pub fn main_filter(&self) -> &EntityType {
        &self.main_filter
    }

    pub fn more_filters(&self) -> &[EntityType] {
        &self.more_filters
    }

    pub fn properties(&self) -> &ReportProperties {
        &self.properties
    }

    pub fn field_translations(&self) -> &BTreeMap<String, FieldTranslation> {
        &self.field_translations
    }

    pub fn attach_field_translations(&mut self, translations: BTreeMap<String, FieldTranslation>) {
        self.field_translations = translations;
    }

    /// Field keys the report displays: view, then left and right properties.
    pub fn referenced_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = Vec::new();
        let candidates = [
            self.view.as_deref(),
            self.properties.left.as_deref(),
            self.properties.right.as_deref(),
        ];
        for field in candidates.into_iter().flatten() {
            if !field.is_empty() && !fields.contains(&field) {
                fields.push(field);
            }
        }
        fields
    }
}

fn first_string(scopes: &[Option<&Value>], pointers: &[&str]) -> Option<String> {
    scopes.iter().flatten().find_map(|scope| {
        pointers.iter().find_map(|pointer| {
            scope
                .pointer(pointer)
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        })
    })
}

fn filter_entry(entry: &Value) -> Option<EntityType> {
    let raw = match entry {
        Value::String(value) => Some(value.as_str()),
        Value::Object(_) => entry
            .get("type")
            .or_else(|| entry.get("factSheetType"))
            .and_then(Value::as_str),
        _ => None,
    }?;
    (!raw.is_empty()).then(|| EntityType::from(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_custom_state_envelope() {
        let response = json!({
            "status": "OK",
            "data": {
                "id": "b1",
                "name": "Capability map",
                "state": {
                    "customState": {
                        "view": "lifecycle",
                        "filters": ["Application", {"type": "BusinessCapability"}, {"factSheetType": "ITComponent"}],
                        "leftProperty": "businessCriticality",
                        "properties": {"right": "technicalSuitability"}
                    }
                }
            }
        });
        let descriptor = ReportDescriptor::parse(&response).expect("descriptor");
        assert_eq!(descriptor.id(), "b1");
        assert_eq!(descriptor.view(), Some("lifecycle"));
        assert_eq!(descriptor.main_filter(), &EntityType::from("Application"));
        assert_eq!(
            descriptor.more_filters(),
            &[EntityType::from("BusinessCapability"), EntityType::from("ITComponent")]
        );
        assert_eq!(descriptor.properties().left.as_deref(), Some("businessCriticality"));
        assert_eq!(descriptor.properties().right.as_deref(), Some("technicalSuitability"));
        assert_eq!(
            descriptor.referenced_fields(),
            vec!["lifecycle", "businessCriticality", "technicalSuitability"]
        );
    }

    #[test]
    fn falls_back_to_plain_state_and_bare_object() {
        let response = json!({
            "id": "b2",
            "state": {"view": "tags", "filters": ["Process"]}
        });
        let descriptor = ReportDescriptor::parse(&response).expect("descriptor");
        assert_eq!(descriptor.name(), "");
        assert_eq!(descriptor.view(), Some("tags"));
        assert!(descriptor.more_filters().is_empty());
    }

    #[test]
    fn missing_filters_or_id_is_rejected() {
        let err = ReportDescriptor::parse(&json!({"data": {"id": "b3", "state": {}}})).unwrap_err();
        assert!(matches!(err, LensError::InvalidReport(_)));
        let err = ReportDescriptor::parse(&json!({"data": {"filters": ["Application"]}})).unwrap_err();
        assert!(matches!(err, LensError::InvalidReport(_)));
    }

    #[test]
    fn serializes_with_derived_filters() {
        let descriptor = ReportDescriptor::new(
            "b4",
            "Report",
            None,
            vec![EntityType::from("Application"), EntityType::from("Project")],
            ReportProperties::default(),
        )
        .expect("descriptor");
        let value = serde_json::to_value(&descriptor).expect("serialize");
        assert_eq!(value["mainFilter"], json!("Application"));
        assert_eq!(value["moreFilters"], json!(["Project"]));
        assert_eq!(value["fieldTranslations"], json!({}));
    }
}
