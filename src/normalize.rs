//! Rewrites raw graph edge lists into the canonical entity document.
//!
//! * every `edges` list becomes `{"Entities": [{"Entity": node}, ...]}`
//! * `rel<Source>To<Target>` keys become `RelationsTo<Target>`
//! * inside a relation, `edges` becomes `{"Relations": [{"RelationTo": node}]}`
//!   and the relation node's own `id` is dropped
//!
//! The transform is pure: no I/O, no shared state.

use factsheet_core_types::{display_name, EntityCollection};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::visitor::DEFAULT_MAX_DEPTH;

static RELATION_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^rel([A-Z][A-Za-z0-9]*?)To([A-Z][A-Za-z0-9]*)$").expect("relation key pattern")
});

/// Canonical name for a relation key, or `None` for ordinary attributes.
pub fn relation_key(key: &str) -> Option<String> {
    match key {
        "relToParent" => return Some("RelationToParent".to_string()),
        "relToChild" => return Some("RelationToChild".to_string()),
        _ => {}
    }
    RELATION_KEY
        .captures(key)
        .and_then(|captures| captures.get(2))
        .map(|target| format!("RelationsTo{}", target.as_str()))
}

/// Normalized report graph: one `{"Entity": ...}` wrapper per top-level edge.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedDocument(pub Vec<Value>);

impl NormalizedDocument {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn entities(&self) -> impl Iterator<Item = &Value> {
        self.0.iter().filter_map(|wrapper| wrapper.get("Entity"))
    }

    pub fn entity(&self, id: &str) -> Option<&Value> {
        self.entities()
            .find(|entity| entity.get("id").and_then(Value::as_str) == Some(id))
    }

    pub fn display_name(&self, id: &str) -> Option<&str> {
        self.entity(id).and_then(display_name)
    }
}

pub struct GraphNormalizer {
    max_depth: usize,
}

impl Default for GraphNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl GraphNormalizer {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn normalize(&self, collection: &EntityCollection) -> NormalizedDocument {
        let mut truncated = 0;
        let entities = collection
            .iter()
            .map(|edge| {
                let node = edge.node().unwrap_or(&edge.0);
                entity_wrapper(self.rewrite(node, 0, &mut truncated))
            })
            .collect();
        if truncated > 0 {
            warn!(
                target: "normalize",
                truncated,
                max_depth = self.max_depth,
                "subtrees beyond depth cap copied verbatim"
            );
        }
        NormalizedDocument(entities)
    }

    fn rewrite(&self, value: &Value, depth: usize, truncated: &mut usize) -> Value {
        if depth > self.max_depth && (value.is_object() || value.is_array()) {
            *truncated += 1;
            return value.clone();
        }
        match value {
            Value::Object(object) => {
                let mut out = Map::with_capacity(object.len());
                for (key, child) in object {
                    if key == "edges" {
                        if let Some(edges) = child.as_array() {
                            out.insert("Entities".to_string(), self.entities(edges, depth, truncated));
                            continue;
                        }
                    }
                    if let (Some(name), Some(relation)) = (relation_key(key), child.as_object()) {
                        let relation = self.relation(relation, depth + 1, truncated);
                        insert_relation(&mut out, name, relation);
                        continue;
                    }
                    out.insert(key.clone(), self.rewrite(child, depth + 1, truncated));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.rewrite(item, depth + 1, truncated))
                    .collect(),
            ),
            scalar => scalar.clone(),
        }
    }

    fn entities(&self, edges: &[Value], depth: usize, truncated: &mut usize) -> Value {
        Value::Array(
            edges
                .iter()
                .map(|edge| {
                    let node = edge.get("node").unwrap_or(edge);
                    entity_wrapper(self.rewrite(node, depth + 1, truncated))
                })
                .collect(),
        )
    }

    fn relation(&self, relation: &Map<String, Value>, depth: usize, truncated: &mut usize) -> Value {
        let mut out = Map::with_capacity(relation.len());
        for (key, child) in relation {
            match (key.as_str(), child.as_array()) {
                ("edges", Some(edges)) => {
                    let relations = edges
                        .iter()
                        .map(|edge| {
                            let node = edge.get("node").unwrap_or(edge);
                            let mut target = self.rewrite(node, depth + 1, truncated);
                            if let Some(object) = target.as_object_mut() {
                                object.remove("id");
                            }
                            let mut wrapper = Map::new();
                            wrapper.insert("RelationTo".to_string(), target);
                            Value::Object(wrapper)
                        })
                        .collect();
                    out.insert("Relations".to_string(), Value::Array(relations));
                }
                _ => {
                    out.insert(key.clone(), self.rewrite(child, depth + 1, truncated));
                }
            }
        }
        Value::Object(out)
    }
}

/// Several source keys can share one target (`relProviderApplicationToInterface`
/// and `relConsumerApplicationToInterface`); their relation lists are concatenated.
fn insert_relation(out: &mut Map<String, Value>, name: String, relation: Value) {
    let Some(existing) = out.get_mut(&name).and_then(Value::as_object_mut) else {
        out.insert(name, relation);
        return;
    };
    let Value::Object(incoming) = relation else {
        return;
    };
    for (key, value) in incoming {
        if !existing.contains_key(&key) {
            existing.insert(key, value);
            continue;
        }
        if key == "Relations" {
            if let (Some(Value::Array(current)), Value::Array(more)) = (existing.get_mut(&key), value) {
                current.extend(more);
            }
        }
    }
}

fn entity_wrapper(entity: Value) -> Value {
    let mut wrapper = Map::new();
    wrapper.insert("Entity".to_string(), entity);
    Value::Object(wrapper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use factsheet_core_types::Edge;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn normalize(edges: Value) -> Value {
        let collection = EntityCollection::from_edge_list(&edges).expect("edge list");
        serde_json::to_value(GraphNormalizer::default().normalize(&collection)).expect("serialize")
    }

    #[test]
    fn relation_keys_are_renamed() {
        assert_eq!(
            relation_key("relApplicationToBusinessCapability").as_deref(),
            Some("RelationsToBusinessCapability")
        );
        assert_eq!(
            relation_key("relProviderApplicationToITComponent").as_deref(),
            Some("RelationsToITComponent")
        );
        assert_eq!(relation_key("relToParent").as_deref(), Some("RelationToParent"));
        assert_eq!(relation_key("relToChild").as_deref(), Some("RelationToChild"));
        assert_eq!(relation_key("relation"), None);
        assert_eq!(relation_key("release"), None);
        assert_eq!(relation_key("relapplicationToX"), None);
    }

    #[test]
    fn relation_edges_become_relation_targets() {
        let normalized = normalize(json!([
            {"node": {"id": "1", "relApplicationToBusinessCapability": {"edges": [{"node": {"id": "2"}}]}}}
        ]));
        assert_eq!(
            normalized,
            json!([
                {"Entity": {"id": "1", "RelationsToBusinessCapability": {"Relations": [{"RelationTo": {}}]}}}
            ])
        );
    }

    #[test]
    fn relations_sharing_a_target_are_concatenated() {
        let normalized = normalize(json!([{"node": {
            "id": "1",
            "relProviderApplicationToInterface": {"edges": [
                {"node": {"id": "r1", "factSheet": {"id": "p", "name": "Provided API"}}}
            ]},
            "relConsumerApplicationToInterface": {"edges": [
                {"node": {"id": "r2", "factSheet": {"id": "c", "name": "Consumed API"}}}
            ]}
        }}]));
        assert_eq!(
            normalized,
            json!([{"Entity": {
                "id": "1",
                "RelationsToInterface": {"Relations": [
                    {"RelationTo": {"factSheet": {"id": "c", "name": "Consumed API"}}},
                    {"RelationTo": {"factSheet": {"id": "p", "name": "Provided API"}}}
                ]}
            }}])
        );
    }

    #[test]
    fn nested_edges_become_entities() {
        let normalized = normalize(json!([
            {"node": {
                "id": "1",
                "subscriptions": {"edges": [{"node": {"id": "s1", "type": "RESPONSIBLE"}}]},
                "relToParent": {"edges": [{"node": {"id": "r", "factSheet": {"id": "p", "name": "Parent"}}}]},
                "tags": [{"name": "core"}]
            }}
        ]));
        assert_eq!(
            normalized,
            json!([{"Entity": {
                "id": "1",
                "subscriptions": {"Entities": [{"Entity": {"id": "s1", "type": "RESPONSIBLE"}}]},
                "RelationToParent": {"Relations": [{"RelationTo": {"factSheet": {"id": "p", "name": "Parent"}}}]},
                "tags": [{"name": "core"}]
            }}])
        );
    }

    #[test]
    fn depth_cap_copies_remaining_subtree() {
        let collection = EntityCollection::new(vec![Edge::from_node(json!({
            "id": "1",
            "deep": {"edges": [{"node": {"id": "2"}}]}
        }))]);
        let document = GraphNormalizer::new(0).normalize(&collection);
        assert_eq!(
            document.0[0],
            json!({"Entity": {"id": "1", "deep": {"edges": [{"node": {"id": "2"}}]}}})
        );
    }

    #[test]
    fn document_lookup_by_id() {
        let collection = EntityCollection::new(vec![Edge::from_node(json!({"id": "1", "displayName": "CRM"}))]);
        let document = GraphNormalizer::default().normalize(&collection);
        assert_eq!(document.len(), 1);
        assert_eq!(document.display_name("1"), Some("CRM"));
        assert!(document.entity("2").is_none());
    }
}
