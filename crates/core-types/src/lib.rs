//! Shared primitives for the factsheet-lens pipeline.
//!
//! Identifiers are thin newtypes over `String` so every map in the pipeline is
//! keyed by something that says what it is. Graph payloads stay as
//! `serde_json::Value` because the host application's schema is open-ended;
//! [`Edge`] and [`EntityCollection`] add the small amount of structure the
//! merger, resolver and normalizer rely on.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Fields that make a node "named" for display and stub resolution, in
/// display priority order.
pub const NAME_FIELDS: [&str; 3] = ["name", "fullName", "displayName"];

/// Length of a canonical hyphenated identifier (`8-4-4-4-12`).
pub const CANONICAL_ID_LEN: usize = 36;

const HYPHEN_POSITIONS: [usize; 4] = [8, 13, 18, 23];

/// Shared error type for the primitive layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("graph payload has no edge list")]
    MissingEdges,
    #[error("edge list entry {index} is not an object")]
    MalformedEdge { index: usize },
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Opaque report/bookmark identifier scoping all per-report state.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(pub String);

impl CorrelationKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Fact-sheet category discriminator, e.g. `Application`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(pub String);

impl EntityType {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityType {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Ordinal occurrence of a graph query for one entity type within a report.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ShardIndex(pub u32);

impl fmt::Display for ShardIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one observed network exchange.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExchangeId(pub String);

impl ExchangeId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns true when `id` is a fixed-length hyphenated hexadecimal identifier.
pub fn is_canonical_id(id: &str) -> bool {
    if id.len() != CANONICAL_ID_LEN {
        return false;
    }
    id.char_indices().all(|(idx, ch)| {
        if HYPHEN_POSITIONS.contains(&idx) {
            ch == '-'
        } else {
            ch.is_ascii_hexdigit()
        }
    })
}

/// Returns the value of `field` when it is a non-empty string.
pub fn populated_str<'a>(object: &'a Value, field: &str) -> Option<&'a str> {
    object
        .get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
}

/// True when at least one of [`NAME_FIELDS`] carries a non-empty string.
pub fn has_name(object: &Value) -> bool {
    NAME_FIELDS
        .iter()
        .any(|field| populated_str(object, field).is_some())
}

/// First populated name field in display priority order.
pub fn display_name(object: &Value) -> Option<&str> {
    NAME_FIELDS
        .iter()
        .find_map(|field| populated_str(object, field))
}

/// One entry of a graph edge list: `{ "node": { "id": ..., ... } }`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Edge(pub Value);

impl Edge {
    pub fn from_node(node: Value) -> Self {
        Self(serde_json::json!({ "node": node }))
    }

    pub fn node(&self) -> Option<&Value> {
        self.0.get("node")
    }

    /// Identity of the wrapped node; edges without one cannot be merged.
    pub fn node_id(&self) -> Option<&str> {
        self.node()
            .and_then(|node| node.get("id"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }
}

/// Ordered edge list scoped to one `(correlation key, entity type)` pair.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityCollection(pub Vec<Edge>);

impl EntityCollection {
    pub fn new(edges: Vec<Edge>) -> Self {
        Self(edges)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Edge> {
        self.0.iter()
    }

    /// Node ids in collection order, skipping edges without one.
    pub fn ids(&self) -> Vec<&str> {
        self.0.iter().filter_map(Edge::node_id).collect()
    }

    /// Builds a collection from a JSON array of edges.
    pub fn from_edge_list(list: &Value) -> CoreResult<Self> {
        let items = list.as_array().ok_or(CoreError::MissingEdges)?;
        let mut edges = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            if !item.is_object() {
                return Err(CoreError::MalformedEdge { index });
            }
            edges.push(Edge(item.clone()));
        }
        Ok(Self(edges))
    }

    /// Extracts the edge list from a graph query response.
    ///
    /// The host answers `{"data": {"allFactSheets": {"edges": [...]}}}`; any
    /// other top-level field under `data` carrying an `edges` array is
    /// accepted as a fallback.
    pub fn from_graphql_response(response: &Value) -> CoreResult<Self> {
        let data = response.get("data").ok_or(CoreError::MissingEdges)?;
        if let Some(edges) = data.pointer("/allFactSheets/edges") {
            return Self::from_edge_list(edges);
        }
        let fallback = data
            .as_object()
            .into_iter()
            .flat_map(|object| object.values())
            .find_map(|value| value.get("edges").filter(|edges| edges.is_array()));
        match fallback {
            Some(edges) => Self::from_edge_list(edges),
            None => Err(CoreError::MissingEdges),
        }
    }
}

impl From<Vec<Edge>> for EntityCollection {
    fn from(edges: Vec<Edge>) -> Self {
        Self(edges)
    }
}

impl IntoIterator for EntityCollection {
    type Item = Edge;
    type IntoIter = std::vec::IntoIter<Edge>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_id_accepts_hyphenated_hex() {
        assert!(is_canonical_id("28fe4aa2-6e46-41a1-a131-72afb3acf256"));
        assert!(is_canonical_id("AAAAAAAA-BBBB-CCCC-DDDD-EEEEEEEEEEEE"));
    }

    #[test]
    fn canonical_id_rejects_other_shapes() {
        assert!(!is_canonical_id("1"));
        assert!(!is_canonical_id("28fe4aa26e4641a1a13172afb3acf256"));
        assert!(!is_canonical_id("28fe4aa2-6e46-41a1-a131-72afb3acf25g"));
        assert!(!is_canonical_id("28fe4aa2_6e46-41a1-a131-72afb3acf256"));
    }

    #[test]
    fn display_name_follows_priority() {
        let node = json!({"displayName": "Shown", "fullName": "Full", "name": ""});
        assert_eq!(display_name(&node), Some("Full"));
        assert!(has_name(&node));
        assert!(!has_name(&json!({"id": "x", "name": "  "})));
    }

    #[test]
    fn graphql_response_prefers_all_fact_sheets() {
        let response = json!({
            "data": {
                "allFactSheets": {"edges": [{"node": {"id": "a"}}], "totalCount": 1}
            }
        });
        let collection = EntityCollection::from_graphql_response(&response).expect("edges");
        assert_eq!(collection.ids(), vec!["a"]);
    }

    #[test]
    fn graphql_response_falls_back_to_any_edge_list() {
        let response = json!({"data": {"view": {"edges": [{"node": {"id": "b"}}]}}});
        let collection = EntityCollection::from_graphql_response(&response).expect("edges");
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn graphql_response_without_edges_is_rejected() {
        let err = EntityCollection::from_graphql_response(&json!({"errors": []})).unwrap_err();
        assert_eq!(err, CoreError::MissingEdges);
        let err = EntityCollection::from_edge_list(&json!([1])).unwrap_err();
        assert_eq!(err, CoreError::MalformedEdge { index: 0 });
    }
}
