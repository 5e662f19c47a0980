//! Best-effort resolution of nameless reference stubs.
//!
//! A stub is any object inside the main collection with a canonical `id` and
//! no populated name field. Names are copied from the first node carrying the
//! same id in the secondary collections, scanned in filter order.

use std::collections::HashMap;

use factsheet_core_types::{has_name, is_canonical_id, EntityCollection, EntityType, NAME_FIELDS};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::visitor::{to_pointer, walk, Segment, Visitor, DEFAULT_MAX_DEPTH};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Nesting cap when searching entities for stubs.
    pub max_depth: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Counters published after each resolution pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionReport {
    /// Objects carrying a canonical id.
    pub total: usize,
    pub needs_resolution: usize,
    pub resolved: usize,
    pub unresolved: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct StubLocation {
    edge: usize,
    pointer: String,
}

#[derive(Default)]
struct StubFinder {
    total: usize,
    stubs: Vec<(String, String)>,
}

impl Visitor for StubFinder {
    fn visit_object(&mut self, path: &[Segment], object: &Map<String, Value>) {
        let Some(id) = object.get("id").and_then(Value::as_str) else {
            return;
        };
        if !is_canonical_id(id) {
            return;
        }
        self.total += 1;
        let named = NAME_FIELDS.iter().any(|field| {
            object
                .get(*field)
                .and_then(Value::as_str)
                .is_some_and(|value| !value.trim().is_empty())
        });
        if !named {
            self.stubs.push((id.to_string(), to_pointer(path)));
        }
    }
}

pub struct ReferenceResolver {
    config: ResolverConfig,
}

impl ReferenceResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    /// Resolves stubs in `main` in place. Running it twice changes nothing
    /// the first run did not.
    pub fn resolve(
        &self,
        main: &mut EntityCollection,
        more: &[(EntityType, EntityCollection)],
    ) -> ResolutionReport {
        let mut report = ResolutionReport::default();
        let mut outstanding: HashMap<String, Vec<StubLocation>> = HashMap::new();

        for (index, edge) in main.iter().enumerate() {
            let mut finder = StubFinder::default();
            let stats = walk(&edge.0, self.config.max_depth, &mut finder);
            if stats.truncated > 0 {
                warn!(
                    target: "resolve",
                    edge = index,
                    truncated = stats.truncated,
                    "entity nesting exceeds depth cap"
                );
            }
            report.total += finder.total;
            for (id, pointer) in finder.stubs {
                report.needs_resolution += 1;
                outstanding.entry(id).or_default().push(StubLocation {
                    edge: index,
                    pointer,
                });
            }
        }

        for (entity_type, collection) in more {
            if outstanding.is_empty() {
                break;
            }
            let mut hits = 0;
            for edge in collection.iter() {
                let (Some(id), Some(node)) = (edge.node_id(), edge.node()) else {
                    continue;
                };
                if !has_name(node) {
                    continue;
                }
                let Some(locations) = outstanding.remove(id) else {
                    continue;
                };
                for location in &locations {
                    if copy_names(main, location, node) {
                        report.resolved += 1;
                    }
                }
                hits += 1;
            }
            debug!(target: "resolve", %entity_type, hits, "secondary collection scanned");
        }

        report.unresolved = report.needs_resolution - report.resolved;
        info!(
            target: "resolve",
            total = report.total,
            needs_resolution = report.needs_resolution,
            resolved = report.resolved,
            unresolved = report.unresolved,
            "reference resolution finished"
        );
        report
    }
}

fn copy_names(main: &mut EntityCollection, location: &StubLocation, source: &Value) -> bool {
    let Some(target) = main
        .0
        .get_mut(location.edge)
        .and_then(|edge| edge.0.pointer_mut(&location.pointer))
        .and_then(Value::as_object_mut)
    else {
        return false;
    };
    for field in NAME_FIELDS {
        if let Some(value) = source.get(field).filter(|value| value.is_string()) {
            target.insert(field.to_string(), value.clone());
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use factsheet_core_types::Edge;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const APP: &str = "11111111-1111-1111-1111-111111111111";
    const CAP: &str = "22222222-2222-2222-2222-222222222222";
    const ORPHAN: &str = "33333333-3333-3333-3333-333333333333";

    fn main_collection() -> EntityCollection {
        EntityCollection::new(vec![Edge::from_node(json!({
            "id": APP,
            "name": "CRM",
            "relApplicationToBusinessCapability": {
                "edges": [
                    {"node": {"factSheet": {"id": CAP}}},
                    {"node": {"factSheet": {"id": ORPHAN, "name": ""}}}
                ]
            }
        }))])
    }

    fn capabilities() -> Vec<(EntityType, EntityCollection)> {
        vec![(
            EntityType::from("BusinessCapability"),
            EntityCollection::new(vec![Edge::from_node(json!({
                "id": CAP,
                "name": "Finance Capability",
                "displayName": "Finance Capability"
            }))]),
        )]
    }

    #[test]
    fn stubs_take_names_from_secondary_collections() {
        let resolver = ReferenceResolver::new(ResolverConfig::default());
        let mut main = main_collection();
        let report = resolver.resolve(&mut main, &capabilities());

        assert_eq!(
            report,
            ResolutionReport {
                total: 3,
                needs_resolution: 2,
                resolved: 1,
                unresolved: 1
            }
        );
        let resolved = main.0[0]
            .0
            .pointer("/node/relApplicationToBusinessCapability/edges/0/node/factSheet")
            .cloned();
        assert_eq!(
            resolved,
            Some(json!({"id": CAP, "name": "Finance Capability", "displayName": "Finance Capability"}))
        );
    }

    #[test]
    fn resolution_is_idempotent() {
        let resolver = ReferenceResolver::new(ResolverConfig::default());
        let mut once = main_collection();
        resolver.resolve(&mut once, &capabilities());
        let mut twice = once.clone();
        let second = resolver.resolve(&mut twice, &capabilities());

        assert_eq!(once, twice);
        assert_eq!(second.resolved, 0);
        assert_eq!(second.unresolved, 1);
    }

    #[test]
    fn non_canonical_ids_are_not_stubs() {
        let resolver = ReferenceResolver::new(ResolverConfig::default());
        let mut main = EntityCollection::new(vec![Edge::from_node(json!({"id": "1", "ref": {"id": "2"}}))]);
        let report = resolver.resolve(&mut main, &[]);
        assert_eq!(report, ResolutionReport::default());
    }

    #[test]
    fn unnamed_secondary_nodes_do_not_resolve() {
        let resolver = ReferenceResolver::new(ResolverConfig::default());
        let mut main = main_collection();
        let more = vec![(
            EntityType::from("BusinessCapability"),
            EntityCollection::new(vec![Edge::from_node(json!({"id": CAP}))]),
        )];
        let report = resolver.resolve(&mut main, &more);
        assert_eq!(report.resolved, 0);
        assert_eq!(report.unresolved, 2);
    }
}
