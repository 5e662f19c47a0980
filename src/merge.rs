//! Last-write-wins merge of edge lists keyed by node id.

use std::collections::HashMap;

use factsheet_core_types::{CorrelationKey, EntityCollection, EntityType};
use factsheet_kv_store::{keys, load_json, save_json, KvStore};
use serde::Serialize;
use tracing::debug;

use crate::errors::LensResult;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub added: usize,
    pub replaced: usize,
    /// Edges without a node id; they cannot be keyed and are dropped.
    pub skipped: usize,
}

/// Merges `incoming` into `existing`.
///
/// Ids keep the position of their first appearance; the value is the one seen
/// last. The result never holds two edges with the same node id.
pub fn merge(existing: EntityCollection, incoming: EntityCollection) -> EntityCollection {
    merge_with_stats(existing, incoming).0
}

pub fn merge_with_stats(
    existing: EntityCollection,
    incoming: EntityCollection,
) -> (EntityCollection, MergeStats) {
    let mut stats = MergeStats::default();
    let mut edges = Vec::with_capacity(existing.len() + incoming.len());
    let mut positions: HashMap<String, usize> = HashMap::new();
    let existing_len = existing.len();

    for (index, edge) in existing.into_iter().chain(incoming).enumerate() {
        let from_incoming = index >= existing_len;
        let Some(id) = edge.node_id().map(str::to_string) else {
            stats.skipped += 1;
            debug!(target: "merge", "edge without node id skipped");
            continue;
        };
        match positions.get(&id) {
            Some(&position) => {
                edges[position] = edge;
                if from_incoming {
                    stats.replaced += 1;
                }
            }
            None => {
                positions.insert(id, edges.len());
                edges.push(edge);
                if from_incoming {
                    stats.added += 1;
                }
            }
        }
    }

    (EntityCollection::new(edges), stats)
}

/// Merges a replay response into the persisted collection for
/// `(key, entity_type)` and writes the result back.
pub async fn merge_into_store(
    store: &dyn KvStore,
    key: &CorrelationKey,
    entity_type: &EntityType,
    incoming: EntityCollection,
) -> LensResult<MergeStats> {
    let store_key = keys::edges_key(key, entity_type);
    let existing: EntityCollection = load_json(store, &store_key).await?.unwrap_or_default();
    let (merged, stats) = merge_with_stats(existing, incoming);
    save_json(store, &store_key, &merged).await?;
    debug!(
        target: "merge",
        %key,
        %entity_type,
        total = merged.len(),
        added = stats.added,
        replaced = stats.replaced,
        "collection persisted"
    );
    Ok(stats)
}
