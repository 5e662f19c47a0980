//! Request ledger: every graph query observed for a report, in order.
//!
//! Entries are keyed by `(correlation key, entity type, shard index)` and are
//! write-once. Shard indices are assigned here, densely from zero per entity
//! type, so they always reflect observation order. Byte-identical bodies are
//! recorded again on purpose.

use std::collections::{BTreeMap, HashMap};

use factsheet_core_types::{CorrelationKey, EntityType, ShardIndex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{TapError, TapResult};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub key: CorrelationKey,
    pub entity_type: EntityType,
    pub shard: ShardIndex,
    pub url: String,
    pub body: String,
}

#[derive(Default)]
struct ReportLedger {
    entries: BTreeMap<(EntityType, ShardIndex), LedgerEntry>,
    counts: BTreeMap<EntityType, u32>,
}

#[derive(Default)]
pub struct RequestLedger {
    reports: HashMap<CorrelationKey, ReportLedger>,
}

impl RequestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a graph query and returns the shard index it was assigned.
    pub fn record(
        &mut self,
        key: &CorrelationKey,
        entity_type: &EntityType,
        body: &str,
        url: &str,
    ) -> TapResult<ShardIndex> {
        let report = self.reports.entry(key.clone()).or_default();
        let count = report.counts.entry(entity_type.clone()).or_insert(0);
        let shard = ShardIndex(*count);
        let slot = (entity_type.clone(), shard);
        if report.entries.contains_key(&slot) {
            return Err(TapError::DuplicateShard {
                key: key.clone(),
                entity_type: entity_type.clone(),
                shard,
            });
        }
        *count += 1;
        report.entries.insert(
            slot,
            LedgerEntry {
                key: key.clone(),
                entity_type: entity_type.clone(),
                shard,
                url: url.to_string(),
                body: body.to_string(),
            },
        );
        debug!(target: "report_tap", %key, %entity_type, %shard, "graph query recorded");
        Ok(shard)
    }

    pub fn counts_by_type(&self, key: &CorrelationKey) -> BTreeMap<EntityType, u32> {
        self.reports
            .get(key)
            .map(|report| report.counts.clone())
            .unwrap_or_default()
    }

    pub fn total(&self, key: &CorrelationKey) -> u32 {
        self.reports
            .get(key)
            .map(|report| report.counts.values().sum())
            .unwrap_or(0)
    }

    pub fn entry(
        &self,
        key: &CorrelationKey,
        entity_type: &EntityType,
        shard: ShardIndex,
    ) -> Option<&LedgerEntry> {
        self.reports
            .get(key)?
            .entries
            .get(&(entity_type.clone(), shard))
    }

    /// Every entry for `key`, grouped by entity type and ordered by shard.
    pub fn entries(&self, key: &CorrelationKey) -> Vec<LedgerEntry> {
        self.reports
            .get(key)
            .map(|report| report.entries.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Drops bookkeeping for `key`, returning how many entries went with it.
    pub fn discard(&mut self, key: &CorrelationKey) -> usize {
        self.reports
            .remove(key)
            .map(|report| report.entries.len())
            .unwrap_or(0)
    }

    /// Removes exactly the given `(entity type, shard)` slots for `key`.
    ///
    /// Shards recorded after the slots were snapshotted survive, and the
    /// running counts are kept so later shards never reuse an index.
    pub fn retire<'a, I>(&mut self, key: &CorrelationKey, slots: I) -> usize
    where
        I: IntoIterator<Item = (&'a EntityType, ShardIndex)>,
    {
        let Some(report) = self.reports.get_mut(key) else {
            return 0;
        };
        let mut removed = 0;
        for (entity_type, shard) in slots {
            if report
                .entries
                .remove(&(entity_type.clone(), shard))
                .is_some()
            {
                removed += 1;
            }
        }
        removed
    }

    pub fn is_empty(&self) -> bool {
        self.reports.values().all(|report| report.entries.is_empty())
    }
}
