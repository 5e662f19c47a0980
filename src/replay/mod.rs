//! Replay module
//!
//! Re-issues every graph query recorded for a report with the captured
//! credential, merging each response into the persisted collection for its
//! entity type. The barrier is the stream itself: [`Replayer::execute`]
//! returns only after every planned shard produced an outcome, successful or
//! not.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use factsheet_core_types::{CorrelationKey, EntityCollection, EntityType, ShardIndex};
use factsheet_kv_store::{keys, KvStore};
use futures::stream::{self, StreamExt};
use report_tap::LedgerEntry;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::errors::{LensError, LensResult};
use crate::merge::merge_into_store;
use crate::transport::ReportTransport;

/// Configuration for replay
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub request_timeout_ms: u64,
    /// Upper bound on in-flight replays; `0` means unbounded.
    pub max_concurrent: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            max_concurrent: 8,
        }
    }
}

impl ReplayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Snapshot of the ledger taken when replay starts.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplayPlan {
    pub key: CorrelationKey,
    pub credential: String,
    pub entries: Vec<LedgerEntry>,
}

impl ReplayPlan {
    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn counts_by_type(&self) -> BTreeMap<EntityType, u32> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.entity_type.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn slots(&self) -> impl Iterator<Item = (&EntityType, ShardIndex)> {
        self.entries
            .iter()
            .map(|entry| (&entry.entity_type, entry.shard))
    }
}

/// Results from replay execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplayResults {
    pub key: CorrelationKey,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Responses that arrived after the report was switched away.
    pub stale: usize,
    pub merged: BTreeMap<EntityType, usize>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl ReplayResults {
    pub fn new(key: CorrelationKey, total: usize) -> Self {
        Self {
            key,
            total,
            succeeded: 0,
            failed: 0,
            stale: 0,
            merged: BTreeMap::new(),
            errors: Vec::new(),
            duration_ms: 0,
        }
    }

    /// True once every planned shard has reported back.
    pub fn barrier_reached(&self) -> bool {
        self.succeeded + self.failed + self.stale == self.total
    }
}

struct ShardOutcome {
    entity_type: EntityType,
    shard: ShardIndex,
    result: LensResult<EntityCollection>,
}

/// Replayer for recorded graph queries
#[derive(Clone)]
pub struct Replayer {
    transport: Arc<dyn ReportTransport>,
    store: Arc<dyn KvStore>,
    config: ReplayConfig,
}

impl Replayer {
    pub fn new(
        transport: Arc<dyn ReportTransport>,
        store: Arc<dyn KvStore>,
        config: ReplayConfig,
    ) -> Self {
        Self {
            transport,
            store,
            config,
        }
    }

    /// Replays every shard in `plan` concurrently.
    ///
    /// Responses are merged one at a time as they arrive, and only while
    /// `active` still names the plan's key; late responses for a switched
    /// report are counted as stale and dropped.
    pub async fn execute(
        &self,
        plan: &ReplayPlan,
        active: &watch::Receiver<Option<CorrelationKey>>,
    ) -> ReplayResults {
        let start = Instant::now();
        let mut results = ReplayResults::new(plan.key.clone(), plan.total());
        info!(
            target: "replay",
            key = %plan.key,
            total = results.total,
            "replaying graph queries"
        );

        let limit = match self.config.max_concurrent {
            0 => plan.total().max(1),
            limit => limit,
        };
        let mut outcomes = stream::iter(plan.entries.iter().map(|entry| self.replay_one(plan, entry)))
            .buffer_unordered(limit);

        while let Some(outcome) = outcomes.next().await {
            let ShardOutcome {
                entity_type,
                shard,
                result,
            } = outcome;
            let collection = match result {
                Ok(collection) => collection,
                Err(err) => {
                    warn!(
                        target: "replay",
                        key = %plan.key,
                        %entity_type,
                        %shard,
                        transient = err.is_transient(),
                        error = %err,
                        "replay failed"
                    );
                    results.failed += 1;
                    results.errors.push(format!("{entity_type}#{shard}: {err}"));
                    continue;
                }
            };

            let still_active = active.borrow().as_ref() == Some(&plan.key);
            if !still_active {
                debug!(
                    target: "replay",
                    key = %plan.key,
                    %entity_type,
                    %shard,
                    "late response for inactive report discarded"
                );
                results.stale += 1;
                continue;
            }

            let received = collection.len();
            match merge_into_store(self.store.as_ref(), &plan.key, &entity_type, collection).await {
                Ok(_) => {
                    results.succeeded += 1;
                    *results.merged.entry(entity_type).or_insert(0) += received;
                }
                Err(err) => {
                    warn!(
                        target: "replay",
                        key = %plan.key,
                        %entity_type,
                        %shard,
                        error = %err,
                        "failed to persist replay response"
                    );
                    results.failed += 1;
                    results.errors.push(format!("{entity_type}#{shard}: {err}"));
                }
            }
        }

        results.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            target: "replay",
            key = %plan.key,
            succeeded = results.succeeded,
            failed = results.failed,
            stale = results.stale,
            total = results.total,
            "replay barrier reached"
        );
        results
    }

    async fn replay_one(&self, plan: &ReplayPlan, entry: &LedgerEntry) -> ShardOutcome {
        let result = self
            .transport
            .post_json(&entry.url, &plan.credential, &entry.body)
            .await
            .and_then(|response| {
                EntityCollection::from_graphql_response(&response).map_err(LensError::from)
            });
        ShardOutcome {
            entity_type: entry.entity_type.clone(),
            shard: entry.shard,
            result,
        }
    }

    /// Removes the ledger mirrors and credential mirror for exactly `plan`.
    pub async fn cleanup_completed(&self, plan: &ReplayPlan) -> LensResult<usize> {
        let mut removed = 0;
        for (entity_type, shard) in plan.slots() {
            if self
                .store
                .remove(&keys::request_key(&plan.key, entity_type, shard))
                .await?
            {
                removed += 1;
            }
        }
        if self.store.remove(&keys::auth_key(&plan.key)).await? {
            removed += 1;
        }
        debug!(target: "replay", key = %plan.key, removed, "replay mirrors cleaned up");
        Ok(removed)
    }
}
