//! Orchestrator: sequences capture, report fetch, replay, resolution and
//! normalization for one report at a time.
//!
//! Every step checks the current [`PipelineState`] before acting, so causal
//! ordering (descriptor before replay, replay barrier before resolution) is a
//! precondition rather than an accident of callback order. A report switch
//! resets in-memory state and publishes the new active key on a watch channel
//! that in-flight replays consult before merging.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use factsheet_core_types::{CorrelationKey, EntityCollection, EntityType};
use factsheet_event_bus::{EventBus, InMemoryBus};
use factsheet_kv_store::{keys, load_json, remove_prefix, save_json, KvStore};
use report_tap::{Observation, ObservedExchange, ReportRequest, TapOutcome, TapSession};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::LensConfig;
use crate::errors::{LensError, LensResult};
use crate::events::{LensEvent, PipelineState};
use crate::metadata::fetch_field_translations;
use crate::normalize::{GraphNormalizer, NormalizedDocument};
use crate::replay::{ReplayPlan, ReplayResults, Replayer};
use crate::report::ReportDescriptor;
use crate::resolve::{ReferenceResolver, ResolutionReport};
use crate::transport::ReportTransport;

/// Final output handed to downstream collaborators.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportArtifact {
    pub run_id: Uuid,
    pub key: CorrelationKey,
    pub generated_at: DateTime<Utc>,
    pub descriptor: ReportDescriptor,
    pub document: NormalizedDocument,
    pub resolution: ResolutionReport,
    pub replay: Option<ReplayResults>,
}

pub struct Orchestrator {
    config: LensConfig,
    session: TapSession,
    state: PipelineState,
    transport: Arc<dyn ReportTransport>,
    store: Arc<dyn KvStore>,
    replayer: Replayer,
    resolver: ReferenceResolver,
    normalizer: GraphNormalizer,
    bus: Arc<InMemoryBus<LensEvent>>,
    active: watch::Sender<Option<CorrelationKey>>,
    pending: Option<ReportRequest>,
    descriptor: Option<ReportDescriptor>,
    replay: Option<ReplayResults>,
    resolution: Option<ResolutionReport>,
    artifact: Option<ReportArtifact>,
    /// `request_` mirrors written for the active report and not yet retired.
    mirrored: BTreeSet<String>,
}

impl Orchestrator {
    pub fn new(
        config: LensConfig,
        transport: Arc<dyn ReportTransport>,
        store: Arc<dyn KvStore>,
    ) -> Self {
        let (active, _) = watch::channel(None);
        Self {
            session: TapSession::new(config.tap.clone()),
            state: PipelineState::Idle,
            replayer: Replayer::new(transport.clone(), store.clone(), config.replay.clone()),
            resolver: ReferenceResolver::new(config.resolver.clone()),
            normalizer: GraphNormalizer::new(config.resolver.max_depth),
            bus: InMemoryBus::new(config.event_buffer),
            active,
            transport,
            store,
            config,
            pending: None,
            descriptor: None,
            replay: None,
            resolution: None,
            artifact: None,
            mirrored: BTreeSet::new(),
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn session(&self) -> &TapSession {
        &self.session
    }

    pub fn descriptor(&self) -> Option<&ReportDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn artifact(&self) -> Option<&ReportArtifact> {
        self.artifact.as_ref()
    }

    pub fn store(&self) -> Arc<dyn KvStore> {
        self.store.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LensEvent> {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> Arc<InMemoryBus<LensEvent>> {
        self.bus.clone()
    }

    /// Receiver tracking the active correlation key.
    pub fn active_keys(&self) -> watch::Receiver<Option<CorrelationKey>> {
        self.active.subscribe()
    }

    pub fn replayer(&self) -> Replayer {
        self.replayer.clone()
    }

    /// Feeds one observed exchange through the capture session and advances
    /// the state machine accordingly.
    pub async fn observe(&mut self, exchange: &ObservedExchange) -> LensResult<Observation> {
        let observation = self.session.observe(exchange);
        let Some(key) = self.session.active_key().cloned() else {
            return Ok(observation);
        };

        if let Some(previous) = &observation.switched_from {
            self.on_switch(previous.clone(), key.clone()).await;
        } else if self.state == PipelineState::Idle {
            self.activate(key.clone()).await;
        }

        match &observation.outcome {
            TapOutcome::Recorded {
                key,
                entity_type,
                shard,
            } => self.mirror_request(key, entity_type, *shard).await,
            TapOutcome::ReportRequested { key, .. } => {
                if matches!(&self.state, PipelineState::Failed { key: failed, .. } if failed == key) {
                    info!(target: "orchestrator", %key, "retrying report after earlier failure");
                    self.transition(PipelineState::Listening(key.clone())).await;
                }
            }
            _ => {}
        }

        if matches!(&self.state, PipelineState::Listening(current) if *current == key) {
            if let Some(request) = self.session.take_ready_report() {
                self.mirror_credential(&request).await;
                self.pending = Some(request);
                self.transition(PipelineState::ReportFetching(key)).await;
            }
        }

        Ok(observation)
    }

    /// Fetches and parses the report descriptor, then attaches field
    /// translations for the main filter.
    pub async fn fetch_report(&mut self) -> LensResult<ReportDescriptor> {
        let key = self.expect_state("fetch report", |state| {
            matches!(state, PipelineState::ReportFetching(_))
        })?;
        let request = self.pending.take().ok_or(LensError::NoActiveReport)?;

        let fetched = self
            .transport
            .get_json(&request.url, &request.credential)
            .await
            .and_then(|response| ReportDescriptor::parse(&response));
        let mut descriptor = match fetched {
            Ok(descriptor) => descriptor,
            Err(err) => {
                error!(
                    target: "orchestrator",
                    %key,
                    url = %request.url,
                    transient = err.is_transient(),
                    error = %err,
                    "report fetch failed"
                );
                self.session.mark_failed(&request.url);
                self.session.invalidate_credential();
                self.fail(&key, err.to_string()).await;
                return Err(err);
            }
        };

        let translations = fetch_field_translations(
            self.transport.as_ref(),
            &self.config.metadata,
            &request.url,
            &request.credential,
            &descriptor,
        )
        .await;
        descriptor.attach_field_translations(translations);

        info!(
            target: "orchestrator",
            %key,
            report = descriptor.name(),
            main_filter = %descriptor.main_filter(),
            more_filters = descriptor.more_filters().len(),
            "report descriptor fetched"
        );
        self.descriptor = Some(descriptor.clone());
        self.transition(PipelineState::ReportFetched(key)).await;
        Ok(descriptor)
    }

    /// Snapshots the ledger for the active report.
    pub fn plan_replay(&self) -> LensResult<ReplayPlan> {
        let key = self.expect_state("replay", |state| {
            matches!(state, PipelineState::ReportFetched(_))
        })?;
        let credential = self
            .session
            .credential()
            .ok_or_else(|| LensError::MissingCredential(key.clone()))?
            .to_string();
        let entries = self.session.ledger().entries(&key);
        debug!(
            target: "orchestrator",
            %key,
            total = entries.len(),
            "replay planned"
        );
        Ok(ReplayPlan {
            key,
            credential,
            entries,
        })
    }

    /// Applies the outcome of a completed replay barrier.
    ///
    /// Returns `false` when the plan belongs to a report that is no longer
    /// active; nothing is cleaned up or transitioned in that case.
    pub async fn finish_replay(
        &mut self,
        plan: &ReplayPlan,
        results: ReplayResults,
    ) -> LensResult<bool> {
        let current = matches!(&self.state, PipelineState::ReportFetched(key) if *key == plan.key);
        if !current {
            debug!(
                target: "orchestrator",
                key = %plan.key,
                state = %self.state,
                "replay results for inactive report ignored"
            );
            return Ok(false);
        }

        if let Err(err) = self.replayer.cleanup_completed(plan).await {
            warn!(target: "orchestrator", key = %plan.key, error = %err, "replay cleanup failed");
        }
        for (entity_type, shard) in plan.slots() {
            self.mirrored
                .remove(&keys::request_key(&plan.key, entity_type, shard));
        }
        let retired = self.session.ledger_mut().retire(&plan.key, plan.slots());
        debug!(target: "orchestrator", key = %plan.key, retired, "ledger entries retired");

        self.publish(LensEvent::ReplayCompleted {
            key: plan.key.clone(),
            succeeded: results.succeeded,
            failed: results.failed,
            total: results.total,
        })
        .await;
        self.replay = Some(results);
        self.transition(PipelineState::Resolving(plan.key.clone())).await;
        Ok(true)
    }

    /// Plans, executes and applies a replay for the active report.
    pub async fn replay(&mut self) -> LensResult<ReplayResults> {
        let plan = self.plan_replay()?;
        let active = self.active_keys();
        let results = self.replayer.execute(&plan, &active).await;
        self.finish_replay(&plan, results.clone()).await?;
        Ok(results)
    }

    /// Resolves stubs in the main collection and persists the result.
    pub async fn resolve(&mut self) -> LensResult<ResolutionReport> {
        let key = self.expect_state("resolve", |state| {
            matches!(state, PipelineState::Resolving(_))
        })?;
        let descriptor = self.descriptor.clone().ok_or(LensError::NoActiveReport)?;

        let outcome = self.resolve_persisted(&key, &descriptor).await;
        let report = match outcome {
            Ok(report) => report,
            Err(err) => {
                self.fail(&key, err.to_string()).await;
                return Err(err);
            }
        };

        self.resolution = Some(report);
        self.publish(LensEvent::ResolutionReport {
            key: key.clone(),
            report,
        })
        .await;
        self.transition(PipelineState::Normalizing(key)).await;
        Ok(report)
    }

    async fn resolve_persisted(
        &self,
        key: &CorrelationKey,
        descriptor: &ReportDescriptor,
    ) -> LensResult<ResolutionReport> {
        let mut main = self.load_collection(key, descriptor.main_filter()).await?;
        let mut more = Vec::with_capacity(descriptor.more_filters().len());
        for entity_type in descriptor.more_filters() {
            let collection = self.load_collection(key, entity_type).await?;
            more.push((entity_type.clone(), collection));
        }
        let report = self.resolver.resolve(&mut main, &more);
        save_json(
            self.store.as_ref(),
            &keys::resolved_key(key, descriptor.main_filter()),
            &main,
        )
        .await?;
        Ok(report)
    }

    async fn load_collection(
        &self,
        key: &CorrelationKey,
        entity_type: &EntityType,
    ) -> LensResult<EntityCollection> {
        let stored = load_json(self.store.as_ref(), &keys::edges_key(key, entity_type)).await?;
        Ok(stored.unwrap_or_else(|| {
            debug!(
                target: "orchestrator",
                %key,
                %entity_type,
                "no persisted collection; treated as empty"
            );
            EntityCollection::default()
        }))
    }

    /// Normalizes the resolved main collection into the final artifact.
    pub async fn normalize(&mut self) -> LensResult<ReportArtifact> {
        let key = self.expect_state("normalize", |state| {
            matches!(state, PipelineState::Normalizing(_))
        })?;
        let descriptor = self.descriptor.clone().ok_or(LensError::NoActiveReport)?;

        let resolved_key = keys::resolved_key(&key, descriptor.main_filter());
        let main: EntityCollection = match load_json(self.store.as_ref(), &resolved_key).await {
            Ok(stored) => stored.unwrap_or_default(),
            Err(err) => {
                let err = LensError::from(err);
                self.fail(&key, err.to_string()).await;
                return Err(err);
            }
        };
        let document = self.normalizer.normalize(&main);

        let artifact = ReportArtifact {
            run_id: Uuid::new_v4(),
            key: key.clone(),
            generated_at: Utc::now(),
            descriptor,
            document,
            resolution: self.resolution.unwrap_or_default(),
            replay: self.replay.clone(),
        };
        info!(
            target: "orchestrator",
            %key,
            run_id = %artifact.run_id,
            entities = artifact.document.len(),
            "normalized document ready"
        );
        self.artifact = Some(artifact.clone());
        self.transition(PipelineState::Ready(key.clone())).await;
        self.publish(LensEvent::Ready { key: key.clone() }).await;

        if !self.config.retain_artifacts {
            if let Err(err) = self.cleanup_artifacts(&key).await {
                warn!(target: "orchestrator", %key, error = %err, "artifact cleanup failed");
            }
        }
        Ok(artifact)
    }

    /// Runs every remaining step for a report whose primary fetch has been
    /// observed.
    pub async fn run(&mut self) -> LensResult<ReportArtifact> {
        self.fetch_report().await?;
        self.replay().await?;
        self.resolve().await?;
        self.normalize().await
    }

    /// Observes a whole capture, then runs the pipeline for the report that
    /// is active at the end of it.
    pub async fn drive<I>(&mut self, exchanges: I) -> LensResult<Option<ReportArtifact>>
    where
        I: IntoIterator<Item = ObservedExchange>,
    {
        for exchange in exchanges {
            self.observe(&exchange).await?;
        }
        match &self.state {
            PipelineState::ReportFetching(_) => self.run().await.map(Some),
            state => {
                info!(target: "orchestrator", %state, "capture ended without a runnable report");
                Ok(None)
            }
        }
    }

    /// Removes persisted collections and resolved output for `key`.
    pub async fn cleanup_artifacts(&self, key: &CorrelationKey) -> LensResult<usize> {
        let mut removed = remove_prefix(self.store.as_ref(), &keys::edges_prefix(key)).await?;
        for stored in self.store.keys_with_prefix(&format!("{key}.")).await? {
            if stored.ends_with("_resolved") && self.store.remove(&stored).await? {
                removed += 1;
            }
        }
        debug!(target: "orchestrator", %key, removed, "persisted artifacts removed");
        Ok(removed)
    }

    fn expect_state<F>(&self, action: &'static str, allowed: F) -> LensResult<CorrelationKey>
    where
        F: Fn(&PipelineState) -> bool,
    {
        match self.state.key() {
            Some(key) if allowed(&self.state) => Ok(key.clone()),
            Some(key) => Err(LensError::InvalidTransition {
                key: key.clone(),
                action,
                state: self.state.to_string(),
            }),
            None => Err(LensError::NoActiveReport),
        }
    }

    async fn activate(&mut self, key: CorrelationKey) {
        self.active.send_replace(Some(key.clone()));
        self.transition(PipelineState::Listening(key)).await;
    }

    async fn on_switch(&mut self, previous: CorrelationKey, next: CorrelationKey) {
        info!(target: "orchestrator", old = %previous, new = %next, "active report switched");
        self.pending = None;
        self.descriptor = None;
        self.replay = None;
        self.resolution = None;
        self.artifact = None;
        self.discard_mirrors(&previous).await;
        self.publish(LensEvent::ReportSwitched {
            from: previous,
            to: next.clone(),
        })
        .await;
        self.activate(next).await;
    }

    async fn fail(&mut self, key: &CorrelationKey, reason: String) {
        self.transition(PipelineState::Failed {
            key: key.clone(),
            reason: reason.clone(),
        })
        .await;
        self.publish(LensEvent::Failed {
            key: key.clone(),
            reason,
        })
        .await;
        self.discard_mirrors(key).await;
        if let Err(err) = self.cleanup_artifacts(key).await {
            warn!(target: "orchestrator", %key, error = %err, "artifact cleanup failed");
        }
    }

    /// Drops the credential mirror and every unretired `request_` mirror of
    /// `key`. The in-memory ledger may already be gone, so the tracked set is
    /// the only record of what was written.
    async fn discard_mirrors(&mut self, key: &CorrelationKey) {
        let mut stale: Vec<String> = std::mem::take(&mut self.mirrored).into_iter().collect();
        stale.push(keys::auth_key(key));
        let mut removed = 0;
        for store_key in stale {
            match self.store.remove(&store_key).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(target: "orchestrator", key = %store_key, error = %err, "mirror not removed")
                }
            }
        }
        debug!(target: "orchestrator", %key, removed, "ephemeral mirrors discarded");
    }

    async fn transition(&mut self, next: PipelineState) {
        if self.state == next {
            return;
        }
        let from = std::mem::replace(&mut self.state, next.clone());
        info!(target: "orchestrator", from = %from, to = %next, "state changed");
        self.publish(LensEvent::StateChanged { from, to: next }).await;
    }

    async fn publish(&self, event: LensEvent) {
        let receivers = self.bus.publish(event).await;
        debug!(target: "orchestrator", receivers, "event published");
    }

    async fn mirror_request(
        &mut self,
        key: &CorrelationKey,
        entity_type: &EntityType,
        shard: factsheet_core_types::ShardIndex,
    ) {
        let Some(entry) = self.session.ledger().entry(key, entity_type, shard) else {
            return;
        };
        let store_key = keys::request_key(key, entity_type, shard);
        match save_json(self.store.as_ref(), &store_key, entry).await {
            Ok(()) => {
                self.mirrored.insert(store_key);
            }
            Err(err) => {
                warn!(target: "orchestrator", key = %store_key, error = %err, "ledger mirror not written")
            }
        }
        if let Some(credential) = self.session.credential() {
            if let Err(err) = self
                .store
                .set(&keys::auth_key(key), credential.to_string())
                .await
            {
                warn!(target: "orchestrator", %key, error = %err, "credential mirror not written");
            }
        }
    }

    async fn mirror_credential(&self, request: &ReportRequest) {
        if let Err(err) = self
            .store
            .set(&keys::auth_key(&request.key), request.credential.clone())
            .await
        {
            warn!(target: "orchestrator", key = %request.key, error = %err, "credential mirror not written");
        }
    }
}
