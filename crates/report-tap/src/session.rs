//! Per-report capture state.
//!
//! A [`TapSession`] owns everything the capture side knows about the active
//! report: the ledger, the credential, the processed/failed exchange sets and
//! a pending primary fetch. Observing an exchange for a different correlation
//! key resets all of it in one place.

use std::collections::HashSet;

use factsheet_core_types::{CorrelationKey, EntityType, ShardIndex};
use tracing::{debug, info, trace, warn};

use crate::classifier::{Classification, TrafficClassifier};
use crate::config::TapConfig;
use crate::credentials::CredentialCache;
use crate::exchange::ObservedExchange;
use crate::ledger::RequestLedger;

#[derive(Clone, Debug, PartialEq)]
pub enum TapOutcome {
    /// Not one of the interesting shapes.
    Ignored,
    /// Same exchange identity already handled for this report.
    Duplicate,
    /// Primary fetch URL that failed before; not retried automatically.
    PreviouslyFailed,
    /// Graph-query shaped but unusable.
    Dropped { reason: String },
    Recorded {
        key: CorrelationKey,
        entity_type: EntityType,
        shard: ShardIndex,
    },
    ReportRequested { key: CorrelationKey, url: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    pub outcome: TapOutcome,
    /// Previous key when this exchange switched the active report.
    pub switched_from: Option<CorrelationKey>,
}

/// Primary fetch that is ready to be re-issued with a captured credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportRequest {
    pub key: CorrelationKey,
    pub url: String,
    pub credential: String,
}

pub struct TapSession {
    classifier: TrafficClassifier,
    active: Option<CorrelationKey>,
    ledger: RequestLedger,
    credentials: CredentialCache,
    processed: HashSet<String>,
    failed: HashSet<String>,
    pending_report: Option<String>,
}

impl TapSession {
    pub fn new(config: TapConfig) -> Self {
        Self {
            classifier: TrafficClassifier::new(config),
            active: None,
            ledger: RequestLedger::new(),
            credentials: CredentialCache::new(),
            processed: HashSet::new(),
            failed: HashSet::new(),
            pending_report: None,
        }
    }

    pub fn active_key(&self) -> Option<&CorrelationKey> {
        self.active.as_ref()
    }

    pub fn ledger(&self) -> &RequestLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut RequestLedger {
        &mut self.ledger
    }

    pub fn credential(&self) -> Option<&str> {
        self.active
            .as_ref()
            .and_then(|key| self.credentials.get(key))
    }

    /// Drops the active credential after a request using it failed.
    pub fn invalidate_credential(&mut self) {
        if let Some(key) = &self.active {
            if self.credentials.invalidate(key) {
                debug!(target: "report_tap", %key, "credential invalidated");
            }
        }
    }

    pub fn mark_failed(&mut self, url: &str) {
        self.processed.remove(url);
        self.failed.insert(url.to_string());
    }

    pub fn is_failed(&self, url: &str) -> bool {
        self.failed.contains(url)
    }

    /// Hands out the pending primary fetch once a credential is available.
    pub fn take_ready_report(&mut self) -> Option<ReportRequest> {
        let key = self.active.clone()?;
        let credential = self.credentials.get(&key)?.to_string();
        let url = self.pending_report.take()?;
        Some(ReportRequest {
            key,
            url,
            credential,
        })
    }

    /// Discards every piece of per-report state, returning the old key.
    pub fn reset(&mut self) -> Option<CorrelationKey> {
        let previous = self.active.take();
        if let Some(key) = &previous {
            let dropped = self.ledger.discard(key);
            debug!(target: "report_tap", %key, dropped, "report state discarded");
        }
        self.credentials.clear();
        self.processed.clear();
        self.failed.clear();
        self.pending_report = None;
        previous
    }

    pub fn observe(&mut self, exchange: &ObservedExchange) -> Observation {
        let classification = match self.classifier.classify(exchange) {
            Ok(classification) => classification,
            Err(err) => {
                warn!(
                    target: "report_tap",
                    request = %exchange.request_id,
                    error = %err,
                    "graph query dropped"
                );
                return Observation {
                    outcome: TapOutcome::Dropped {
                        reason: err.to_string(),
                    },
                    switched_from: None,
                };
            }
        };

        match classification {
            Classification::Unmatched => {
                trace!(target: "report_tap", url = %exchange.url, "exchange ignored");
                Observation {
                    outcome: TapOutcome::Ignored,
                    switched_from: None,
                }
            }
            Classification::GraphQuery {
                key,
                entity_type,
                url,
                body,
            } => {
                let switched_from = self.activate(&key);
                let identity = format!("graph:{}", exchange.request_id);
                if !self.processed.insert(identity) {
                    return Observation {
                        outcome: TapOutcome::Duplicate,
                        switched_from,
                    };
                }
                self.capture_credential(&key, exchange);
                let outcome = match self.ledger.record(&key, &entity_type, &body, &url) {
                    Ok(shard) => TapOutcome::Recorded {
                        key,
                        entity_type,
                        shard,
                    },
                    Err(err) => {
                        warn!(target: "report_tap", error = %err, "ledger rejected graph query");
                        TapOutcome::Dropped {
                            reason: err.to_string(),
                        }
                    }
                };
                Observation {
                    outcome,
                    switched_from,
                }
            }
            Classification::PrimaryFetch { key, url } => {
                let switched_from = self.activate(&key);
                if self.failed.contains(&url) {
                    return Observation {
                        outcome: TapOutcome::PreviouslyFailed,
                        switched_from,
                    };
                }
                if !self.processed.insert(url.clone()) {
                    return Observation {
                        outcome: TapOutcome::Duplicate,
                        switched_from,
                    };
                }
                self.capture_credential(&key, exchange);
                self.pending_report = Some(url.clone());
                info!(target: "report_tap", %key, "primary report fetch observed");
                Observation {
                    outcome: TapOutcome::ReportRequested { key, url },
                    switched_from,
                }
            }
        }
    }

    fn activate(&mut self, key: &CorrelationKey) -> Option<CorrelationKey> {
        match &self.active {
            Some(current) if current == key => None,
            Some(_) => {
                let previous = self.reset();
                info!(
                    target: "report_tap",
                    old = ?previous,
                    new = %key,
                    "report switched"
                );
                self.active = Some(key.clone());
                previous
            }
            None => {
                info!(target: "report_tap", %key, "listening for report");
                self.active = Some(key.clone());
                None
            }
        }
    }

    fn capture_credential(&mut self, key: &CorrelationKey, exchange: &ObservedExchange) {
        if let Some(credential) = exchange.bearer_credential() {
            self.credentials.capture(key, credential);
        }
    }
}
