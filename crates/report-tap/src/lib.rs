//! Capture side of the factsheet-lens pipeline.
//!
//! Observed exchanges flow through [`TapSession::observe`], which classifies
//! them, records graph queries in the [`RequestLedger`] and captures the
//! bearer credential for the active report. Nothing here issues requests or
//! alters the exchanges it sees.

pub mod capture;
pub mod classifier;
pub mod config;
pub mod credentials;
pub mod exchange;
pub mod ledger;
pub mod session;

use factsheet_core_types::{CorrelationKey, EntityType, ShardIndex};
use thiserror::Error;

pub use classifier::{extract_entity_type, Classification, TrafficClassifier};
pub use config::TapConfig;
pub use credentials::CredentialCache;
pub use exchange::ObservedExchange;
pub use ledger::{LedgerEntry, RequestLedger};
pub use session::{Observation, ReportRequest, TapOutcome, TapSession};

/// Errors emitted by the tap surface.
#[derive(Debug, Error)]
pub enum TapError {
    #[error("graph query has no body")]
    MissingBody,
    #[error("graph query body is not valid JSON: {0}")]
    InvalidBody(String),
    #[error("graph query body carries no {facet} facet")]
    MissingEntityType { facet: String },
    #[error("ledger already holds {entity_type} shard {shard} for report {key}")]
    DuplicateShard {
        key: CorrelationKey,
        entity_type: EntityType,
        shard: ShardIndex,
    },
    #[error("capture i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("capture file is not valid: {0}")]
    Capture(String),
}

pub type TapResult<T> = Result<T, TapError>;
