//! Error handling module
//!
//! Every failure in the pipeline maps onto one of the taxonomy buckets below.
//! None of them abort the process on their own: callers decide whether an
//! error ends a run (primary fetch) or is merely counted (replay, resolution).

use factsheet_core_types::{CoreError, CorrelationKey};
use factsheet_kv_store::StoreError;
use report_tap::TapError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LensError {
    #[error("capture error: {0}")]
    Tap(#[from] TapError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("graph payload error: {0}")]
    Payload(#[from] CoreError),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },
    #[error("request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("report descriptor is invalid: {0}")]
    InvalidReport(String),
    #[error("no credential captured for report {0}")]
    MissingCredential(CorrelationKey),
    #[error("pipeline for report {key} cannot {action} while {state}")]
    InvalidTransition {
        key: CorrelationKey,
        action: &'static str,
        state: String,
    },
    #[error("no active report")]
    NoActiveReport,
    #[error("configuration error: {0}")]
    Config(String),
}

impl LensError {
    pub fn transport(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transport {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Errors worth retrying by observing the same report again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Http(err) => err.is_timeout() || err.is_connect(),
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type LensResult<T> = Result<T, LensError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(LensError::transport("u", "reset").is_transient());
        assert!(LensError::Status {
            url: "u".into(),
            status: 503
        }
        .is_transient());
        assert!(!LensError::Status {
            url: "u".into(),
            status: 401
        }
        .is_transient());
        assert!(!LensError::NoActiveReport.is_transient());
    }
}
