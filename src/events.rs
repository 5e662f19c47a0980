//! Pipeline states and the notifications published on the event bus.

use std::fmt;

use factsheet_core_types::CorrelationKey;
use serde::Serialize;

use crate::resolve::ResolutionReport;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "key", rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Listening(CorrelationKey),
    ReportFetching(CorrelationKey),
    ReportFetched(CorrelationKey),
    Resolving(CorrelationKey),
    Normalizing(CorrelationKey),
    Ready(CorrelationKey),
    Failed {
        key: CorrelationKey,
        reason: String,
    },
}

impl PipelineState {
    pub fn key(&self) -> Option<&CorrelationKey> {
        match self {
            Self::Idle => None,
            Self::Listening(key)
            | Self::ReportFetching(key)
            | Self::ReportFetched(key)
            | Self::Resolving(key)
            | Self::Normalizing(key)
            | Self::Ready(key) => Some(key),
            Self::Failed { key, .. } => Some(key),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening(_) => "listening",
            Self::ReportFetching(_) => "report_fetching",
            Self::ReportFetched(_) => "report_fetched",
            Self::Resolving(_) => "resolving",
            Self::Normalizing(_) => "normalizing",
            Self::Ready(_) => "ready",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready(_) | Self::Failed { .. })
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key() {
            Some(key) => write!(f, "{}({})", self.name(), key),
            None => f.write_str(self.name()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LensEvent {
    StateChanged {
        from: PipelineState,
        to: PipelineState,
    },
    ReportSwitched {
        from: CorrelationKey,
        to: CorrelationKey,
    },
    ReplayCompleted {
        key: CorrelationKey,
        succeeded: usize,
        failed: usize,
        total: usize,
    },
    ResolutionReport {
        key: CorrelationKey,
        report: ResolutionReport,
    },
    Ready {
        key: CorrelationKey,
    },
    Failed {
        key: CorrelationKey,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_display_includes_key() {
        let key = CorrelationKey::from("b1");
        assert_eq!(PipelineState::Idle.to_string(), "idle");
        assert_eq!(PipelineState::Resolving(key.clone()).to_string(), "resolving(b1)");
        let failed = PipelineState::Failed {
            key,
            reason: "HTTP 500".into(),
        };
        assert!(failed.is_terminal());
        assert_eq!(failed.to_string(), "failed(b1)");
    }
}
