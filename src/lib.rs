//! factsheet-lens library
//!
//! Captures the graph queries a report issues, replays them with the captured
//! credential, merges and resolves the results and normalizes them into a
//! single document for downstream analysis.

pub mod config;
pub mod errors;
pub mod events;
pub mod findings;
pub mod merge;
pub mod metadata;
pub mod normalize;
pub mod orchestrator;
pub mod replay;
pub mod report;
pub mod resolve;
pub mod transport;
pub mod visitor;

pub use config::{load_config, LensConfig};
pub use errors::{LensError, LensResult};
pub use events::{LensEvent, PipelineState};
pub use normalize::{GraphNormalizer, NormalizedDocument};
pub use orchestrator::{Orchestrator, ReportArtifact};
pub use replay::{ReplayConfig, ReplayPlan, ReplayResults, Replayer};
pub use report::ReportDescriptor;
pub use resolve::{ReferenceResolver, ResolutionReport, ResolverConfig};
pub use transport::{HttpTransport, ReportTransport};

pub use factsheet_core_types as core_types;
pub use factsheet_kv_store as kv_store;
pub use report_tap as tap;
