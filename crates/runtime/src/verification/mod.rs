//! Consumer-side verification of signed plans

pub mod pipeline;
pub mod types;

pub use pipeline::{VerificationPipeline, DEFAULT_FRESHNESS_THRESHOLD};
pub use types::{Stage, StageOutcome, StageReport, VerificationError, VerificationReport};
