//! Plan conversion and the guarded apply wrapper

use thiserror::Error;

pub mod apply_guard;
pub mod converter;
pub mod document;

pub use apply_guard::{ApplyDecision, ApplyGuard, GuardError, ToolRunner};
pub use converter::{JsonFileConverter, PlanConverter, TerraformCli};
pub use document::{Change, PlanDocument, ResourceChange};

/// Errors from the planning tool or its output
#[derive(Error, Debug, Clone)]
pub enum PlanError {
    #[error("Planning tool not found: {binary}")]
    BinaryNotFound { binary: String },

    #[error("Planning tool timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Planning tool failed: {reason}")]
    ExecutionFailed { reason: String },

    #[error("Failed to parse plan JSON: {0}")]
    Parse(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("IO error: {0}")]
    Io(String),
}
