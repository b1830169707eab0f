//! Error types for the review workflow and its submission store

use thiserror::Error;

use super::{SubmissionId, SubmissionStatus};

/// Main review workflow error type
#[derive(Error, Debug, Clone)]
pub enum ReviewError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Emergency lockdown active - rejecting all requests")]
    LockdownActive,

    #[error("Submission {id} is already {status}; no further transitions are allowed")]
    InvalidTransition {
        id: SubmissionId,
        status: SubmissionStatus,
    },

    #[error("Submission {id} was modified concurrently (expected version {expected}, found {found})")]
    Conflict {
        id: SubmissionId,
        expected: u64,
        found: u64,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl ReviewError {
    /// Stable machine-readable code used in HTTP error bodies
    pub fn code(&self) -> &'static str {
        match self {
            ReviewError::Validation(_) => "VALIDATION_ERROR",
            ReviewError::NotFound(_) => "NOT_FOUND",
            ReviewError::LockdownActive => "LOCKDOWN_ACTIVE",
            ReviewError::InvalidTransition { .. } => "INVALID_TRANSITION",
            ReviewError::Conflict { .. } => "VERSION_CONFLICT",
            ReviewError::Unauthorized(_) => "UNAUTHORIZED",
            ReviewError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ReviewError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

/// Submission store errors
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Submission not found: {id}")]
    NotFound { id: SubmissionId },

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Submission already exists: {id}")]
    AlreadyExists { id: SubmissionId },

    #[error("Version conflict for {id}: expected {expected}, found {found}")]
    VersionConflict {
        id: SubmissionId,
        expected: u64,
        found: u64,
    },

    #[error("Submission {id} is already {status}")]
    TerminalState {
        id: SubmissionId,
        status: SubmissionStatus,
    },

    #[error("Upload rejected: {0}")]
    PayloadTooLarge(String),

    #[error("Corrupt record at {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("I/O failure: {0}")]
    Io(String),
}

impl From<StoreError> for ReviewError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { id } => ReviewError::NotFound(format!("submission {}", id)),
            StoreError::ArtifactNotFound(what) => ReviewError::NotFound(what),
            StoreError::VersionConflict {
                id,
                expected,
                found,
            } => ReviewError::Conflict {
                id,
                expected,
                found,
            },
            StoreError::TerminalState { id, status } => {
                ReviewError::InvalidTransition { id, status }
            }
            StoreError::PayloadTooLarge(what) => ReviewError::PayloadTooLarge(what),
            other => ReviewError::Storage(other.to_string()),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}
