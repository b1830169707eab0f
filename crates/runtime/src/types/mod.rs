//! Core types and data structures for the plan review workflow

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod error;

pub use error::*;

/// Unique identifier for plan submissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionId(pub Uuid);

impl SubmissionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubmissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SubmissionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Review lifecycle of a submission.
///
/// `Pending` is the only initial state. `Approved` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Approved,
    Rejected,
}

impl SubmissionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SubmissionStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Approved => "approved",
            SubmissionStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One plan under review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    /// Hex SHA-256 of the plan blob
    pub plan_hash: String,
    pub submitter: String,
    pub submitted_at: DateTime<Utc>,
    pub status: SubmissionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    /// Bumped by the store on every successful update
    #[serde(default)]
    pub version: u64,
}

impl Submission {
    /// Build a fresh `pending` record
    pub fn pending(id: SubmissionId, plan_hash: String, submitter: String) -> Self {
        Self {
            id,
            plan_hash,
            submitter,
            submitted_at: Utc::now(),
            status: SubmissionStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            signed_at: None,
            rejection_reason: None,
            version: 0,
        }
    }

    /// Move a pending record to `approved`, stamping reviewer and signing times.
    pub fn approve(&mut self, reviewer: &str, at: DateTime<Utc>) -> Result<(), ReviewError> {
        self.ensure_pending()?;
        self.status = SubmissionStatus::Approved;
        self.reviewed_by = Some(reviewer.to_string());
        self.reviewed_at = Some(at);
        self.signed_at = Some(at);
        Ok(())
    }

    /// Move a pending record to `rejected`.
    pub fn reject(
        &mut self,
        reviewer: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<(), ReviewError> {
        self.ensure_pending()?;
        self.status = SubmissionStatus::Rejected;
        self.reviewed_by = Some(reviewer.to_string());
        self.reviewed_at = Some(at);
        self.rejection_reason = Some(reason.to_string());
        Ok(())
    }

    fn ensure_pending(&self) -> Result<(), ReviewError> {
        if self.status.is_terminal() {
            return Err(ReviewError::InvalidTransition {
                id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }
}

/// Artifacts that can be streamed back out of the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Plan,
    Signature,
}

impl std::str::FromStr for ArtifactKind {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan" => Ok(ArtifactKind::Plan),
            "signature" => Ok(ArtifactKind::Signature),
            other => Err(ReviewError::Validation(format!(
                "invalid artifact kind '{}' (expected 'plan' or 'signature')",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Plan => f.write_str("plan"),
            ArtifactKind::Signature => f.write_str("signature"),
        }
    }
}

/// Response body of `POST /submit`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub id: SubmissionId,
    pub status: SubmissionStatus,
}

/// Body of `POST /reject/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

/// Response body of the lockdown endpoints
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LockdownResponse {
    pub lockdown: bool,
}

/// Error body returned by every failing endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
