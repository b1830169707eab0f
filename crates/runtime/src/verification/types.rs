//! Verification report types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Signature,
    PolicyAttestation,
    Provenance,
    Freshness,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Signature,
        Stage::PolicyAttestation,
        Stage::Provenance,
        Stage::Freshness,
    ];

    /// 1-based position
    pub fn number(&self) -> usize {
        match self {
            Stage::Signature => 1,
            Stage::PolicyAttestation => 2,
            Stage::Provenance => 3,
            Stage::Freshness => 4,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Stage::Signature => "cryptographic signature",
            Stage::PolicyAttestation => "policy compliance",
            Stage::Provenance => "SLSA provenance",
            Stage::Freshness => "plan freshness",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "step {}/4 ({})", self.number(), self.title())
    }
}

/// Result of one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "detail")]
pub enum StageOutcome {
    Passed(String),
    /// Non-fatal: the evidence is absent
    Warning(String),
    /// Fatal: the plan must not be trusted
    Failed(String),
    /// Not evaluated
    Skipped(String),
}

impl StageOutcome {
    pub fn detail(&self) -> &str {
        match self {
            StageOutcome::Passed(d)
            | StageOutcome::Warning(d)
            | StageOutcome::Failed(d)
            | StageOutcome::Skipped(d) => d,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub outcome: StageOutcome,
}

/// Everything the pipeline observed for one plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub plan: PathBuf,
    /// Stages that ran, in order; stops after the first failure
    pub stages: Vec<StageReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builder_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_type: Option<String>,
    /// Hours since `buildFinishedOn`, when provenance was present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_hours: Option<f64>,
}

impl VerificationReport {
    pub(crate) fn new(plan: PathBuf) -> Self {
        Self {
            plan,
            stages: Vec::new(),
            builder_id: None,
            build_type: None,
            age_hours: None,
        }
    }

    pub(crate) fn record(&mut self, stage: Stage, outcome: StageOutcome) {
        self.stages.push(StageReport { stage, outcome });
    }

    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| &r.outcome)
    }

    /// The fatal stage, if any
    pub fn failure(&self) -> Option<&StageReport> {
        self.stages
            .iter()
            .find(|r| matches!(r.outcome, StageOutcome::Failed(_)))
    }

    pub fn warnings(&self) -> Vec<&StageReport> {
        self.stages
            .iter()
            .filter(|r| matches!(r.outcome, StageOutcome::Warning(_)))
            .collect()
    }

    /// Trusted: the signature verified and no stage failed
    pub fn passed(&self) -> bool {
        self.failure().is_none()
            && matches!(
                self.outcome(Stage::Signature),
                Some(StageOutcome::Passed(_))
            )
    }

    /// `Ok(self)` when trusted, otherwise the failing stage and reason
    pub fn into_result(self) -> Result<VerificationReport, VerificationError> {
        match self.failure() {
            Some(report) => Err(VerificationError::Failed {
                stage: report.stage,
                reason: report.outcome.detail().to_string(),
            }),
            None if !self.passed() => Err(VerificationError::Failed {
                stage: Stage::Signature,
                reason: "signature was not verified".to_string(),
            }),
            None => Ok(self),
        }
    }
}

/// Verification failures surfaced to callers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VerificationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Verification failed at {stage}: {reason}")]
    Failed { stage: Stage, reason: String },
}
