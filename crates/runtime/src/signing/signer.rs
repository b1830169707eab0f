//! Local signing workflow
//!
//! convert → evaluate policy → persist attestation → persist provenance →
//! sign. A plan with violations is never signed and never gets a passing
//! attestation.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use super::cli_wrapper::SigningTool;
use super::types::SigningError;
use crate::attestation::{sidecar_path, AttestationError, POLICY_SUFFIX};
use crate::plan::{PlanConverter, PlanError};
use crate::policy::{save_attestation, PolicyEngine, PolicyEvaluationResult, PolicyViolation};
use crate::provenance::{save_provenance, BuildContext, ProvenanceError, ProvenanceGenerator};

/// Signing workflow errors
#[derive(Error, Debug)]
pub enum SignWorkflowError {
    #[error("plan failed {} policy check(s) - signing aborted", violations.len())]
    PolicyViolations { violations: Vec<PolicyViolation> },

    #[error("policy evaluation failed: {0}")]
    Plan(#[from] PlanError),

    #[error("failed to save attestation: {0}")]
    Attestation(#[from] AttestationError),

    #[error("provenance generation failed: {0}")]
    Provenance(#[from] ProvenanceError),

    #[error("signing failed: {0}")]
    Signing(#[from] SigningError),
}

/// Per-run signing options
#[derive(Debug, Clone, Default)]
pub struct SignOptions {
    /// Private key; keyless signing when absent
    pub key: Option<PathBuf>,
    /// Skip conversion and policy evaluation (plan already gated upstream)
    pub skip_policy: bool,
    /// Recorded as `buildStartedOn`; defaults to the signing time
    pub build_started: Option<DateTime<Utc>>,
}

/// Everything a successful run wrote
#[derive(Debug, Clone)]
pub struct SigningReport {
    pub plan: PathBuf,
    pub policy: Option<PolicyEvaluationResult>,
    pub policy_attestation: Option<PathBuf>,
    pub provenance: PathBuf,
    pub signature: PathBuf,
    pub bundle: Option<PathBuf>,
}

/// Orchestrates the signing workflow for one plan at a time
pub struct PlanSigner {
    converter: Arc<dyn PlanConverter>,
    policy: PolicyEngine,
    provenance: ProvenanceGenerator,
    tool: Arc<dyn SigningTool>,
}

impl PlanSigner {
    pub fn new(
        converter: Arc<dyn PlanConverter>,
        policy: PolicyEngine,
        provenance: ProvenanceGenerator,
        tool: Arc<dyn SigningTool>,
    ) -> Self {
        Self {
            converter,
            policy,
            provenance,
            tool,
        }
    }

    pub async fn sign(
        &self,
        plan: &Path,
        options: &SignOptions,
    ) -> Result<SigningReport, SignWorkflowError> {
        tracing::info!("Signing plan at {}", plan.display());

        let (policy, policy_attestation) = if options.skip_policy {
            tracing::info!("Policy evaluation skipped for {}", plan.display());
            (None, None)
        } else {
            let document = self.converter.convert(plan).await?;
            let result = self.policy.evaluate(&document);
            if !result.passed {
                discard_stale_attestation(plan);
                for violation in &result.violations {
                    tracing::warn!(policy = %violation.policy, "{}", violation.message);
                }
                return Err(SignWorkflowError::PolicyViolations {
                    violations: result.violations,
                });
            }
            let path = save_attestation(plan, &result)?;
            tracing::info!("All policy checks passed");
            (Some(result), Some(path))
        };

        let context = BuildContext {
            started_on: options.build_started,
            tool_version: self.converter.tool_version().await,
        };
        let record = self.provenance.generate(plan, &context)?;
        let provenance = save_provenance(plan, &record)?;
        tracing::info!(builder = %record.builder_id(), "Provenance generated");

        match &options.key {
            Some(key) => tracing::info!("Signing with key: {}", key.display()),
            None => tracing::info!("Signing keyless (OIDC)"),
        }
        let artifacts = self.tool.sign(plan, options.key.as_deref()).await?;

        Ok(SigningReport {
            plan: plan.to_path_buf(),
            policy,
            policy_attestation,
            provenance,
            signature: artifacts.signature,
            bundle: artifacts.bundle,
        })
    }
}

/// A failing run must not leave an earlier passing attestation behind.
fn discard_stale_attestation(plan: &Path) {
    let path = sidecar_path(plan, POLICY_SUFFIX);
    match std::fs::remove_file(&path) {
        Ok(()) => tracing::warn!("Removed stale attestation {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::error!("Failed to remove stale attestation {}: {}", path.display(), e),
    }
}
