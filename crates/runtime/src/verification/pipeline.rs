//! Four-stage verification run before a plan is trusted

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::types::{Stage, StageOutcome, VerificationReport};
use crate::attestation::AttestationError;
use crate::policy::load_attestation;
use crate::provenance::load_provenance;
use crate::signing::{SigningTool, VerificationIdentity};

/// Default maximum plan age
pub const DEFAULT_FRESHNESS_THRESHOLD: Duration = Duration::from_secs(24 * 60 * 60);

/// signature → policy attestation → provenance → freshness
///
/// The first fatal stage ends the run. An absent attestation or provenance
/// record is a warning; a present but unreadable one is fatal.
pub struct VerificationPipeline {
    tool: Arc<dyn SigningTool>,
    freshness_threshold: Duration,
}

impl VerificationPipeline {
    pub fn new(tool: Arc<dyn SigningTool>) -> Self {
        Self {
            tool,
            freshness_threshold: DEFAULT_FRESHNESS_THRESHOLD,
        }
    }

    pub fn with_freshness_threshold(mut self, threshold: Duration) -> Self {
        self.freshness_threshold = threshold;
        self
    }

    pub fn freshness_threshold(&self) -> Duration {
        self.freshness_threshold
    }

    pub async fn verify(&self, plan: &Path, identity: &VerificationIdentity) -> VerificationReport {
        self.verify_at(plan, identity, Utc::now()).await
    }

    /// Run the pipeline judging freshness against `now`
    pub async fn verify_at(
        &self,
        plan: &Path,
        identity: &VerificationIdentity,
        now: DateTime<Utc>,
    ) -> VerificationReport {
        let mut report = VerificationReport::new(plan.to_path_buf());
        tracing::info!("Verifying plan at {} with {}", plan.display(), identity);

        match self.tool.verify(plan, identity).await {
            Ok(()) => report.record(Stage::Signature, StageOutcome::Passed("signature valid".into())),
            Err(e) => {
                fail(&mut report, Stage::Signature, e.to_string());
                return report;
            }
        }

        match load_attestation(plan) {
            Ok(result) if result.passed => report.record(
                Stage::PolicyAttestation,
                StageOutcome::Passed("policy compliance verified".into()),
            ),
            Ok(result) => {
                fail(
                    &mut report,
                    Stage::PolicyAttestation,
                    format!("plan failed policy checks: {} violations", result.violations.len()),
                );
                return report;
            }
            Err(AttestationError::Missing { .. }) => warn(
                &mut report,
                Stage::PolicyAttestation,
                "no policy attestation found (plan may predate policy checks)",
            ),
            Err(e) => {
                fail(&mut report, Stage::PolicyAttestation, e.to_string());
                return report;
            }
        }

        let provenance = match load_provenance(plan) {
            Ok(record) => {
                report.builder_id = Some(record.builder_id().to_string());
                report.build_type = Some(record.build_type().to_string());
                report.record(
                    Stage::Provenance,
                    StageOutcome::Passed(format!(
                        "builder {} ({})",
                        record.builder_id(),
                        record.build_type()
                    )),
                );
                record
            }
            Err(AttestationError::Missing { .. }) => {
                warn(
                    &mut report,
                    Stage::Provenance,
                    "no provenance found (plan may predate provenance generation)",
                );
                report.record(
                    Stage::Freshness,
                    StageOutcome::Skipped("no build timestamp without provenance".into()),
                );
                return report;
            }
            Err(e) => {
                fail(&mut report, Stage::Provenance, e.to_string());
                return report;
            }
        };

        // A timestamp in the future reads as zero age.
        let age = (now - provenance.build_finished_on())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let hours = age.as_secs_f64() / 3600.0;
        report.age_hours = Some(hours);

        if age > self.freshness_threshold {
            fail(
                &mut report,
                Stage::Freshness,
                format!(
                    "plan is stale ({:.1} hours old, max {})",
                    hours,
                    humantime::format_duration(self.freshness_threshold)
                ),
            );
        } else {
            report.record(
                Stage::Freshness,
                StageOutcome::Passed(format!("plan is fresh ({:.1} hours old)", hours)),
            );
        }
        report
    }
}

fn fail(report: &mut VerificationReport, stage: Stage, reason: String) {
    tracing::error!("Verification failed at {}: {}", stage, reason);
    report.record(stage, StageOutcome::Failed(reason));
}

fn warn(report: &mut VerificationReport, stage: Stage, reason: &str) {
    tracing::warn!("{}: {}", stage, reason);
    report.record(stage, StageOutcome::Warning(reason.to_string()));
}
