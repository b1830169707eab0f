//! Verification Pipeline Integration Tests
//!
//! Signs plans through the full local workflow (policy gate, attestation,
//! provenance, mock signing tool) and checks the consumer-side verdicts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use plansign_runtime::attestation::{sidecar_path, POLICY_SUFFIX, PROVENANCE_SUFFIX};
use plansign_runtime::plan::{ApplyDecision, ApplyGuard, JsonFileConverter, PlanError, ToolRunner};
use plansign_runtime::policy::{save_attestation, PolicyEngine, PolicyEvaluationResult, PolicyViolation};
use plansign_runtime::provenance::{BuilderIdentity, ProvenanceGenerator, SourceInfo, StaticSource};
use plansign_runtime::signing::{
    MockSigningTool, PlanSigner, SignOptions, SignWorkflowError, VerificationIdentity,
};
use plansign_runtime::verification::{Stage, StageOutcome, VerificationPipeline};
use serde_json::json;
use std::sync::Mutex;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    plan: PathBuf,
    plan_json: PathBuf,
    tool: Arc<MockSigningTool>,
}

fn fixture(after: serde_json::Value) -> Fixture {
    let dir = TempDir::new().unwrap();
    let plan = dir.path().join("tfplan");
    std::fs::write(&plan, b"opaque binary plan").unwrap();

    let plan_json = dir.path().join("tfplan.json");
    let doc = json!({
        "terraform_version": "1.7.5",
        "resource_changes": [{
            "address": "aws_instance.web",
            "type": "aws_instance",
            "change": {"actions": ["create"], "before": null, "after": after}
        }]
    });
    std::fs::write(&plan_json, serde_json::to_vec(&doc).unwrap()).unwrap();

    Fixture {
        _dir: dir,
        plan,
        plan_json,
        tool: Arc::new(MockSigningTool::new_success()),
    }
}

fn clean_fixture() -> Fixture {
    fixture(json!({"tags": {"Environment": "prod", "Owner": "ops"}}))
}

fn signer(fx: &Fixture) -> PlanSigner {
    let source = StaticSource(SourceInfo {
        uri: "https://git.example.com/infra.git".into(),
        commit: "0123456789abcdef0123456789abcdef01234567".into(),
    });
    PlanSigner::new(
        Arc::new(JsonFileConverter::new(&fx.plan_json)),
        PolicyEngine::with_default_rules().unwrap(),
        ProvenanceGenerator::new(BuilderIdentity("urn:plansign:builder:test".into()), Box::new(source)),
        fx.tool.clone(),
    )
}

fn pipeline(fx: &Fixture) -> VerificationPipeline {
    VerificationPipeline::new(fx.tool.clone())
}

fn identity() -> VerificationIdentity {
    VerificationIdentity::Key {
        path: PathBuf::from("cosign.pub"),
    }
}

#[tokio::test]
async fn test_fresh_signed_plan_verifies() {
    let fx = clean_fixture();
    let report = signer(&fx).sign(&fx.plan, &SignOptions::default()).await.unwrap();
    assert!(report.policy.as_ref().unwrap().passed);
    assert_eq!(report.policy_attestation, Some(sidecar_path(&fx.plan, POLICY_SUFFIX)));

    let now = Utc::now() + ChronoDuration::hours(1);
    let verdict = pipeline(&fx).verify_at(&fx.plan, &identity(), now).await;
    assert!(verdict.passed(), "stages: {:?}", verdict.stages);
    assert!(verdict.warnings().is_empty());
    assert_eq!(verdict.builder_id.as_deref(), Some("urn:plansign:builder:test"));
    assert!(verdict.age_hours.unwrap() >= 0.9);
}

#[tokio::test]
async fn test_failed_attestation_is_fatal_at_stage_two() {
    let fx = clean_fixture();
    signer(&fx).sign(&fx.plan, &SignOptions::default()).await.unwrap();

    let failed = PolicyEvaluationResult::from_violations(vec![PolicyViolation {
        policy: "no-public-s3".into(),
        message: "S3 bucket 'x' has public ACL: public-read".into(),
    }]);
    save_attestation(&fx.plan, &failed).unwrap();

    let verdict = pipeline(&fx).verify(&fx.plan, &identity()).await;
    assert!(!verdict.passed());
    let failure = verdict.failure().unwrap();
    assert_eq!(failure.stage, Stage::PolicyAttestation);
    assert!(verdict.outcome(Stage::Provenance).is_none());
    assert!(verdict.into_result().is_err());
}

#[tokio::test]
async fn test_stale_provenance_fails_freshness() {
    let fx = clean_fixture();
    signer(&fx).sign(&fx.plan, &SignOptions::default()).await.unwrap();

    let later = Utc::now() + ChronoDuration::hours(30);
    let verdict = pipeline(&fx).verify_at(&fx.plan, &identity(), later).await;
    assert!(!verdict.passed());
    assert_eq!(verdict.failure().unwrap().stage, Stage::Freshness);
    assert!(verdict.failure().unwrap().outcome.detail().contains("stale"));

    // a longer configured threshold accepts the same plan
    let lenient = pipeline(&fx).with_freshness_threshold(std::time::Duration::from_secs(48 * 3600));
    assert!(lenient.verify_at(&fx.plan, &identity(), later).await.passed());
}

#[tokio::test]
async fn test_unattested_plan_passes_with_two_warnings() {
    let fx = clean_fixture();
    let report = signer(&fx)
        .sign(&fx.plan, &SignOptions::default())
        .await
        .unwrap();
    std::fs::remove_file(report.policy_attestation.unwrap()).unwrap();
    std::fs::remove_file(sidecar_path(&fx.plan, PROVENANCE_SUFFIX)).unwrap();

    let verdict = pipeline(&fx).verify(&fx.plan, &identity()).await;
    assert!(verdict.passed());
    assert!(verdict.failure().is_none());
    let warned: Vec<_> = verdict.warnings().iter().map(|s| s.stage).collect();
    assert_eq!(warned, vec![Stage::PolicyAttestation, Stage::Provenance]);
    assert!(matches!(
        verdict.outcome(Stage::Freshness),
        Some(StageOutcome::Skipped(_))
    ));
}

#[tokio::test]
async fn test_tampered_plan_fails_signature_stage() {
    let fx = clean_fixture();
    signer(&fx).sign(&fx.plan, &SignOptions::default()).await.unwrap();
    std::fs::write(&fx.plan, b"swapped plan").unwrap();

    let verdict = pipeline(&fx).verify(&fx.plan, &identity()).await;
    assert_eq!(verdict.failure().unwrap().stage, Stage::Signature);
    assert_eq!(verdict.stages.len(), 1);
}

#[tokio::test]
async fn test_policy_violations_abort_signing() {
    let fx = fixture(json!({"tags": {"Name": "web"}}));
    let result = signer(&fx).sign(&fx.plan, &SignOptions::default()).await;

    match result {
        Err(SignWorkflowError::PolicyViolations { violations }) => {
            assert_eq!(violations.len(), 2);
        }
        other => panic!("expected policy violations, got {:?}", other.map(|r| r.plan)),
    }
    assert_eq!(fx.tool.sign_calls(), 0);
    assert!(!sidecar_path(&fx.plan, POLICY_SUFFIX).exists());
    assert!(!sidecar_path(&fx.plan, PROVENANCE_SUFFIX).exists());
}

struct RecordingRunner(Mutex<Vec<Vec<String>>>);

#[async_trait::async_trait]
impl ToolRunner for RecordingRunner {
    async fn run(&self, args: &[String]) -> Result<i32, PlanError> {
        self.0.lock().unwrap().push(args.to_vec());
        Ok(0)
    }
}

fn apply_args(plan: &Path) -> Vec<String> {
    vec![
        "apply".to_string(),
        "-auto-approve".to_string(),
        plan.display().to_string(),
    ]
}

#[tokio::test]
async fn test_apply_guard_runs_only_verified_plans() {
    let fx = clean_fixture();
    signer(&fx).sign(&fx.plan, &SignOptions::default()).await.unwrap();

    let runner = Arc::new(RecordingRunner(Mutex::new(Vec::new())));
    let guard = ApplyGuard::new(pipeline(&fx), Some(identity()), runner.clone());

    let args = apply_args(&fx.plan);
    assert!(matches!(
        guard.check(&args).await.unwrap(),
        ApplyDecision::Verified(_)
    ));
    assert_eq!(guard.execute(&args).await.unwrap(), 0);
    assert_eq!(runner.0.lock().unwrap().len(), 1);

    std::fs::write(&fx.plan, b"tampered").unwrap();
    assert!(guard.execute(&args).await.is_err());
    assert_eq!(runner.0.lock().unwrap().len(), 1);
}
