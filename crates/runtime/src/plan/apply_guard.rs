//! Verification gate in front of `terraform apply`

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;

use super::{PlanError, TerraformCli};
use crate::signing::VerificationIdentity;
use crate::verification::{VerificationError, VerificationPipeline, VerificationReport};

/// Flags whose value may follow as a separate argument
const VALUE_FLAGS: &[&str] = &[
    "-var",
    "-var-file",
    "-target",
    "-replace",
    "-state",
    "-state-out",
    "-backup",
    "-lock-timeout",
    "-parallelism",
];

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("no arguments provided to the planning tool")]
    NoArguments,

    #[error("PLAN VERIFICATION FAILED: {0}. Aborting apply.")]
    Verification(#[from] VerificationError),

    #[error("planning tool execution failed: {0}")]
    Tool(#[from] PlanError),
}

/// Runs the wrapped tool with the caller's terminal attached
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Returns the exit code
    async fn run(&self, args: &[String]) -> Result<i32, PlanError>;
}

#[async_trait]
impl ToolRunner for TerraformCli {
    async fn run(&self, args: &[String]) -> Result<i32, PlanError> {
        tracing::debug!("Running {} {}", self.config.binary, args.join(" "));
        let status = self
            .command()
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| self.not_found(e))?;
        Ok(status.code().unwrap_or(1))
    }
}

/// What the guard decided before running the tool
#[derive(Debug, Clone)]
pub enum ApplyDecision {
    /// Not an apply; passed through untouched
    PassThrough,
    /// Apply of a plan file that verified
    Verified(VerificationReport),
    /// Apply without a plan file; nothing to verify
    Unverified,
}

/// Wraps tool invocations, verifying the plan of every `apply`
pub struct ApplyGuard {
    pipeline: VerificationPipeline,
    identity: Option<VerificationIdentity>,
    runner: Arc<dyn ToolRunner>,
}

impl ApplyGuard {
    pub fn new(
        pipeline: VerificationPipeline,
        identity: Option<VerificationIdentity>,
        runner: Arc<dyn ToolRunner>,
    ) -> Self {
        Self {
            pipeline,
            identity,
            runner,
        }
    }

    /// Plan-file argument of an `apply`: the last positional argument
    pub fn plan_argument(args: &[String]) -> Option<&str> {
        if args.first().map(String::as_str) != Some("apply") {
            return None;
        }
        let mut positional = None;
        let mut skip_next = false;
        for arg in &args[1..] {
            if skip_next {
                skip_next = false;
                continue;
            }
            if arg.starts_with('-') {
                skip_next = VALUE_FLAGS.contains(&arg.as_str());
                continue;
            }
            positional = Some(arg.as_str());
        }
        positional
    }

    /// Decide whether `args` may run
    pub async fn check(&self, args: &[String]) -> Result<ApplyDecision, GuardError> {
        if args.is_empty() {
            return Err(GuardError::NoArguments);
        }
        if args[0] != "apply" {
            return Ok(ApplyDecision::PassThrough);
        }

        let Some(plan) = Self::plan_argument(args) else {
            tracing::warn!(
                "No plan file detected in arguments. Skipping verification (this might be insecure)."
            );
            return Ok(ApplyDecision::Unverified);
        };

        tracing::info!("Intercepted 'apply' command. Verifying plan: {}", plan);
        let identity = self.identity.as_ref().ok_or_else(|| {
            VerificationError::InvalidInput(
                "either a key or an identity must be provided for verification".to_string(),
            )
        })?;

        let report = self
            .pipeline
            .verify(Path::new(plan), identity)
            .await
            .into_result()?;
        Ok(ApplyDecision::Verified(report))
    }

    /// Check, then run the tool. Returns its exit code.
    pub async fn execute(&self, args: &[String]) -> Result<i32, GuardError> {
        self.check(args).await?;
        Ok(self.runner.run(args).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::{MockSigningTool, SigningTool};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl ToolRunner for RecordingRunner {
        async fn run(&self, args: &[String]) -> Result<i32, PlanError> {
            self.calls.lock().unwrap().push(args.to_vec());
            Ok(0)
        }
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn guard(
        tool: Arc<MockSigningTool>,
        runner: Arc<RecordingRunner>,
        identity: Option<VerificationIdentity>,
    ) -> ApplyGuard {
        ApplyGuard::new(VerificationPipeline::new(tool), identity, runner)
    }

    fn key() -> Option<VerificationIdentity> {
        Some(VerificationIdentity::Key {
            path: "cosign.pub".into(),
        })
    }

    #[test]
    fn test_plan_argument_detection() {
        assert_eq!(
            ApplyGuard::plan_argument(&args(&["apply", "-auto-approve", "tfplan"])),
            Some("tfplan")
        );
        assert_eq!(
            ApplyGuard::plan_argument(&args(&["apply", "tfplan", "-var", "region=eu"])),
            Some("tfplan")
        );
        assert_eq!(ApplyGuard::plan_argument(&args(&["apply", "-auto-approve"])), None);
        assert_eq!(ApplyGuard::plan_argument(&args(&["plan", "-out", "tfplan"])), None);
    }

    #[tokio::test]
    async fn test_unverifiable_apply_never_runs() {
        let dir = TempDir::new().unwrap();
        let plan = dir.path().join("tfplan");
        std::fs::write(&plan, b"unsigned").unwrap();

        let runner = Arc::new(RecordingRunner::default());
        let guard = guard(Arc::new(MockSigningTool::new_success()), runner.clone(), key());
        let plan_arg = plan.to_string_lossy().to_string();

        let result = guard.execute(&args(&["apply", &plan_arg])).await;
        assert!(matches!(result, Err(GuardError::Verification(_))));
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_signed_apply_runs() {
        let dir = TempDir::new().unwrap();
        let plan = dir.path().join("tfplan");
        std::fs::write(&plan, b"signed").unwrap();
        let tool = Arc::new(MockSigningTool::new_success());
        tool.sign(&plan, None).await.unwrap();

        let runner = Arc::new(RecordingRunner::default());
        let guard = guard(tool, runner.clone(), key());
        let plan_arg = plan.to_string_lossy().to_string();

        let code = guard.execute(&args(&["apply", &plan_arg])).await.unwrap();
        assert_eq!(code, 0);
        assert_eq!(runner.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_identity_and_passthrough() {
        let runner = Arc::new(RecordingRunner::default());
        let guard = guard(Arc::new(MockSigningTool::new_success()), runner.clone(), None);

        let result = guard.check(&args(&["apply", "tfplan"])).await;
        assert!(matches!(
            result,
            Err(GuardError::Verification(VerificationError::InvalidInput(_)))
        ));

        assert!(matches!(
            guard.check(&args(&["apply"])).await.unwrap(),
            ApplyDecision::Unverified
        ));
        assert!(matches!(
            guard.check(&args(&["init"])).await.unwrap(),
            ApplyDecision::PassThrough
        ));
        assert!(matches!(guard.check(&[]).await, Err(GuardError::NoArguments)));
    }
}
