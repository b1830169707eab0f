//! Plan-to-JSON converters

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;

use super::{PlanDocument, PlanError};
use crate::config::TerraformConfig;

/// Turns an opaque plan file into its structured view
#[async_trait]
pub trait PlanConverter: Send + Sync {
    async fn convert(&self, plan: &Path) -> Result<PlanDocument, PlanError>;

    /// Version string of the underlying tool, for provenance
    async fn tool_version(&self) -> Option<String> {
        None
    }
}

/// `terraform show -json` wrapper
pub struct TerraformCli {
    pub config: TerraformConfig,
}

impl TerraformCli {
    pub fn new() -> Self {
        Self {
            config: TerraformConfig::default(),
        }
    }

    pub fn with_config(config: TerraformConfig) -> Self {
        Self { config }
    }

    pub(crate) fn command(&self) -> TokioCommand {
        let mut cmd = TokioCommand::new(&self.config.binary);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    pub(crate) fn not_found(&self, e: std::io::Error) -> PlanError {
        if e.kind() == std::io::ErrorKind::NotFound {
            PlanError::BinaryNotFound {
                binary: self.config.binary.clone(),
            }
        } else {
            PlanError::Io(e.to_string())
        }
    }

    /// Run with captured output and the configured timeout, returning stdout
    async fn execute_command(&self, args: &[&str]) -> Result<Vec<u8>, PlanError> {
        let mut cmd = self.command();
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!("Running {} {}", self.config.binary, args.join(" "));

        let output = timeout(
            Duration::from_secs(self.config.timeout_seconds),
            cmd.output(),
        )
        .await
        .map_err(|_| PlanError::Timeout {
            seconds: self.config.timeout_seconds,
        })?
        .map_err(|e| self.not_found(e))?;

        if !output.status.success() {
            return Err(PlanError::ExecutionFailed {
                reason: format!(
                    "exit code {:?}: {}",
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(output.stdout)
    }
}

impl Default for TerraformCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlanConverter for TerraformCli {
    async fn convert(&self, plan: &Path) -> Result<PlanDocument, PlanError> {
        let plan_arg = plan.to_str().ok_or_else(|| {
            PlanError::InvalidArguments(format!("plan path is not UTF-8: {}", plan.display()))
        })?;
        let stdout = self.execute_command(&["show", "-json", plan_arg]).await?;
        PlanDocument::from_json_slice(&stdout)
    }

    async fn tool_version(&self) -> Option<String> {
        let stdout = self.execute_command(&["version", "-json"]).await.ok()?;
        let value: serde_json::Value = serde_json::from_slice(&stdout).ok()?;
        value
            .get("terraform_version")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

/// Reads a plan that was already converted to JSON
pub struct JsonFileConverter {
    path: PathBuf,
}

impl JsonFileConverter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PlanConverter for JsonFileConverter {
    async fn convert(&self, _plan: &Path) -> Result<PlanDocument, PlanError> {
        let data = tokio::fs::read(&self.path)
            .await
            .map_err(|e| PlanError::Io(format!("{}: {}", self.path.display(), e)))?;
        PlanDocument::from_json_slice(&data)
    }
}
