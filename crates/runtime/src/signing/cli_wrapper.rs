//! Cosign CLI wrapper
//!
//! Signing and signature verification are delegated to the external
//! `cosign` binary. The wrapper builds argument lists, enforces a timeout and
//! turns exit codes into [`SigningError`]s.

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;

use super::types::{SignatureArtifacts, SigningError, VerificationIdentity};
use crate::attestation::{sidecar_path, BUNDLE_SUFFIX, CERTIFICATE_SUFFIX, SIGNATURE_SUFFIX};
use crate::config::SigningConfig;

/// Trait for signing-tool operations
#[async_trait]
pub trait SigningTool: Send + Sync {
    /// Produce `<plan>.sig` (and possibly a bundle) for `plan`.
    /// Without a key the tool signs keyless.
    async fn sign(&self, plan: &Path, key: Option<&Path>)
        -> Result<SignatureArtifacts, SigningError>;

    /// Check `<plan>.sig` against `plan`
    async fn verify(
        &self,
        plan: &Path,
        identity: &VerificationIdentity,
    ) -> Result<(), SigningError>;
}

/// Cosign CLI wrapper implementation
pub struct CosignCli {
    pub config: SigningConfig,
}

impl CosignCli {
    pub fn new() -> Self {
        Self {
            config: SigningConfig::default(),
        }
    }

    pub fn with_config(config: SigningConfig) -> Self {
        Self { config }
    }

    /// Argument list for `cosign sign-blob`
    pub fn sign_args(plan: &Path, key: Option<&Path>) -> Vec<String> {
        let mut args = vec![
            "sign-blob".to_string(),
            "--yes".to_string(),
            "--bundle".to_string(),
            path_arg(&sidecar_path(plan, BUNDLE_SUFFIX)),
            "--tlog-upload=false".to_string(),
        ];
        if let Some(key) = key {
            args.push("--key".to_string());
            args.push(path_arg(key));
        }
        args.push(path_arg(plan));
        args
    }

    /// Argument list for `cosign verify-blob`
    pub fn verify_args(plan: &Path, identity: &VerificationIdentity) -> Vec<String> {
        let mut args = vec![
            "verify-blob".to_string(),
            "--signature".to_string(),
            path_arg(&sidecar_path(plan, SIGNATURE_SUFFIX)),
        ];
        match identity {
            VerificationIdentity::Key { path } => {
                args.push("--key".to_string());
                args.push(path_arg(path));
                args.push("--insecure-ignore-tlog=true".to_string());
            }
            VerificationIdentity::Keyless { identity, issuer } => {
                args.push("--certificate".to_string());
                args.push(path_arg(&sidecar_path(plan, CERTIFICATE_SUFFIX)));
                args.push("--certificate-identity".to_string());
                args.push(identity.clone());
                args.push("--certificate-oidc-issuer".to_string());
                args.push(issuer.clone());
            }
        }
        args.push(path_arg(plan));
        args
    }

    /// Execute a command with the CLI binary
    async fn execute_command(&self, args: Vec<String>) -> Result<String, SigningError> {
        let mut cmd = TokioCommand::new(&self.config.cosign_binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!("Running {} {}", self.config.cosign_binary, args.join(" "));

        let output = timeout(Duration::from_secs(self.config.timeout_seconds), cmd.output())
            .await
            .map_err(|_| SigningError::Timeout {
                seconds: self.config.timeout_seconds,
            })?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SigningError::BinaryNotFound {
                        binary: self.config.cosign_binary.clone(),
                    }
                } else {
                    SigningError::Io(e.to_string())
                }
            })?;

        if !output.status.success() {
            return Err(SigningError::ExecutionFailed {
                reason: format!(
                    "Command failed with exit code {:?}. stderr: {}",
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Default for CosignCli {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Bundle {
    #[serde(default)]
    message_signature: Option<MessageSignature>,
}

#[derive(Deserialize)]
struct MessageSignature {
    #[serde(default)]
    signature: String,
}

/// Copy `messageSignature.signature` out of a cosign bundle into `sig_path`
pub fn extract_signature_from_bundle(bundle: &Path, sig_path: &Path) -> Result<(), SigningError> {
    let data = std::fs::read(bundle)
        .map_err(|e| SigningError::BundleInvalid(format!("{}: {}", bundle.display(), e)))?;
    let parsed: Bundle =
        serde_json::from_slice(&data).map_err(|e| SigningError::BundleInvalid(e.to_string()))?;

    let signature = parsed
        .message_signature
        .map(|m| m.signature)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SigningError::BundleInvalid("signature not found in bundle".to_string()))?;

    // Already base64 in the bundle.
    std::fs::write(sig_path, signature.as_bytes())
        .map_err(|e| SigningError::Io(format!("{}: {}", sig_path.display(), e)))
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[async_trait]
impl SigningTool for CosignCli {
    async fn sign(
        &self,
        plan: &Path,
        key: Option<&Path>,
    ) -> Result<SignatureArtifacts, SigningError> {
        if !plan.exists() {
            return Err(SigningError::InvalidInput(format!(
                "plan file not found: {}",
                plan.display()
            )));
        }
        if let Some(key) = key {
            if !key.exists() {
                return Err(SigningError::InvalidInput(format!(
                    "signing key not found: {}",
                    key.display()
                )));
            }
        }

        self.execute_command(Self::sign_args(plan, key)).await?;

        let bundle = sidecar_path(plan, BUNDLE_SUFFIX);
        let signature = sidecar_path(plan, SIGNATURE_SUFFIX);
        extract_signature_from_bundle(&bundle, &signature)?;

        Ok(SignatureArtifacts {
            signature,
            bundle: Some(bundle),
        })
    }

    async fn verify(
        &self,
        plan: &Path,
        identity: &VerificationIdentity,
    ) -> Result<(), SigningError> {
        let signature = sidecar_path(plan, SIGNATURE_SUFFIX);
        if !signature.exists() {
            return Err(SigningError::SignatureMissing {
                path: signature.display().to_string(),
            });
        }
        if let VerificationIdentity::Keyless { .. } = identity {
            let certificate = sidecar_path(plan, CERTIFICATE_SUFFIX);
            if !certificate.exists() {
                return Err(SigningError::CertificateMissing {
                    path: certificate.display().to_string(),
                });
            }
        }

        match self.execute_command(Self::verify_args(plan, identity)).await {
            Ok(_) => Ok(()),
            Err(SigningError::ExecutionFailed { reason }) => {
                Err(SigningError::VerificationFailed(reason))
            }
            Err(e) => Err(e),
        }
    }
}

/// Mock implementation for testing.
///
/// Signatures are `mock:<sha256 of plan>`, so verification detects a plan
/// modified after signing.
pub struct MockSigningTool {
    should_succeed: bool,
    sign_calls: AtomicUsize,
    verify_calls: AtomicUsize,
}

impl MockSigningTool {
    /// Create a new mock that signs and verifies honestly
    pub fn new_success() -> Self {
        Self {
            should_succeed: true,
            sign_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
        }
    }

    /// Create a new mock that always fails
    pub fn new_failure() -> Self {
        Self {
            should_succeed: false,
            ..Self::new_success()
        }
    }

    /// Signature bytes the mock produces for `plan_bytes`
    pub fn signature_for(plan_bytes: &[u8]) -> String {
        format!("mock:{}", hex::encode(Sha256::digest(plan_bytes)))
    }

    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    fn read(path: &Path) -> Result<Vec<u8>, SigningError> {
        std::fs::read(path).map_err(|e| SigningError::Io(format!("{}: {}", path.display(), e)))
    }
}

#[async_trait]
impl SigningTool for MockSigningTool {
    async fn sign(
        &self,
        plan: &Path,
        _key: Option<&Path>,
    ) -> Result<SignatureArtifacts, SigningError> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        if !self.should_succeed {
            return Err(SigningError::ExecutionFailed {
                reason: "Mock signing failed".to_string(),
            });
        }
        let signature = sidecar_path(plan, SIGNATURE_SUFFIX);
        let plan_bytes = Self::read(plan)?;
        std::fs::write(&signature, Self::signature_for(&plan_bytes))
            .map_err(|e| SigningError::Io(e.to_string()))?;
        Ok(SignatureArtifacts {
            signature,
            bundle: None,
        })
    }

    async fn verify(
        &self,
        plan: &Path,
        _identity: &VerificationIdentity,
    ) -> Result<(), SigningError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        if !self.should_succeed {
            return Err(SigningError::VerificationFailed(
                "Mock verification failed".to_string(),
            ));
        }
        let signature_path = sidecar_path(plan, SIGNATURE_SUFFIX);
        if !signature_path.exists() {
            return Err(SigningError::SignatureMissing {
                path: signature_path.display().to_string(),
            });
        }
        let expected = Self::signature_for(&Self::read(plan)?);
        let actual = Self::read(&signature_path)?;
        if actual != expected.as_bytes() {
            return Err(SigningError::VerificationFailed(
                "signature does not match plan contents".to_string(),
            ));
        }
        Ok(())
    }
}

/// Detached signature location for `plan`
pub fn signature_path(plan: &Path) -> PathBuf {
    sidecar_path(plan, SIGNATURE_SUFFIX)
}
