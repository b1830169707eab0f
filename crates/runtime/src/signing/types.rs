//! Signing tool types and errors

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Issuer assumed for keyless verification when none is given
pub const DEFAULT_OIDC_ISSUER: &str = "https://github.com/login/oauth";

/// Signing and signature verification errors
#[derive(Error, Debug, Clone)]
pub enum SigningError {
    #[error("Signing tool not found: {binary}")]
    BinaryNotFound { binary: String },

    #[error("Signing tool timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Signing tool failed: {reason}")]
    ExecutionFailed { reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Signature file not found: {path}")]
    SignatureMissing { path: String },

    #[error("Certificate file not found: {path} (required for keyless verification)")]
    CertificateMissing { path: String },

    #[error("Invalid signing bundle: {0}")]
    BundleInvalid(String),

    #[error("Signature verification failed: {0}")]
    VerificationFailed(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// How a signature is checked: exactly one mode per verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum VerificationIdentity {
    /// Public key file
    Key { path: PathBuf },
    /// Certificate identity and OIDC issuer
    Keyless { identity: String, issuer: String },
}

impl VerificationIdentity {
    /// Build from optional CLI-style inputs.
    ///
    /// Fails with `InvalidInput` when both or neither of `key` and `identity`
    /// are given. A missing issuer falls back to [`DEFAULT_OIDC_ISSUER`].
    pub fn from_options(
        key: Option<PathBuf>,
        identity: Option<String>,
        issuer: Option<String>,
    ) -> Result<Self, SigningError> {
        let identity = identity.filter(|i| !i.trim().is_empty());
        match (key, identity) {
            (Some(_), Some(_)) => Err(SigningError::InvalidInput(
                "choose either a key or an identity, not both".to_string(),
            )),
            (None, None) => Err(SigningError::InvalidInput(
                "either a key or an identity must be provided for verification".to_string(),
            )),
            (Some(path), None) => Ok(Self::Key { path }),
            (None, Some(identity)) => Ok(Self::Keyless {
                identity,
                issuer: issuer
                    .filter(|i| !i.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_OIDC_ISSUER.to_string()),
            }),
        }
    }
}

impl std::fmt::Display for VerificationIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Key { path } => write!(f, "key {}", path.display()),
            Self::Keyless { identity, issuer } => write!(f, "identity {} ({})", identity, issuer),
        }
    }
}

/// Files produced by a signing run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureArtifacts {
    /// Detached base64 signature
    pub signature: PathBuf,
    /// Full bundle, when the tool produced one
    pub bundle: Option<PathBuf>,
}
