//! Plan signing: the external signing tool and the local signing workflow

pub mod cli_wrapper;
pub mod signer;
pub mod types;

pub use cli_wrapper::{
    extract_signature_from_bundle, signature_path, CosignCli, MockSigningTool, SigningTool,
};
pub use signer::{PlanSigner, SignOptions, SignWorkflowError, SigningReport};
pub use types::{SignatureArtifacts, SigningError, VerificationIdentity, DEFAULT_OIDC_ISSUER};
