//! Prelude for pipeline integrations.
//!
//! Import the signing, verification and review entry points with a single line:
//!
//! ```ignore
//! use plansign_runtime::prelude::*;
//! ```

// Plan model and policy gate
pub use crate::plan::{PlanConverter, PlanDocument, ResourceChange, TerraformCli};
pub use crate::policy::{PolicyEngine, PolicyEvaluationResult, PolicyViolation};

// Signing and provenance
pub use crate::provenance::{BuilderIdentity, GitSource, ProvenanceGenerator, SlsaProvenance};
pub use crate::signing::{
    CosignCli, MockSigningTool, PlanSigner, SignOptions, SigningTool, VerificationIdentity,
};

// Consumer-side verification
pub use crate::verification::{Stage, StageOutcome, VerificationPipeline, VerificationReport};

// Review workflow
pub use crate::client::{ReviewClient, WaitOutcome};
pub use crate::review::{ReviewWorkflowService, ReviewerCredentials, ReviewerRegistry};
pub use crate::store::{FileSubmissionStore, SubmissionStore};
pub use crate::types::{ArtifactKind, Submission, SubmissionId, SubmissionStatus};

// HTTP surface (feature-gated)
#[cfg(feature = "http-api")]
pub use crate::api::{create_router, HttpApiServer};
