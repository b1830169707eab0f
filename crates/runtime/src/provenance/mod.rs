//! Build provenance for signed plans
//!
//! One immutable record per signed plan: subject digest, builder identity,
//! build type, source materials and build timing. Stored next to the plan
//! as `<plan>.provenance`, independent of the policy attestation.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::attestation::{load_sidecar, save_sidecar, AttestationError, PROVENANCE_SUFFIX};

pub mod generator;
pub mod source;
pub mod types;

pub use generator::{sha256_file, BuildContext, BuilderIdentity, ProvenanceGenerator};
pub use source::{GitSource, SourceInfo, SourceMetadata, StaticSource};
pub use types::SlsaProvenance;

/// Provenance generation errors
#[derive(Error, Debug, Clone)]
pub enum ProvenanceError {
    #[error("Failed to hash plan: {0}")]
    Io(String),

    #[error(transparent)]
    Attestation(#[from] AttestationError),
}

/// Write `<plan>.provenance`
pub fn save_provenance(plan: &Path, record: &SlsaProvenance) -> Result<PathBuf, AttestationError> {
    save_sidecar(plan, PROVENANCE_SUFFIX, record)
}

/// Read `<plan>.provenance`; [`AttestationError::Missing`] when none was written
pub fn load_provenance(plan: &Path) -> Result<SlsaProvenance, AttestationError> {
    load_sidecar(plan, PROVENANCE_SUFFIX)
}
