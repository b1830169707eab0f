//! Security policy gate for plans
//!
//! The engine evaluates a converted plan against a rule set and returns a
//! [`PolicyEvaluationResult`]. The signing workflow persists that result as
//! an attestation next to the plan; verification loads it back.

use std::path::{Path, PathBuf};

use crate::attestation::{load_sidecar, save_sidecar, AttestationError, POLICY_SUFFIX};

pub mod engine;
pub mod rules;
pub mod types;

pub use engine::PolicyEngine;
pub use rules::{PolicyRule, RuleInput};
pub use types::{
    PolicyError, PolicyEvaluationResult, PolicyViolation, RuleCheck, RuleDefinition, RuleSet,
    DEFAULT_RULES_YAML,
};

/// Write `<plan>.policy`
pub fn save_attestation(
    plan: &Path,
    result: &PolicyEvaluationResult,
) -> Result<PathBuf, AttestationError> {
    save_sidecar(plan, POLICY_SUFFIX, result)
}

/// Read `<plan>.policy`; [`AttestationError::Missing`] when none was written
pub fn load_attestation(plan: &Path) -> Result<PolicyEvaluationResult, AttestationError> {
    load_sidecar(plan, POLICY_SUFFIX)
}
