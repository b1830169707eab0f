//! Builds provenance records for signed plans

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

use super::source::SourceMetadata;
use super::types::*;
use super::ProvenanceError;

const LOCAL_BUILDER: &str = "urn:plansign:builder:local";

/// Which system produced the plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderIdentity(pub String);

impl BuilderIdentity {
    /// Detect from the process environment
    pub fn detect() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Detect using `lookup` for variable access
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if set("GITHUB_ACTIONS").is_some_and(|v| v == "true") {
            return Self("https://github.com/actions/runner/v2".to_string());
        }
        if set("GITLAB_CI").is_some() {
            let server = set("CI_SERVER_URL").unwrap_or_else(|| "https://gitlab.com".to_string());
            return Self(format!("{}/gitlab-runner", server.trim_end_matches('/')));
        }
        if let Some(jenkins) = set("JENKINS_URL") {
            return Self(jenkins);
        }
        Self(LOCAL_BUILDER.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Timing and tool details for one build
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    /// Defaults to the moment generation runs
    pub started_on: Option<DateTime<Utc>>,
    /// Planning tool version for the invocation environment
    pub tool_version: Option<String>,
}

/// Creates one provenance record per plan
pub struct ProvenanceGenerator {
    builder: BuilderIdentity,
    source: Box<dyn SourceMetadata>,
}

impl ProvenanceGenerator {
    pub fn new(builder: BuilderIdentity, source: Box<dyn SourceMetadata>) -> Self {
        Self { builder, source }
    }

    pub fn generate(
        &self,
        plan: &Path,
        context: &BuildContext,
    ) -> Result<SlsaProvenance, ProvenanceError> {
        self.generate_at(plan, context, Utc::now())
    }

    /// Same as [`generate`](Self::generate) with an explicit finish time
    pub fn generate_at(
        &self,
        plan: &Path,
        context: &BuildContext,
        finished_on: DateTime<Utc>,
    ) -> Result<SlsaProvenance, ProvenanceError> {
        let plan_digest = sha256_file(plan)?;
        let source = self.source.describe();
        let source_digest = BTreeMap::from([("sha1".to_string(), source.commit.clone())]);

        let mut environment = BTreeMap::new();
        environment.insert(
            "TERRAFORM_VERSION".to_string(),
            context
                .tool_version
                .clone()
                .unwrap_or_else(|| UNKNOWN.to_string()),
        );

        Ok(SlsaProvenance {
            statement_type: STATEMENT_TYPE.to_string(),
            predicate_type: PREDICATE_TYPE.to_string(),
            subject: vec![Subject {
                name: plan.display().to_string(),
                digest: BTreeMap::from([("sha256".to_string(), plan_digest)]),
            }],
            predicate: Predicate {
                builder: Builder {
                    id: self.builder.as_str().to_string(),
                },
                build_type: BUILD_TYPE.to_string(),
                invocation: Invocation {
                    config_source: ConfigSource {
                        uri: source.uri.clone(),
                        digest: source_digest.clone(),
                        entry_point: Some("terraform plan".to_string()),
                    },
                    environment,
                },
                metadata: BuildMetadata {
                    build_started_on: context.started_on.unwrap_or(finished_on),
                    build_finished_on: finished_on,
                    completeness: Completeness {
                        parameters: true,
                        environment: true,
                        materials: true,
                    },
                    reproducible: false,
                },
                materials: vec![Material {
                    uri: source.uri,
                    digest: source_digest,
                }],
            },
        })
    }
}

/// Hex SHA-256 of a file's contents
pub fn sha256_file(path: &Path) -> Result<String, ProvenanceError> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| ProvenanceError::Io(format!("{}: {}", path.display(), e)))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)
        .map_err(|e| ProvenanceError::Io(format!("{}: {}", path.display(), e)))?;
    Ok(hex::encode(hasher.finalize()))
}
