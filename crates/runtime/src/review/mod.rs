//! Review workflow: reviewer allow-list and the orchestrating service

pub mod reviewers;
pub mod service;

pub use reviewers::{RegistryError, ReviewerRecord, ReviewerRegistry};
pub use service::{ArtifactStream, ReviewWorkflowService, ReviewerCredentials, DEFAULT_REVIEWER};
