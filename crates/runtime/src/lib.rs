//! Plansign runtime
//!
//! Review workflow, policy gate, provenance recorder and verification
//! pipeline for signed infrastructure plans. The HTTP surface lives behind
//! the `http-api` feature; everything else is always built.

pub mod attestation;
pub mod client;
pub mod config;
pub mod logging;
pub mod plan;
pub mod policy;
pub mod prelude;
pub mod provenance;
pub mod review;
pub mod signing;
pub mod store;
pub mod types;
pub mod verification;

#[cfg(feature = "http-api")]
pub mod api;

// Re-export commonly used types
pub use client::{ClientError, ReviewClient, WaitOutcome};
pub use config::{Config, ConfigError};
pub use review::{ReviewWorkflowService, ReviewerCredentials, ReviewerRegistry};
pub use store::{FileSubmissionStore, SubmissionStore};
pub use types::*;

use std::sync::Arc;
use thiserror::Error;

/// Failures while assembling the service from configuration
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Cannot open storage root: {0}")]
    Storage(#[from] StoreError),

    #[error("Cannot load reviewers: {0}")]
    Reviewers(#[from] review::RegistryError),
}

/// Open the configured store and reviewer allow-list and wire the service
pub fn open_review_service(config: &Config) -> Result<ReviewWorkflowService, StartupError> {
    let store = FileSubmissionStore::open(&config.storage.root)?;
    tracing::info!(
        root = %config.storage.root.display(),
        lockdown = store.lockdown_active(),
        "Opened submission store"
    );

    let reviewers = match &config.review.reviewers_file {
        Some(path) => ReviewerRegistry::load_from_file(path)?,
        None => ReviewerRegistry::empty(),
    };

    Ok(ReviewWorkflowService::new(Arc::new(store), reviewers))
}
