//! Durable submission storage
//!
//! The store exclusively owns the persisted form of every submission: its
//! metadata record, the plan blob and the optional signature blob. It also
//! owns the service-wide lockdown flag so the kill switch is persisted through
//! the same write path as submission metadata.

use async_trait::async_trait;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::io::AsyncRead;

use crate::types::{ArtifactKind, StoreError, Submission, SubmissionId};

pub mod file_store;

pub use file_store::FileSubmissionStore;

/// Byte source streamed into the store
pub type BlobReader<'a> = Pin<Box<dyn AsyncRead + Send + 'a>>;

/// Raised inside a `BlobReader` when the source exceeds its size limit.
///
/// Wrap it in an `io::Error`; the store reports it as
/// `StoreError::PayloadTooLarge` instead of an I/O failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlobTooLarge;

impl std::fmt::Display for BlobTooLarge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "upload exceeds the configured size limit")
    }
}

impl std::error::Error for BlobTooLarge {}

/// Persistence contract for submissions and their artifacts
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Persist a new plan blob and its `pending` metadata record.
    ///
    /// Readers never observe a submission whose metadata or blob is missing.
    async fn create(
        &self,
        plan: BlobReader<'_>,
        submitter: &str,
    ) -> Result<Submission, StoreError>;

    /// Fetch the latest metadata record for a submission
    async fn get(&self, id: SubmissionId) -> Result<Submission, StoreError>;

    /// All records currently `pending`, oldest first. Unreadable records are skipped.
    async fn list_pending(&self) -> Result<Vec<Submission>, StoreError>;

    /// Rewrite a metadata record.
    ///
    /// The caller's `version` must match the persisted one; terminal records
    /// are never rewritten. Returns the record as persisted (version bumped).
    async fn update(&self, submission: &Submission) -> Result<Submission, StoreError>;

    /// Store the detached signature for a submission, replacing any previous blob.
    /// Returns the number of bytes written.
    async fn write_signature(
        &self,
        id: SubmissionId,
        signature: BlobReader<'_>,
    ) -> Result<u64, StoreError>;

    /// Location of the plan blob
    fn plan_blob_path(&self, id: SubmissionId) -> PathBuf;

    /// Location of the signature blob
    fn signature_blob_path(&self, id: SubmissionId) -> PathBuf;

    /// Location of either artifact
    fn artifact_path(&self, id: SubmissionId, kind: ArtifactKind) -> PathBuf {
        match kind {
            ArtifactKind::Plan => self.plan_blob_path(id),
            ArtifactKind::Signature => self.signature_blob_path(id),
        }
    }

    /// Fast, non-blocking read of the persisted lockdown flag
    fn lockdown_active(&self) -> bool;

    /// Persist a new lockdown flag value
    async fn set_lockdown(&self, active: bool) -> Result<(), StoreError>;
}
