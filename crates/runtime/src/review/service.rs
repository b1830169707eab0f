//! Review workflow orchestration
//!
//! `ReviewWorkflowService` is the transport-agnostic core behind the HTTP
//! surface. It enforces the lockdown gate, the pending -> approved|rejected
//! state machine and reviewer authentication on top of a `SubmissionStore`.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::reviewers::ReviewerRegistry;
use crate::store::{BlobReader, SubmissionStore};
use crate::types::{ArtifactKind, ReviewError, Submission, SubmissionId};

/// Reviewer name recorded when no credential and no claimed name is supplied
pub const DEFAULT_REVIEWER: &str = "admin";

/// Credentials presented with a review action
#[derive(Debug, Clone, Default)]
pub struct ReviewerCredentials {
    /// Raw bearer token
    pub token: Option<String>,
    /// Reviewer name claimed by the caller, only trusted in unauthenticated mode
    pub claimed_reviewer: Option<String>,
}

impl ReviewerCredentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            claimed_reviewer: None,
        }
    }

    pub fn claimed(reviewer: impl Into<String>) -> Self {
        Self {
            token: None,
            claimed_reviewer: Some(reviewer.into()),
        }
    }
}

/// An opened artifact ready to be streamed to a caller
pub struct ArtifactStream {
    pub file: tokio::fs::File,
    pub len: u64,
    pub kind: ArtifactKind,
}

/// Orchestrates submissions, approvals, rejections and the lockdown switch
pub struct ReviewWorkflowService {
    store: Arc<dyn SubmissionStore>,
    reviewers: ReviewerRegistry,
    transition_locks: DashMap<SubmissionId, Arc<Mutex<()>>>,
}

impl ReviewWorkflowService {
    pub fn new(store: Arc<dyn SubmissionStore>, reviewers: ReviewerRegistry) -> Self {
        if !reviewers.has_records() {
            tracing::warn!(
                "No reviewer allow-list configured; approvals are accepted without authentication"
            );
        }
        Self {
            store,
            reviewers,
            transition_locks: DashMap::new(),
        }
    }

    /// Fails with `LockdownActive` while the kill switch is engaged.
    ///
    /// Transport adapters call this before parsing their own inputs so a
    /// malformed request still sees the lockdown first.
    pub fn ensure_open(&self) -> Result<(), ReviewError> {
        if self.store.lockdown_active() {
            return Err(ReviewError::LockdownActive);
        }
        Ok(())
    }

    pub async fn submit(
        &self,
        plan: BlobReader<'_>,
        submitter: &str,
    ) -> Result<Submission, ReviewError> {
        self.ensure_open()?;
        let submitter = submitter.trim();
        if submitter.is_empty() {
            return Err(ReviewError::Validation("submitter must not be empty".into()));
        }

        let submission = self.store.create(plan, submitter).await?;
        tracing::info!(
            submission_id = %submission.id,
            submitter = %submission.submitter,
            plan_hash = %submission.plan_hash,
            "Plan submitted for review"
        );
        Ok(submission)
    }

    pub async fn status(&self, id: &str) -> Result<Submission, ReviewError> {
        self.ensure_open()?;
        let id = parse_id(id)?;
        Ok(self.store.get(id).await?)
    }

    pub async fn list_pending(&self) -> Result<Vec<Submission>, ReviewError> {
        self.ensure_open()?;
        Ok(self.store.list_pending().await?)
    }

    /// Open the plan or signature blob of a submission for streaming
    pub async fn download(&self, id: &str, kind: ArtifactKind) -> Result<ArtifactStream, ReviewError> {
        self.ensure_open()?;
        let id = parse_id(id)?;
        self.store.get(id).await?;

        let path = self.store.artifact_path(id, kind);
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ReviewError::NotFound(format!("{} for submission {}", kind, id)))
            }
            Err(e) => return Err(ReviewError::Storage(e.to_string())),
        };
        let len = file
            .metadata()
            .await
            .map_err(|e| ReviewError::Storage(e.to_string()))?
            .len();

        Ok(ArtifactStream { file, len, kind })
    }

    /// Store a detached signature and approve the submission
    pub async fn upload_signature(
        &self,
        id: &str,
        signature: BlobReader<'_>,
        credentials: &ReviewerCredentials,
    ) -> Result<Submission, ReviewError> {
        self.ensure_open()?;
        let id = parse_id(id)?;
        let reviewer = self.authorize(credentials, "approve")?;

        let lock = self.transition_lock(id);
        let _guard = lock.lock().await;

        let mut submission = self.store.get(id).await?;
        // Reject before touching the blob so an approved signature is never replaced
        submission.approve(&reviewer, Utc::now())?;

        let written = self.store.write_signature(id, signature).await?;
        if written == 0 {
            self.discard_signature(id).await;
            return Err(ReviewError::Validation("signature body is empty".into()));
        }

        // A pending submission never exposes a signature
        let persisted = match self.store.update(&submission).await {
            Ok(persisted) => persisted,
            Err(e) => {
                self.discard_signature(id).await;
                return Err(e.into());
            }
        };
        self.release_lock(id);

        tracing::info!(
            submission_id = %id,
            reviewer = %reviewer,
            signature_bytes = written,
            "Submission approved"
        );
        Ok(persisted)
    }

    pub async fn reject(
        &self,
        id: &str,
        reason: &str,
        credentials: &ReviewerCredentials,
    ) -> Result<Submission, ReviewError> {
        self.ensure_open()?;
        let id = parse_id(id)?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ReviewError::Validation("rejection reason must not be empty".into()));
        }
        let reviewer = self.authorize(credentials, "reject")?;

        let lock = self.transition_lock(id);
        let _guard = lock.lock().await;

        let mut submission = self.store.get(id).await?;
        submission.reject(&reviewer, reason, Utc::now())?;
        let persisted = self.store.update(&submission).await?;
        self.release_lock(id);

        tracing::info!(
            submission_id = %id,
            reviewer = %reviewer,
            reason = %reason,
            "Submission rejected"
        );
        Ok(persisted)
    }

    /// Engage or lift the kill switch. Never gated by lockdown itself.
    ///
    /// Engaging needs no credential. Lifting requires a reviewer token once
    /// an allow-list is configured.
    pub async fn set_lockdown(
        &self,
        active: bool,
        credentials: &ReviewerCredentials,
    ) -> Result<bool, ReviewError> {
        let actor = if active {
            credentials
                .claimed_reviewer
                .clone()
                .unwrap_or_else(|| "anonymous".to_string())
        } else {
            self.authorize(credentials, "lift lockdown")?
        };

        self.store.set_lockdown(active).await?;
        if active {
            tracing::warn!(actor = %actor, "Emergency lockdown ENGAGED");
        } else {
            tracing::warn!(actor = %actor, "Emergency lockdown lifted");
        }
        Ok(active)
    }

    pub fn lockdown_active(&self) -> bool {
        self.store.lockdown_active()
    }

    /// Resolve the reviewer performing `action`
    fn authorize(
        &self,
        credentials: &ReviewerCredentials,
        action: &str,
    ) -> Result<String, ReviewError> {
        if self.reviewers.has_records() {
            let token = credentials.token.as_deref().ok_or_else(|| {
                ReviewError::Unauthorized(format!("a reviewer token is required to {}", action))
            })?;
            return self
                .reviewers
                .authenticate(token)
                .map(str::to_string)
                .ok_or_else(|| {
                    tracing::warn!(action, "Rejected unknown or revoked reviewer token");
                    ReviewError::Unauthorized("unknown or revoked reviewer token".into())
                });
        }

        let reviewer = credentials
            .claimed_reviewer
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_REVIEWER)
            .to_string();
        tracing::warn!(
            reviewer = %reviewer,
            action,
            "Unauthenticated review action accepted"
        );
        Ok(reviewer)
    }

    fn transition_lock(&self, id: SubmissionId) -> Arc<Mutex<()>> {
        self.transition_locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn discard_signature(&self, id: SubmissionId) {
        let path = self.store.signature_blob_path(id);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::error!(
                    submission_id = %id,
                    "Failed to remove signature of unapproved submission: {}",
                    e
                );
            }
        }
    }

    /// Terminal submissions never transition again, so their lock can go
    fn release_lock(&self, id: SubmissionId) {
        self.transition_locks.remove(&id);
    }
}

fn parse_id(raw: &str) -> Result<SubmissionId, ReviewError> {
    raw.trim()
        .parse()
        .map_err(|_| ReviewError::Validation(format!("invalid submission id '{}'", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::reviewers::ReviewerRecord;
    use crate::store::FileSubmissionStore;
    use crate::types::{StoreError, SubmissionStatus};
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn blob(data: &'static [u8]) -> BlobReader<'static> {
        Box::pin(data)
    }

    fn service(dir: &TempDir, reviewers: ReviewerRegistry) -> ReviewWorkflowService {
        let store = FileSubmissionStore::open(dir.path()).unwrap();
        ReviewWorkflowService::new(Arc::new(store), reviewers)
    }

    fn registry() -> ReviewerRegistry {
        ReviewerRegistry::from_records(vec![ReviewerRecord {
            reviewer: "alice".into(),
            token_hash: ReviewerRegistry::hash_token("alice-token").unwrap(),
            description: "platform team".into(),
            revoked: false,
        }])
    }

    #[tokio::test]
    async fn test_submit_then_approve() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, ReviewerRegistry::empty());

        let sub = svc.submit(blob(b"plan-bytes"), "ci").await.unwrap();
        assert_eq!(sub.status, SubmissionStatus::Pending);

        let approved = svc
            .upload_signature(
                &sub.id.to_string(),
                blob(b"sig"),
                &ReviewerCredentials::claimed("bob"),
            )
            .await
            .unwrap();
        assert_eq!(approved.status, SubmissionStatus::Approved);
        assert_eq!(approved.reviewed_by.as_deref(), Some("bob"));
        assert!(approved.signed_at.is_some());

        let mut artifact = svc
            .download(&sub.id.to_string(), ArtifactKind::Signature)
            .await
            .unwrap();
        let mut body = Vec::new();
        artifact.file.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"sig");
        assert_eq!(artifact.len, 3);
    }

    #[tokio::test]
    async fn test_default_reviewer_name() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, ReviewerRegistry::empty());
        let sub = svc.submit(blob(b"p"), "ci").await.unwrap();

        let approved = svc
            .upload_signature(&sub.id.to_string(), blob(b"s"), &ReviewerCredentials::default())
            .await
            .unwrap();
        assert_eq!(approved.reviewed_by.as_deref(), Some(DEFAULT_REVIEWER));
    }

    #[tokio::test]
    async fn test_terminal_submission_keeps_its_signature() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, ReviewerRegistry::empty());
        let sub = svc.submit(blob(b"p"), "ci").await.unwrap();
        let id = sub.id.to_string();
        let creds = ReviewerCredentials::default();

        svc.upload_signature(&id, blob(b"first"), &creds).await.unwrap();

        let second = svc.upload_signature(&id, blob(b"second"), &creds).await;
        assert!(matches!(second, Err(ReviewError::InvalidTransition { .. })));
        let reject = svc.reject(&id, "too late", &creds).await;
        assert!(matches!(reject, Err(ReviewError::InvalidTransition { .. })));

        let mut artifact = svc.download(&id, ArtifactKind::Signature).await.unwrap();
        let mut body = Vec::new();
        artifact.file.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"first");
        assert_eq!(svc.status(&id).await.unwrap().status, SubmissionStatus::Approved);
    }

    #[tokio::test]
    async fn test_signature_absent_while_pending() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, ReviewerRegistry::empty());
        let sub = svc.submit(blob(b"p"), "ci").await.unwrap();

        let result = svc.download(&sub.id.to_string(), ArtifactKind::Signature).await;
        assert!(matches!(result, Err(ReviewError::NotFound(_))));
        assert!(svc.download(&sub.id.to_string(), ArtifactKind::Plan).await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_signature_is_rejected() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, ReviewerRegistry::empty());
        let sub = svc.submit(blob(b"p"), "ci").await.unwrap();
        let id = sub.id.to_string();

        let result = svc
            .upload_signature(&id, blob(b""), &ReviewerCredentials::default())
            .await;
        assert!(matches!(result, Err(ReviewError::Validation(_))));
        assert_eq!(svc.status(&id).await.unwrap().status, SubmissionStatus::Pending);
        assert!(svc.download(&id, ArtifactKind::Signature).await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_ids() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, ReviewerRegistry::empty());

        assert!(matches!(
            svc.status("../../etc/passwd").await,
            Err(ReviewError::Validation(_))
        ));
        assert!(matches!(
            svc.status(&SubmissionId::new().to_string()).await,
            Err(ReviewError::NotFound(_))
        ));
        assert!(matches!(
            svc.upload_signature(
                &SubmissionId::new().to_string(),
                blob(b"s"),
                &ReviewerCredentials::default()
            )
            .await,
            Err(ReviewError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reject_requires_reason() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, ReviewerRegistry::empty());
        let sub = svc.submit(blob(b"p"), "ci").await.unwrap();
        let id = sub.id.to_string();
        let creds = ReviewerCredentials::claimed("carol");

        assert!(matches!(
            svc.reject(&id, "   ", &creds).await,
            Err(ReviewError::Validation(_))
        ));

        let rejected = svc.reject(&id, "opens ssh to the world", &creds).await.unwrap();
        assert_eq!(rejected.status, SubmissionStatus::Rejected);
        assert_eq!(rejected.reviewed_by.as_deref(), Some("carol"));
        assert_eq!(
            rejected.rejection_reason.as_deref(),
            Some("opens ssh to the world")
        );
        assert!(svc.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_registry_enforces_tokens() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, registry());
        let sub = svc.submit(blob(b"p"), "ci").await.unwrap();
        let id = sub.id.to_string();

        let anonymous = svc
            .upload_signature(&id, blob(b"s"), &ReviewerCredentials::claimed("alice"))
            .await;
        assert!(matches!(anonymous, Err(ReviewError::Unauthorized(_))));

        let forged = svc
            .upload_signature(&id, blob(b"s"), &ReviewerCredentials::bearer("guess"))
            .await;
        assert!(matches!(forged, Err(ReviewError::Unauthorized(_))));
        assert_eq!(svc.status(&id).await.unwrap().status, SubmissionStatus::Pending);

        let approved = svc
            .upload_signature(&id, blob(b"s"), &ReviewerCredentials::bearer("alice-token"))
            .await
            .unwrap();
        assert_eq!(approved.reviewed_by.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_lockdown_gate() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, ReviewerRegistry::empty());
        let sub = svc.submit(blob(b"p"), "ci").await.unwrap();
        let id = sub.id.to_string();
        let creds = ReviewerCredentials::default();

        assert!(svc.set_lockdown(true, &creds).await.unwrap());
        assert!(svc.lockdown_active());

        assert!(matches!(
            svc.submit(blob(b"p"), "ci").await,
            Err(ReviewError::LockdownActive)
        ));
        assert!(matches!(svc.status(&id).await, Err(ReviewError::LockdownActive)));
        assert!(matches!(svc.list_pending().await, Err(ReviewError::LockdownActive)));
        assert!(matches!(
            svc.download(&id, ArtifactKind::Plan).await,
            Err(ReviewError::LockdownActive)
        ));
        assert!(matches!(
            svc.upload_signature(&id, blob(b"s"), &creds).await,
            Err(ReviewError::LockdownActive)
        ));
        assert!(matches!(
            svc.reject(&id, "no", &creds).await,
            Err(ReviewError::LockdownActive)
        ));

        // toggling is always reachable, including repeated engagement
        assert!(svc.set_lockdown(true, &creds).await.unwrap());
        assert!(!svc.set_lockdown(false, &creds).await.unwrap());
        assert_eq!(svc.status(&id).await.unwrap().status, SubmissionStatus::Pending);
    }

    #[tokio::test]
    async fn test_lifting_lockdown_needs_token_with_registry() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, registry());

        // engaging never needs a credential
        svc.set_lockdown(true, &ReviewerCredentials::default())
            .await
            .unwrap();

        let denied = svc
            .set_lockdown(false, &ReviewerCredentials::default())
            .await;
        assert!(matches!(denied, Err(ReviewError::Unauthorized(_))));
        assert!(svc.lockdown_active());

        svc.set_lockdown(false, &ReviewerCredentials::bearer("alice-token"))
            .await
            .unwrap();
        assert!(!svc.lockdown_active());
    }

    #[tokio::test]
    async fn test_racing_approvals_produce_one_winner() {
        let dir = TempDir::new().unwrap();
        let svc = Arc::new(service(&dir, ReviewerRegistry::empty()));
        let sub = svc.submit(blob(b"p"), "ci").await.unwrap();
        let id = sub.id.to_string();

        let mut handles = Vec::new();
        for i in 0..8 {
            let svc = Arc::clone(&svc);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                svc.upload_signature(
                    &id,
                    blob(b"sig"),
                    &ReviewerCredentials::claimed(format!("reviewer-{}", i)),
                )
                .await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(e) => assert!(matches!(
                    e,
                    ReviewError::InvalidTransition { .. } | ReviewError::Conflict { .. }
                )),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(svc.status(&id).await.unwrap().version, 1);
    }

    /// Delegates to a file store but refuses to persist metadata rewrites
    struct FailingUpdateStore(FileSubmissionStore);

    #[async_trait::async_trait]
    impl SubmissionStore for FailingUpdateStore {
        async fn create(
            &self,
            plan: BlobReader<'_>,
            submitter: &str,
        ) -> Result<Submission, StoreError> {
            self.0.create(plan, submitter).await
        }

        async fn get(&self, id: SubmissionId) -> Result<Submission, StoreError> {
            self.0.get(id).await
        }

        async fn list_pending(&self) -> Result<Vec<Submission>, StoreError> {
            self.0.list_pending().await
        }

        async fn update(&self, _submission: &Submission) -> Result<Submission, StoreError> {
            Err(StoreError::Io("disk full".into()))
        }

        async fn write_signature(
            &self,
            id: SubmissionId,
            signature: BlobReader<'_>,
        ) -> Result<u64, StoreError> {
            self.0.write_signature(id, signature).await
        }

        fn plan_blob_path(&self, id: SubmissionId) -> std::path::PathBuf {
            self.0.plan_blob_path(id)
        }

        fn signature_blob_path(&self, id: SubmissionId) -> std::path::PathBuf {
            self.0.signature_blob_path(id)
        }

        fn lockdown_active(&self) -> bool {
            self.0.lockdown_active()
        }

        async fn set_lockdown(&self, active: bool) -> Result<(), StoreError> {
            self.0.set_lockdown(active).await
        }
    }

    #[tokio::test]
    async fn test_failed_approval_leaves_no_signature() {
        let dir = TempDir::new().unwrap();
        let store = FailingUpdateStore(FileSubmissionStore::open(dir.path()).unwrap());
        let svc = ReviewWorkflowService::new(Arc::new(store), ReviewerRegistry::empty());

        let sub = svc.submit(blob(b"plan-bytes"), "ci").await.unwrap();
        let id = sub.id.to_string();

        let err = svc
            .upload_signature(&id, blob(b"sig"), &ReviewerCredentials::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::Storage(_)));

        assert_eq!(svc.status(&id).await.unwrap().status, SubmissionStatus::Pending);
        assert!(matches!(
            svc.download(&id, ArtifactKind::Signature).await,
            Err(ReviewError::NotFound(_))
        ));
    }
}
