//! Filesystem-backed submission store
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/service-state.json        lockdown flag
//! <root>/<id>/plan                 plan blob (immutable)
//! <root>/<id>/plan.sig             detached signature (after approval)
//! <root>/<id>/metadata.json        submission record
//! <root>/.staging-<id>/            in-flight create, never listed
//! ```
//!
//! Every JSON record is written to a temp file in the target directory,
//! fsynced and renamed into place, so concurrent readers only ever see a
//! complete old record or a complete new one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{BlobReader, BlobTooLarge, SubmissionStore};
use crate::types::{StoreError, Submission, SubmissionId, SubmissionStatus};

const PLAN_FILE: &str = "plan";
const SIGNATURE_FILE: &str = "plan.sig";
const METADATA_FILE: &str = "metadata.json";
const STATE_FILE: &str = "service-state.json";
const STAGING_PREFIX: &str = ".staging-";
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Service-wide state persisted next to the submissions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ServiceState {
    lockdown: bool,
    #[serde(default)]
    changed_at: Option<DateTime<Utc>>,
}

/// Submission store rooted at a directory on local disk
pub struct FileSubmissionStore {
    root: PathBuf,
    lockdown: AtomicBool,
    state_lock: Mutex<()>,
    record_locks: DashMap<SubmissionId, Arc<Mutex<()>>>,
}

impl FileSubmissionStore {
    /// Open (or create) a store at `root`, restoring the persisted lockdown flag.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            StoreError::Io(format!(
                "Failed to create storage directory {}: {}",
                root.display(),
                e
            ))
        })?;

        let state_path = root.join(STATE_FILE);
        let lockdown = match std::fs::read(&state_path) {
            Ok(bytes) => match serde_json::from_slice::<ServiceState>(&bytes) {
                Ok(state) => state.lockdown,
                Err(e) => {
                    // Unreadable kill switch: fail closed until an operator toggles it.
                    tracing::error!(
                        "Service state at {} is unreadable ({}); starting in lockdown",
                        state_path.display(),
                        e
                    );
                    true
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        if lockdown {
            tracing::warn!("Storage opened with EMERGENCY LOCKDOWN active");
        }
        tracing::info!("Submission store ready at {}", root.display());

        Ok(Self {
            root,
            lockdown: AtomicBool::new(lockdown),
            state_lock: Mutex::new(()),
            record_locks: DashMap::new(),
        })
    }

    /// Storage root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn submission_dir(&self, id: SubmissionId) -> PathBuf {
        self.root.join(id.to_string())
    }

    fn record_lock(&self, id: SubmissionId) -> Arc<Mutex<()>> {
        self.record_locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn populate_staging(
        &self,
        staging: &Path,
        id: SubmissionId,
        plan: BlobReader<'_>,
        submitter: &str,
    ) -> Result<Submission, StoreError> {
        let (bytes, plan_hash) = stream_to_file(plan, &staging.join(PLAN_FILE)).await?;
        let submission = Submission::pending(id, plan_hash, submitter.to_string());
        write_json_atomic(staging, METADATA_FILE, &submission).await?;
        tracing::debug!("Staged plan {} ({} bytes)", id, bytes);
        Ok(submission)
    }

    async fn read_record(&self, id: SubmissionId) -> Result<Submission, StoreError> {
        let path = self.submission_dir(id).join(METADATA_FILE);
        match read_json::<Submission>(&path).await? {
            Some(submission) => Ok(submission),
            None => Err(StoreError::NotFound { id }),
        }
    }
}

#[async_trait]
impl SubmissionStore for FileSubmissionStore {
    async fn create(
        &self,
        plan: BlobReader<'_>,
        submitter: &str,
    ) -> Result<Submission, StoreError> {
        let id = SubmissionId::new();
        let final_dir = self.submission_dir(id);
        if tokio::fs::try_exists(&final_dir).await? {
            return Err(StoreError::AlreadyExists { id });
        }

        let staging = self.root.join(format!("{}{}", STAGING_PREFIX, id));
        tokio::fs::create_dir(&staging).await.map_err(|e| {
            if e.kind() == ErrorKind::AlreadyExists {
                StoreError::AlreadyExists { id }
            } else {
                e.into()
            }
        })?;

        let staged = self.populate_staging(&staging, id, plan, submitter).await;
        let submission = match staged {
            Ok(submission) => submission,
            Err(e) => {
                remove_dir_quietly(&staging).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&staging, &final_dir).await {
            remove_dir_quietly(&staging).await;
            return Err(StoreError::Io(format!(
                "Failed to publish submission {}: {}",
                id, e
            )));
        }

        tracing::info!(
            submission_id = %id,
            submitter = %submission.submitter,
            plan_hash = %submission.plan_hash,
            "Stored plan submission"
        );
        Ok(submission)
    }

    async fn get(&self, id: SubmissionId) -> Result<Submission, StoreError> {
        self.read_record(id).await
    }

    async fn list_pending(&self) -> Result<Vec<Submission>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(|e| {
            StoreError::Io(format!(
                "Failed to read storage directory {}: {}",
                self.root.display(),
                e
            ))
        })?;

        let mut pending = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            match tokio::fs::metadata(entry.path()).await {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!("Skipping unreadable storage entry {}: {}", name, e);
                    continue;
                }
            }
            let Ok(id) = name.parse::<SubmissionId>() else {
                tracing::debug!("Ignoring foreign directory in storage root: {}", name);
                continue;
            };

            match self.read_record(id).await {
                Ok(submission) if submission.status == SubmissionStatus::Pending => {
                    pending.push(submission)
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping unreadable submission {}: {}", id, e),
            }
        }

        pending.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(pending)
    }

    async fn update(&self, submission: &Submission) -> Result<Submission, StoreError> {
        let id = submission.id;
        let lock = self.record_lock(id);
        let _guard = lock.lock().await;

        let current = self.read_record(id).await?;
        if current.status.is_terminal() {
            return Err(StoreError::TerminalState {
                id,
                status: current.status,
            });
        }
        if current.version != submission.version {
            return Err(StoreError::VersionConflict {
                id,
                expected: submission.version,
                found: current.version,
            });
        }

        let mut next = submission.clone();
        // Creation facts are immutable regardless of what the caller sends.
        next.submitted_at = current.submitted_at;
        next.plan_hash = current.plan_hash;
        next.submitter = current.submitter;
        next.version = current.version + 1;

        write_json_atomic(&self.submission_dir(id), METADATA_FILE, &next).await?;

        if next.status.is_terminal() {
            self.record_locks.remove(&id);
        }
        tracing::info!(
            submission_id = %id,
            status = %next.status,
            version = next.version,
            "Updated submission"
        );
        Ok(next)
    }

    async fn write_signature(
        &self,
        id: SubmissionId,
        signature: BlobReader<'_>,
    ) -> Result<u64, StoreError> {
        let dir = self.submission_dir(id);
        if !tokio::fs::try_exists(dir.join(METADATA_FILE)).await? {
            return Err(StoreError::NotFound { id });
        }

        let temp = dir.join(format!(".{}.{}.tmp", SIGNATURE_FILE, Uuid::new_v4()));
        let written = match stream_to_file(signature, &temp).await {
            Ok((bytes, _)) => bytes,
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp).await;
                return Err(e);
            }
        };
        if let Err(e) = tokio::fs::rename(&temp, dir.join(SIGNATURE_FILE)).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }

        tracing::debug!("Stored signature for {} ({} bytes)", id, written);
        Ok(written)
    }

    fn plan_blob_path(&self, id: SubmissionId) -> PathBuf {
        self.submission_dir(id).join(PLAN_FILE)
    }

    fn signature_blob_path(&self, id: SubmissionId) -> PathBuf {
        self.submission_dir(id).join(SIGNATURE_FILE)
    }

    fn lockdown_active(&self) -> bool {
        self.lockdown.load(Ordering::SeqCst)
    }

    async fn set_lockdown(&self, active: bool) -> Result<(), StoreError> {
        let _guard = self.state_lock.lock().await;
        let state = ServiceState {
            lockdown: active,
            changed_at: Some(Utc::now()),
        };
        write_json_atomic(&self.root, STATE_FILE, &state).await?;
        self.lockdown.store(active, Ordering::SeqCst);
        Ok(())
    }
}

/// Copy `reader` into a new file at `path`, returning the byte count and hex SHA-256.
async fn stream_to_file(
    mut reader: BlobReader<'_>,
    path: &Path,
) -> Result<(u64, String), StoreError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| {
                if e.get_ref().is_some_and(|inner| inner.is::<BlobTooLarge>()) {
                    StoreError::PayloadTooLarge(e.to_string())
                } else {
                    StoreError::Io(format!("Failed to read upload: {}", e))
                }
            })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n]).await?;
        total += n as u64;
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok((total, hex::encode(hasher.finalize())))
}

/// Serialize `value` and atomically replace `dir/name` with it.
async fn write_json_atomic<T: Serialize>(
    dir: &Path,
    name: &str,
    value: &T,
) -> Result<(), StoreError> {
    let data = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Corrupt {
        path: dir.join(name).display().to_string(),
        reason: format!("Failed to serialize record: {}", e),
    })?;
    let dir = dir.to_path_buf();
    let name = name.to_string();

    tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
        let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
        temp.write_all(&data)?;
        temp.as_file().sync_all()?;
        temp.persist(dir.join(&name)).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| StoreError::Io(format!("Blocking task panicked: {}", e)))?
}

/// Read and parse a JSON record; `None` if the file does not exist.
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StoreError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

async fn remove_dir_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(path).await {
        tracing::warn!("Failed to clean up {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::TempDir;
    use tokio::io::{AsyncRead, ReadBuf};

    fn blob(bytes: &'static [u8]) -> BlobReader<'static> {
        Box::pin(bytes)
    }

    struct BrokenUpload;

    impl AsyncRead for BrokenUpload {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "client went away",
            )))
        }
    }

    struct OversizedUpload;

    impl AsyncRead for OversizedUpload {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::InvalidData, BlobTooLarge)))
        }
    }

    fn open_store() -> (TempDir, FileSubmissionStore) {
        let dir = TempDir::new().unwrap();
        let store = FileSubmissionStore::open(dir.path().join("data")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let (_dir, store) = open_store();
        let created = store.create(blob(b"plan-bytes"), "ci").await.unwrap();

        assert_eq!(created.status, SubmissionStatus::Pending);
        assert_eq!(created.version, 0);
        assert_eq!(
            created.plan_hash,
            hex::encode(Sha256::digest(b"plan-bytes"))
        );

        let fetched = store.get(created.id).await.unwrap();
        assert_eq!(fetched, created);
        let on_disk = std::fs::read(store.plan_blob_path(created.id)).unwrap();
        assert_eq!(on_disk, b"plan-bytes");
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let (_dir, store) = open_store();
        let result = store.get(SubmissionId::new()).await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_nothing_behind() {
        let (_dir, store) = open_store();
        let result = store.create(Box::pin(BrokenUpload), "ci").await;
        assert!(matches!(result, Err(StoreError::Io(_))));

        let leftovers: Vec<_> = std::fs::read_dir(store.root()).unwrap().collect();
        assert!(leftovers.is_empty());
        assert!(store.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_upload_is_not_an_io_failure() {
        let (_dir, store) = open_store();
        let result = store.create(Box::pin(OversizedUpload), "ci").await;
        assert!(matches!(result, Err(StoreError::PayloadTooLarge(_))));
        assert!(std::fs::read_dir(store.root()).unwrap().next().is_none());

        let sub = store.create(blob(b"plan"), "ci").await.unwrap();
        let result = store.write_signature(sub.id, Box::pin(OversizedUpload)).await;
        assert!(matches!(result, Err(StoreError::PayloadTooLarge(_))));
        assert!(!store.signature_blob_path(sub.id).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_pending_skips_dangling_entries() {
        let (dir, store) = open_store();
        let sub = store.create(blob(b"plan"), "ci").await.unwrap();

        let dangling = store.root().join(SubmissionId::new().to_string());
        std::os::unix::fs::symlink(dir.path().join("gone"), &dangling).unwrap();
        std::fs::write(store.root().join("notes.txt"), b"stray").unwrap();

        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, sub.id);
    }

    #[tokio::test]
    async fn test_list_pending_skips_corrupt_staging_and_decided() {
        let (_dir, store) = open_store();
        let first = store.create(blob(b"one"), "ci").await.unwrap();
        let second = store.create(blob(b"two"), "ci").await.unwrap();

        let mut decided = store.get(second.id).await.unwrap();
        decided.approve("alice", Utc::now()).unwrap();
        store.update(&decided).await.unwrap();

        let corrupt_id = SubmissionId::new();
        let corrupt_dir = store.root().join(corrupt_id.to_string());
        std::fs::create_dir(&corrupt_dir).unwrap();
        std::fs::write(corrupt_dir.join(METADATA_FILE), b"{not json").unwrap();

        let staged_id = SubmissionId::new();
        let staging = store.root().join(format!("{}{}", STAGING_PREFIX, staged_id));
        std::fs::create_dir(&staging).unwrap();
        let staged = Submission::pending(staged_id, "h".into(), "ci".into());
        std::fs::write(
            staging.join(METADATA_FILE),
            serde_json::to_vec(&staged).unwrap(),
        )
        .unwrap();

        std::fs::create_dir(store.root().join("lost+found")).unwrap();

        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, first.id);

        assert!(matches!(
            store.get(corrupt_id).await,
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_keeps_creation_facts() {
        let (_dir, store) = open_store();
        let created = store.create(blob(b"plan"), "ci").await.unwrap();

        let mut edited = created.clone();
        edited.submitter = "mallory".into();
        edited.plan_hash = "forged".into();
        let persisted = store.update(&edited).await.unwrap();

        assert_eq!(persisted.version, 1);
        assert_eq!(persisted.submitter, "ci");
        assert_eq!(persisted.plan_hash, created.plan_hash);
        assert_eq!(persisted.submitted_at, created.submitted_at);
    }

    #[tokio::test]
    async fn test_stale_update_is_rejected() {
        let (_dir, store) = open_store();
        let created = store.create(blob(b"plan"), "ci").await.unwrap();

        store.update(&created).await.unwrap();
        let stale = store.update(&created).await;
        assert!(matches!(
            stale,
            Err(StoreError::VersionConflict {
                expected: 0,
                found: 1,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_terminal_records_are_never_rewritten() {
        let (_dir, store) = open_store();
        let created = store.create(blob(b"plan"), "ci").await.unwrap();

        let mut approved = created.clone();
        approved.approve("alice", Utc::now()).unwrap();
        let approved = store.update(&approved).await.unwrap();

        let mut flipped = approved.clone();
        flipped.status = SubmissionStatus::Rejected;
        let result = store.update(&flipped).await;
        assert!(matches!(
            result,
            Err(StoreError::TerminalState {
                status: SubmissionStatus::Approved,
                ..
            })
        ));
        assert_eq!(
            store.get(created.id).await.unwrap().status,
            SubmissionStatus::Approved
        );
    }

    #[tokio::test]
    async fn test_concurrent_creates_are_all_visible() {
        let (_dir, store) = open_store();
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let submitter = format!("runner-{}", i);
                store.create(blob(b"same plan"), &submitter).await.unwrap().id
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 32);

        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 32);
    }

    #[tokio::test]
    async fn test_concurrent_updates_of_same_record_never_corrupt() {
        let (_dir, store) = open_store();
        let store = Arc::new(store);
        let created = store.create(blob(b"plan"), "ci").await.unwrap();

        let mut handles = Vec::new();
        for reviewer in ["alice", "bob", "carol", "dave"] {
            let store = store.clone();
            let mut candidate = created.clone();
            handles.push(tokio::spawn(async move {
                candidate.approve(reviewer, Utc::now()).unwrap();
                store.update(&candidate).await
            }));
        }
        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);

        let stored = store.get(created.id).await.unwrap();
        assert_eq!(stored.status, SubmissionStatus::Approved);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_signature_round_trip() {
        let (_dir, store) = open_store();
        let created = store.create(blob(b"plan"), "ci").await.unwrap();

        assert!(!store.signature_blob_path(created.id).exists());
        let written = store
            .write_signature(created.id, blob(b"MEUCIQ=="))
            .await
            .unwrap();
        assert_eq!(written, 8);
        assert_eq!(
            std::fs::read(store.signature_blob_path(created.id)).unwrap(),
            b"MEUCIQ=="
        );

        let missing = store
            .write_signature(SubmissionId::new(), blob(b"sig"))
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_lockdown_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("data");

        let store = FileSubmissionStore::open(&root).unwrap();
        assert!(!store.lockdown_active());
        store.set_lockdown(true).await.unwrap();
        assert!(store.lockdown_active());
        drop(store);

        let reopened = FileSubmissionStore::open(&root).unwrap();
        assert!(reopened.lockdown_active());
        reopened.set_lockdown(false).await.unwrap();
        drop(reopened);

        assert!(!FileSubmissionStore::open(&root).unwrap().lockdown_active());
    }

    #[tokio::test]
    async fn test_unreadable_state_fails_closed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(STATE_FILE), b"garbage").unwrap();
        let store = FileSubmissionStore::open(dir.path()).unwrap();
        assert!(store.lockdown_active());
    }
}
