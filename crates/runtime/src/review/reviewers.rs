//! Reviewer allow-list
//!
//! File-backed reviewer credentials with Argon2-hashed bearer tokens. When
//! the registry is empty the service runs unauthenticated and trusts the
//! reviewer name the caller claims.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to read reviewers file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse reviewers file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Failed to hash token: {0}")]
    Hash(String),
}

/// A single reviewer record stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewerRecord {
    /// Name stamped into `reviewed_by`
    pub reviewer: String,
    /// Argon2 hash of the raw bearer token
    pub token_hash: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub revoked: bool,
}

/// Allow-list of reviewers able to approve, reject and lift lockdown
#[derive(Debug, Clone, Default)]
pub struct ReviewerRegistry {
    records: Vec<ReviewerRecord>,
}

impl ReviewerRegistry {
    /// Load records from a JSON array.
    ///
    /// A configured file that does not exist is an error: silently falling
    /// back to unauthenticated approvals would fail open.
    pub fn load_from_file(path: &Path) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path).map_err(|e| RegistryError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let records: Vec<ReviewerRecord> =
            serde_json::from_str(&content).map_err(|e| RegistryError::Parse {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        let active = records.iter().filter(|r| !r.revoked).count();
        tracing::info!(
            "Loaded {} reviewer record(s), {} active",
            records.len(),
            active
        );
        Ok(Self { records })
    }

    pub fn from_records(records: Vec<ReviewerRecord>) -> Self {
        Self { records }
    }

    /// Registry with no records (unauthenticated mode)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reviewer name for a raw token, if it matches a non-revoked record
    pub fn authenticate(&self, raw_token: &str) -> Option<&str> {
        let argon2 = Argon2::default();

        for record in &self.records {
            if record.revoked {
                continue;
            }

            let parsed_hash = match PasswordHash::new(&record.token_hash) {
                Ok(h) => h,
                Err(_) => {
                    tracing::warn!("Reviewer '{}' has an unparseable token hash", record.reviewer);
                    continue;
                }
            };

            if argon2
                .verify_password(raw_token.as_bytes(), &parsed_hash)
                .is_ok()
            {
                return Some(&record.reviewer);
            }
        }

        None
    }

    /// Hash a raw token for a new record
    pub fn hash_token(raw_token: &str) -> Result<String, RegistryError> {
        let salt = SaltString::generate(&mut rand::thread_rng());
        Argon2::default()
            .hash_password(raw_token.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| RegistryError::Hash(e.to_string()))
    }

    /// True when credentials are enforced
    pub fn has_records(&self) -> bool {
        !self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn record(reviewer: &str, raw: &str, revoked: bool) -> ReviewerRecord {
        ReviewerRecord {
            reviewer: reviewer.to_string(),
            token_hash: ReviewerRegistry::hash_token(raw).unwrap(),
            description: String::new(),
            revoked,
        }
    }

    #[test]
    fn test_token_maps_to_reviewer() {
        let registry = ReviewerRegistry::from_records(vec![
            record("alice", "tok-alice", false),
            record("bob", "tok-bob", false),
        ]);
        assert_eq!(registry.authenticate("tok-bob"), Some("bob"));
        assert_eq!(registry.authenticate("tok-carol"), None);
    }

    #[test]
    fn test_revoked_token_rejected() {
        let registry = ReviewerRegistry::from_records(vec![record("mallory", "tok-m", true)]);
        assert!(registry.has_records());
        assert!(registry.authenticate("tok-m").is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let records = vec![record("alice", "tok-alice", false)];
        write!(file, "{}", serde_json::to_string(&records).unwrap()).unwrap();

        let registry = ReviewerRegistry::load_from_file(file.path()).unwrap();
        assert_eq!(registry.authenticate("tok-alice"), Some("alice"));
    }

    #[test]
    fn test_missing_or_broken_file_is_an_error() {
        assert!(matches!(
            ReviewerRegistry::load_from_file(Path::new("/no/reviewers.json")),
            Err(RegistryError::Io { .. })
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not a list").unwrap();
        assert!(matches!(
            ReviewerRegistry::load_from_file(file.path()),
            Err(RegistryError::Parse { .. })
        ));
    }

    #[test]
    fn test_empty_registry() {
        let registry = ReviewerRegistry::empty();
        assert!(!registry.has_records());
        assert!(registry.authenticate("anything").is_none());
    }
}
