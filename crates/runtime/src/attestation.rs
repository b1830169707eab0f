//! Sidecar records stored next to a plan file
//!
//! Policy attestations and provenance records are not tracked by the
//! submission store. They live beside the plan blob under a fixed suffix
//! (`<plan>.policy`, `<plan>.provenance`) so signing can happen entirely
//! offline from the review service.

use serde::{de::DeserializeOwned, Serialize};
use std::ffi::OsString;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const POLICY_SUFFIX: &str = ".policy";
pub const PROVENANCE_SUFFIX: &str = ".provenance";
pub const SIGNATURE_SUFFIX: &str = ".sig";
pub const BUNDLE_SUFFIX: &str = ".bundle";
pub const CERTIFICATE_SUFFIX: &str = ".crt";

/// Sidecar load/save errors
#[derive(Error, Debug, Clone)]
pub enum AttestationError {
    /// No record exists for this plan
    #[error("No record found at {path}")]
    Missing { path: String },

    /// A record exists but cannot be parsed
    #[error("Record at {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },
}

impl AttestationError {
    pub fn is_missing(&self) -> bool {
        matches!(self, AttestationError::Missing { .. })
    }
}

/// `<plan><suffix>`, keeping any extension the plan already has
pub fn sidecar_path(plan: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(plan.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Serialize `value` as pretty JSON and atomically place it at `<plan><suffix>`.
pub fn save_sidecar<T: Serialize>(
    plan: &Path,
    suffix: &str,
    value: &T,
) -> Result<PathBuf, AttestationError> {
    let path = sidecar_path(plan, suffix);
    let io_err = |e: std::io::Error| AttestationError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    let data = serde_json::to_vec_pretty(value).map_err(|e| AttestationError::Corrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut temp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
    temp.write_all(&data).map_err(io_err)?;
    temp.as_file().sync_all().map_err(io_err)?;
    temp.persist(&path).map_err(|e| io_err(e.error))?;

    Ok(path)
}

/// Load `<plan><suffix>`, distinguishing an absent record from a broken one.
pub fn load_sidecar<T: DeserializeOwned>(plan: &Path, suffix: &str) -> Result<T, AttestationError> {
    let path = sidecar_path(plan, suffix);
    let data = match std::fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(AttestationError::Missing {
                path: path.display().to_string(),
            })
        }
        Err(e) => {
            return Err(AttestationError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
        }
    };

    serde_json::from_slice(&data).map_err(|e| AttestationError::Corrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    #[test]
    fn test_sidecar_path_appends_suffix() {
        assert_eq!(
            sidecar_path(Path::new("/tmp/out/tfplan.bin"), POLICY_SUFFIX),
            PathBuf::from("/tmp/out/tfplan.bin.policy")
        );
        assert_eq!(
            sidecar_path(Path::new("tfplan"), SIGNATURE_SUFFIX),
            PathBuf::from("tfplan.sig")
        );
    }

    #[test]
    fn test_missing_corrupt_and_present_are_distinct() {
        let dir = TempDir::new().unwrap();
        let plan = dir.path().join("tfplan");

        let missing = load_sidecar::<Note>(&plan, PROVENANCE_SUFFIX).unwrap_err();
        assert!(missing.is_missing());

        std::fs::write(sidecar_path(&plan, PROVENANCE_SUFFIX), b"{\"text\":").unwrap();
        let corrupt = load_sidecar::<Note>(&plan, PROVENANCE_SUFFIX).unwrap_err();
        assert!(matches!(corrupt, AttestationError::Corrupt { .. }));

        let note = Note {
            text: "hello".into(),
        };
        let written = save_sidecar(&plan, PROVENANCE_SUFFIX, &note).unwrap();
        assert_eq!(written, dir.path().join("tfplan.provenance"));
        assert_eq!(load_sidecar::<Note>(&plan, PROVENANCE_SUFFIX).unwrap(), note);
    }
}
