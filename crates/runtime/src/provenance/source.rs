//! Source-control metadata for provenance materials

use std::path::{Path, PathBuf};

use super::types::UNKNOWN;

/// Repository URI and commit the plan was built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub uri: String,
    pub commit: String,
}

impl SourceInfo {
    pub fn unknown() -> Self {
        Self {
            uri: UNKNOWN.to_string(),
            commit: UNKNOWN.to_string(),
        }
    }
}

/// Supplies [`SourceInfo`]; lookups never fail, they degrade to `unknown`.
pub trait SourceMetadata: Send + Sync {
    fn describe(&self) -> SourceInfo;
}

/// Reads `origin` and `HEAD` from the git repository enclosing a directory
pub struct GitSource {
    start: PathBuf,
}

impl GitSource {
    pub fn new(start: impl Into<PathBuf>) -> Self {
        Self {
            start: start.into(),
        }
    }

    /// Repository enclosing the current directory
    pub fn current_dir() -> Self {
        Self::new(".")
    }

    fn lookup(path: &Path) -> Result<SourceInfo, git2::Error> {
        let repo = git2::Repository::discover(path)?;
        let uri = repo
            .find_remote("origin")
            .ok()
            .and_then(|remote| remote.url().map(str::to_string))
            .unwrap_or_else(|| UNKNOWN.to_string());
        let commit = repo.head()?.peel_to_commit()?.id().to_string();
        Ok(SourceInfo { uri, commit })
    }
}

impl SourceMetadata for GitSource {
    fn describe(&self) -> SourceInfo {
        match Self::lookup(&self.start) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(
                    "Could not read git metadata from {}: {}",
                    self.start.display(),
                    e.message()
                );
                SourceInfo::unknown()
            }
        }
    }
}

/// Fixed source info
pub struct StaticSource(pub SourceInfo);

impl SourceMetadata for StaticSource {
    fn describe(&self) -> SourceInfo {
        self.0.clone()
    }
}
