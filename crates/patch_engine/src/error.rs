use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("invalid patch: {reason}")]
    Parse { reason: String },

    #[error("patch verification failed for {path}: {reason}")]
    Verify { path: PathBuf, reason: String },

    #[error("patch apply failed for {path}: {reason}; all changes rolled back")]
    Apply { path: PathBuf, reason: String },
}

impl PatchError {
    #[must_use]
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn verify(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Verify {
            path: path.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn apply(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Apply {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
