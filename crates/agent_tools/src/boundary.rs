use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ToolError;

/// Filesystem access mode for the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsMode {
    Restricted,
    Unrestricted,
}

impl FsMode {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value.to_ascii_lowercase().as_str() {
            "restricted" => Self::Restricted,
            "unrestricted" => Self::Unrestricted,
            _ => return None,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Restricted => "restricted",
            Self::Unrestricted => "unrestricted",
        }
    }
}

/// Path gate consulted by every tool that accepts a path.
///
/// Restricted mode pins every resolved path (after `..` normalization and
/// symlink resolution of the existing prefix) inside the root; unrestricted
/// mode only normalizes.
#[derive(Debug, Clone)]
pub struct FsBoundary {
    mode: FsMode,
    root: Option<PathBuf>,
}

impl FsBoundary {
    /// Restricted boundary rooted at `root` (canonicalized at construction).
    pub fn restricted(root: impl Into<PathBuf>) -> Result<Self, ToolError> {
        let root = root.into();
        let canonical = root
            .canonicalize()
            .map_err(|source| ToolError::io(format!("resolving boundary root {}", root.display()), source))?;
        Ok(Self {
            mode: FsMode::Restricted,
            root: Some(canonical),
        })
    }

    #[must_use]
    pub fn unrestricted() -> Self {
        Self {
            mode: FsMode::Unrestricted,
            root: None,
        }
    }

    /// Builds a boundary for `mode`; restricted mode roots at `root`.
    pub fn new(mode: FsMode, root: impl Into<PathBuf>) -> Result<Self, ToolError> {
        match mode {
            FsMode::Restricted => Self::restricted(root),
            FsMode::Unrestricted => Ok(Self::unrestricted()),
        }
    }

    #[must_use]
    pub fn mode(&self) -> FsMode {
        self.mode
    }

    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Returns a canonical absolute path, or `OutsideBoundary` when the
    /// input (or the symlink it passes through) escapes the restricted root.
    pub fn resolve(&self, raw: impl AsRef<Path>) -> Result<PathBuf, ToolError> {
        let raw = raw.as_ref();
        let absolute = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            match &self.root {
                Some(root) => root.join(raw),
                None => std::env::current_dir()
                    .map_err(|source| ToolError::io("resolving working directory", source))?
                    .join(raw),
            }
        };

        let resolved = resolve_existing_prefix(&lexical_normalize(&absolute));

        if let Some(root) = &self.root {
            if !resolved.starts_with(root) {
                return Err(ToolError::OutsideBoundary {
                    path: raw.display().to_string(),
                    root: root.clone(),
                });
            }
        }
        Ok(resolved)
    }

    /// Validates an optional working directory, defaulting to the root in
    /// restricted mode and the process cwd otherwise.
    pub fn resolve_workdir(&self, workdir: Option<&str>) -> Result<PathBuf, ToolError> {
        match workdir {
            Some(workdir) if !workdir.trim().is_empty() => self.resolve(workdir),
            _ => match &self.root {
                Some(root) => Ok(root.clone()),
                None => std::env::current_dir()
                    .map_err(|source| ToolError::io("resolving working directory", source)),
            },
        }
    }

    /// True when `path` is inside the boundary (always true unrestricted).
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        match &self.root {
            Some(root) => resolve_existing_prefix(&lexical_normalize(path)).starts_with(root),
            None => true,
        }
    }
}

/// Removes `.` and folds `..` without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component.as_os_str());
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Canonicalizes the deepest existing ancestor (following symlinks) and
/// re-joins the not-yet-existing remainder, so symlink escapes are caught
/// even for paths that will be created.
fn resolve_existing_prefix(path: &Path) -> PathBuf {
    let mut current = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();

    loop {
        match current.canonicalize() {
            Ok(canonical) => {
                let mut resolved = canonical;
                for part in tail.iter().rev() {
                    resolved.push(part);
                }
                return resolved;
            }
            Err(_) => match (current.file_name(), current.parent()) {
                (Some(name), Some(parent)) => {
                    tail.push(name.to_os_string());
                    current = parent.to_path_buf();
                }
                _ => return path.to_path_buf(),
            },
        }
    }
}
