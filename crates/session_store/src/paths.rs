use std::path::{Path, PathBuf};

use time::macros::format_description;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::SessionStoreError;

/// Base lincona directory, honoring `LINCONA_HOME` when set.
#[must_use]
pub fn lincona_home() -> PathBuf {
    if let Ok(value) = std::env::var("LINCONA_HOME") {
        if !value.trim().is_empty() {
            return PathBuf::from(value);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".lincona")
}

#[must_use]
pub fn sessions_dir(home: &Path) -> PathBuf {
    home.join("sessions")
}

#[must_use]
pub fn logs_dir(home: &Path) -> PathBuf {
    home.join("logs")
}

#[must_use]
pub fn session_file_path(home: &Path, session_id: &str) -> PathBuf {
    sessions_dir(home).join(format!("{session_id}.jsonl"))
}

#[must_use]
pub fn log_file_path(home: &Path, session_id: &str) -> PathBuf {
    logs_dir(home).join(format!("{session_id}.log"))
}

/// New session id in the form `YYYYMMDDHHMM-<128-bit hex>` (UTC stamp).
#[must_use]
pub fn generate_session_id() -> String {
    let stamp = OffsetDateTime::now_utc()
        .format(format_description!("[year][month][day][hour][minute]"))
        .unwrap_or_else(|_| "000000000000".to_string());
    format!("{stamp}-{}", Uuid::new_v4().simple())
}

/// Checks the `^[0-9]{12}-[0-9a-f]{32}$` shape without a regex dependency.
#[must_use]
pub fn is_valid_session_id(candidate: &str) -> bool {
    let bytes = candidate.as_bytes();
    bytes.len() == 45
        && bytes[..12].iter().all(u8::is_ascii_digit)
        && bytes[12] == b'-'
        && bytes[13..]
            .iter()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b))
}

/// Summary of one stored session file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: String,
    pub path: PathBuf,
    pub modified_at: Option<std::time::SystemTime>,
    pub size_bytes: u64,
}

/// Lists session files under `dir`, newest first.
pub fn list_sessions(dir: &Path) -> Result<Vec<SessionInfo>, SessionStoreError> {
    let mut sessions = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(sessions),
        Err(source) => return Err(SessionStoreError::io("listing sessions", dir, source)),
    };

    for entry in entries {
        let entry = entry.map_err(|source| SessionStoreError::io("listing sessions", dir, source))?;
        let path = entry.path();
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        if path.extension().and_then(|ext| ext.to_str()) != Some("jsonl")
            || !is_valid_session_id(stem)
        {
            continue;
        }

        let metadata = entry
            .metadata()
            .map_err(|source| SessionStoreError::io("reading session metadata", &path, source))?;
        sessions.push(SessionInfo {
            session_id: stem.to_string(),
            modified_at: metadata.modified().ok(),
            size_bytes: metadata.len(),
            path,
        });
    }

    sessions.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
    Ok(sessions)
}

/// Removes the transcript for `session_id` from `dir`.
pub fn delete_session(session_id: &str, dir: &Path) -> Result<(), SessionStoreError> {
    if !is_valid_session_id(session_id) {
        return Err(SessionStoreError::InvalidSessionId {
            session_id: session_id.to_string(),
        });
    }

    let path = dir.join(format!("{session_id}.jsonl"));
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
            Err(SessionStoreError::SessionNotFound {
                session_id: session_id.to_string(),
                root: dir.to_path_buf(),
            })
        }
        Err(source) => Err(SessionStoreError::io("deleting session", path, source)),
    }
}

#[cfg(test)]
mod tests {
    use super::{generate_session_id, is_valid_session_id};

    #[test]
    fn generated_session_ids_match_expected_shape() {
        let id = generate_session_id();
        assert!(is_valid_session_id(&id), "unexpected session id: {id}");
    }

    #[test]
    fn session_id_validation_rejects_malformed_candidates() {
        assert!(is_valid_session_id(
            "202608021200-0123456789abcdef0123456789abcdef"
        ));
        assert!(!is_valid_session_id("202608021200"));
        assert!(!is_valid_session_id(
            "20260802120-0123456789abcdef0123456789abcdef0"
        ));
        assert!(!is_valid_session_id(
            "202608021200-0123456789ABCDEF0123456789ABCDEF"
        ));
        assert!(!is_valid_session_id(
            "2026080212zz-0123456789abcdef0123456789abcdef"
        ));
    }
}
