use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::SessionStoreError;
use crate::schema::now_rfc3339;

pub const DEFAULT_LOG_MAX_BYTES: u64 = 5 * 1024 * 1024;

/// Record severity for the session log. Unknown level strings downgrade to
/// `Info` with a single warning record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value.to_ascii_lowercase().as_str() {
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warning" | "warn" => Self::Warning,
            "error" => Self::Error,
            _ => return None,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

/// Plaintext per-session log with a byte cap enforced at open time.
///
/// When the existing file exceeds `max_bytes`, only the trailing `max_bytes`
/// are kept, so the most recent records survive restarts.
pub struct SessionLogger {
    path: PathBuf,
    file: Option<File>,
    level: LogLevel,
    warned_unknown_level: bool,
}

impl SessionLogger {
    /// Opens the log at `path`, truncating to the trailing `max_bytes` first.
    /// `max_bytes = None` disables the cap.
    pub fn open(
        path: impl Into<PathBuf>,
        level: LogLevel,
        max_bytes: Option<u64>,
    ) -> Result<Self, SessionStoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|source| SessionStoreError::io("creating log directory", parent, source))?;
        }

        if let Some(max_bytes) = max_bytes {
            truncate_to_tail(&path, max_bytes)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| SessionStoreError::io("opening log file", &path, source))?;

        Ok(Self {
            path,
            file: Some(file),
            level,
            warned_unknown_level: false,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one timestamped record if `level` meets the threshold.
    pub fn log(&mut self, level: LogLevel, message: &str) -> Result<(), SessionStoreError> {
        if level < self.level {
            return Ok(());
        }

        let ts = now_rfc3339()?;
        let record = format!("{ts} {}: {message}\n", level.as_str());

        let path = self.path.clone();
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        file.write_all(record.as_bytes())
            .map_err(|source| SessionStoreError::io("writing log record", path, source))
    }

    /// Logs with a caller-supplied level string, downgrading unknown levels
    /// to INFO with a one-time warning.
    pub fn log_str(&mut self, level: &str, message: &str) -> Result<(), SessionStoreError> {
        match LogLevel::parse(level) {
            Some(parsed) => self.log(parsed, message),
            None => {
                if !self.warned_unknown_level {
                    self.warned_unknown_level = true;
                    self.log(
                        LogLevel::Warning,
                        &format!("unknown log level '{level}'; using INFO"),
                    )?;
                }
                self.log(LogLevel::Info, message)
            }
        }
    }

    pub fn debug(&mut self, message: &str) -> Result<(), SessionStoreError> {
        self.log(LogLevel::Debug, message)
    }

    pub fn info(&mut self, message: &str) -> Result<(), SessionStoreError> {
        self.log(LogLevel::Info, message)
    }

    pub fn warning(&mut self, message: &str) -> Result<(), SessionStoreError> {
        self.log(LogLevel::Warning, message)
    }

    pub fn error(&mut self, message: &str) -> Result<(), SessionStoreError> {
        self.log(LogLevel::Error, message)
    }

    /// Flushes and releases the handle. Idempotent.
    pub fn close(&mut self) -> Result<(), SessionStoreError> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .map_err(|source| SessionStoreError::io("flushing log file", &self.path, source))?;
        }
        Ok(())
    }
}

fn truncate_to_tail(path: &Path, max_bytes: u64) -> Result<(), SessionStoreError> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(source) => return Err(SessionStoreError::io("inspecting log file", path, source)),
    };

    if metadata.len() <= max_bytes {
        return Ok(());
    }

    let mut file = File::open(path)
        .map_err(|source| SessionStoreError::io("opening log file", path, source))?;
    file.seek(SeekFrom::End(-(max_bytes as i64)))
        .map_err(|source| SessionStoreError::io("seeking log tail", path, source))?;
    let mut tail = Vec::with_capacity(max_bytes as usize);
    file.read_to_end(&mut tail)
        .map_err(|source| SessionStoreError::io("reading log tail", path, source))?;

    std::fs::write(path, &tail)
        .map_err(|source| SessionStoreError::io("rewriting log tail", path, source))
}

#[cfg(test)]
mod tests {
    use super::{LogLevel, SessionLogger};

    #[test]
    fn levels_below_threshold_are_dropped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("s.log");
        let mut logger = SessionLogger::open(&path, LogLevel::Info, None).expect("logger opens");
        logger.debug("invisible").expect("debug write");
        logger.info("visible").expect("info write");
        logger.close().expect("close");

        let contents = std::fs::read_to_string(&path).expect("read log");
        assert!(!contents.contains("invisible"));
        assert!(contents.contains("INFO: visible"));
    }

    #[test]
    fn unknown_level_downgrades_with_single_warning() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("s.log");
        let mut logger = SessionLogger::open(&path, LogLevel::Debug, None).expect("logger opens");
        logger.log_str("loud", "first").expect("first write");
        logger.log_str("loud", "second").expect("second write");
        logger.close().expect("close");

        let contents = std::fs::read_to_string(&path).expect("read log");
        assert_eq!(contents.matches("unknown log level 'loud'").count(), 1);
        assert!(contents.contains("INFO: first"));
        assert!(contents.contains("INFO: second"));
    }
}
