use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::SessionStoreError;
use crate::schema::Event;

/// Append-only JSONL writer over a single session transcript file.
///
/// Every append serializes one event to one line. `sync` forces OS-level
/// durability; `fsync_every` triggers it automatically after every N appends.
pub struct JsonlEventWriter {
    path: PathBuf,
    file: Option<File>,
    fsync_every: Option<u64>,
    appends_since_sync: u64,
}

impl JsonlEventWriter {
    /// Opens (creating parent directories and the file as needed) the
    /// transcript at `path` for appending.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SessionStoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|source| SessionStoreError::io("creating session directory", parent, source))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| SessionStoreError::io("opening session file", &path, source))?;

        Ok(Self {
            path,
            file: Some(file),
            fsync_every: None,
            appends_since_sync: 0,
        })
    }

    /// Syncs after every `n` appends. `n = 1` makes every append durable.
    #[must_use]
    pub fn with_fsync_every(mut self, n: u64) -> Self {
        self.fsync_every = (n > 0).then_some(n);
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serializes `event` to one JSON line and appends it.
    pub fn append(&mut self, event: &Event) -> Result<(), SessionStoreError> {
        event.validate_timestamp()?;

        let line = serde_json::to_string(event)
            .map_err(|source| SessionStoreError::json_serialize(&self.path, source))?;

        let path = self.path.clone();
        let file = self.file_mut()?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.write_all(b"\n"))
            .map_err(|source| SessionStoreError::io("appending event", path, source))?;

        self.appends_since_sync += 1;
        if let Some(every) = self.fsync_every {
            if self.appends_since_sync >= every {
                self.sync()?;
            }
        }
        Ok(())
    }

    /// Forces OS-level durability of everything appended so far.
    pub fn sync(&mut self) -> Result<(), SessionStoreError> {
        let path = self.path.clone();
        let file = self.file_mut()?;
        file.sync_data()
            .map_err(|source| SessionStoreError::io("syncing session file", path, source))?;
        self.appends_since_sync = 0;
        Ok(())
    }

    /// Flushes, syncs, and releases the file handle. Idempotent.
    pub fn close(&mut self) -> Result<(), SessionStoreError> {
        if self.file.is_some() {
            self.sync()?;
            self.file = None;
        }
        Ok(())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    fn file_mut(&mut self) -> Result<&mut File, SessionStoreError> {
        let path = self.path.clone();
        self.file
            .as_mut()
            .ok_or(SessionStoreError::WriterClosed { path })
    }
}

#[cfg(test)]
mod tests {
    use crate::schema::{Event, EventKind};

    use super::JsonlEventWriter;

    #[test]
    fn append_after_close_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("s.jsonl");
        let mut writer = JsonlEventWriter::open(&path).expect("writer opens");
        writer.close().expect("close succeeds");
        writer.close().expect("second close is a no-op");

        let event = Event::at(
            "2026-08-02T12:00:00Z",
            EventKind::UserMessage {
                text: "hello".to_string(),
            },
        );
        let error = writer.append(&event).expect_err("closed writer must reject appends");
        assert!(error.to_string().contains("closed"));
    }

    #[test]
    fn append_rejects_invalid_timestamp() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = JsonlEventWriter::open(dir.path().join("s.jsonl")).expect("writer opens");

        let event = Event::at(
            "not-a-timestamp",
            EventKind::UserMessage {
                text: "hello".to_string(),
            },
        );
        let error = writer.append(&event).expect_err("bad timestamp must fail");
        assert!(error.to_string().contains("RFC3339"));
    }
}
