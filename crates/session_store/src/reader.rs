use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::SessionStoreError;
use crate::schema::Event;

/// Line-by-line validating iterator over a session transcript.
///
/// Every malformed line yields an error carrying the 1-based line number;
/// nothing is skipped silently.
pub struct EventIter {
    path: PathBuf,
    lines: std::io::Lines<BufReader<File>>,
    line_no: usize,
}

impl Iterator for EventIter {
    type Item = Result<Event, SessionStoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let raw = match self.lines.next()? {
                Ok(raw) => raw,
                Err(source) => {
                    self.line_no += 1;
                    return Some(Err(SessionStoreError::io_line(
                        &self.path,
                        self.line_no,
                        source,
                    )));
                }
            };
            self.line_no += 1;

            if raw.trim().is_empty() {
                continue;
            }

            let event = match serde_json::from_str::<Event>(&raw) {
                Ok(event) => event,
                Err(source) => {
                    return Some(Err(SessionStoreError::json_line(
                        &self.path,
                        self.line_no,
                        source,
                    )));
                }
            };

            if OffsetDateTime::parse(&event.ts, &Rfc3339).is_err() {
                return Some(Err(SessionStoreError::InvalidTimestamp {
                    path: self.path.clone(),
                    line: self.line_no,
                    value: event.ts,
                }));
            }

            return Some(Ok(event));
        }
    }
}

/// Opens `path` and returns a validating event iterator.
pub fn iter_events(path: impl AsRef<Path>) -> Result<EventIter, SessionStoreError> {
    let path = path.as_ref().to_path_buf();
    let file = File::open(&path)
        .map_err(|source| SessionStoreError::io("opening session file", &path, source))?;

    Ok(EventIter {
        lines: BufReader::new(file).lines(),
        path,
        line_no: 0,
    })
}
