//! Strict JSONL transcript storage for lincona sessions.
//!
//! Contract highlights:
//! - one JSON object per line under `<data-root>/sessions/<session-id>.jsonl`,
//!   append-only, every append carrying an RFC 3339 UTC timestamp;
//! - unknown event kinds, unknown fields, and malformed lines are hard errors
//!   on both write and read; the reader reports the 1-based line number and
//!   never skips silently;
//! - session ids are `YYYYMMDDHHMM-<128-bit hex>` and validated on use;
//! - the per-session plaintext logger keeps at most `max_bytes` (tail) of
//!   `<data-root>/logs/<session-id>.log` across restarts.
//!
//! No tolerant parsing or repair semantics are included.

mod error;
mod logger;
mod paths;
mod reader;
mod schema;
mod writer;

pub use error::SessionStoreError;
pub use logger::{LogLevel, SessionLogger, DEFAULT_LOG_MAX_BYTES};
pub use paths::{
    delete_session, generate_session_id, is_valid_session_id, lincona_home, list_sessions,
    log_file_path, logs_dir, session_file_path, sessions_dir, SessionInfo,
};
pub use reader::{iter_events, EventIter};
pub use schema::{now_rfc3339, Event, EventKind};
pub use writer::JsonlEventWriter;
