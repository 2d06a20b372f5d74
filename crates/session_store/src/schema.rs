use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::SessionStoreError;

/// One transcript line. `ts` is RFC 3339 UTC and must be monotonically
/// non-decreasing within a session file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub ts: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    /// Builds an event stamped with the current UTC instant.
    pub fn now(kind: EventKind) -> Result<Self, SessionStoreError> {
        Ok(Self {
            ts: now_rfc3339()?,
            kind,
        })
    }

    #[must_use]
    pub fn at(ts: impl Into<String>, kind: EventKind) -> Self {
        Self {
            ts: ts.into(),
            kind,
        }
    }

    pub(crate) fn validate_timestamp(&self) -> Result<(), SessionStoreError> {
        OffsetDateTime::parse(&self.ts, &Rfc3339).map_err(|_| {
            SessionStoreError::InvalidEventTimestamp {
                value: self.ts.clone(),
            }
        })?;
        Ok(())
    }
}

/// Closed set of transcript entry kinds. Unknown kinds fail deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", deny_unknown_fields)]
pub enum EventKind {
    System {
        text: String,
    },
    UserMessage {
        text: String,
    },
    AssistantDelta {
        index: u32,
        text: String,
    },
    AssistantMessage {
        text: String,
    },
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: Value,
    },
    ToolResult {
        call_id: String,
        tool_name: String,
        content: Value,
        success: bool,
        truncated: bool,
    },
    SlashCommand {
        command: String,
    },
    TruncationNotice {
        detail: String,
    },
    Error {
        message: String,
    },
}

/// Current UTC instant formatted as RFC 3339.
pub fn now_rfc3339() -> Result<String, SessionStoreError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(SessionStoreError::ClockFormat)
}
