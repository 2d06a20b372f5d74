use std::collections::BTreeMap;
use std::time::Duration;

/// Stream event emitted by the parser after normalization.
///
/// Argument deltas never surface individually; they accumulate per call id
/// and arrive as one `ToolCallReady` once the call completes.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEvent {
    TextDelta {
        index: u32,
        text: String,
    },
    MessageDone {
        index: u32,
    },
    ToolCallStart {
        call_id: String,
        name: String,
    },
    ToolCallReady {
        call_id: String,
        name: String,
        args_json: String,
    },
    Error {
        code: Option<String>,
        message: String,
        retry_after: Option<Duration>,
    },
    TurnDone,
}

impl ResponseEvent {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TurnDone | Self::Error { .. })
    }
}

/// Concatenates text deltas per output index, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct TextAccumulator {
    parts: BTreeMap<u32, String>,
}

impl TextAccumulator {
    pub fn push(&mut self, index: u32, text: &str) {
        self.parts.entry(index).or_default().push_str(text);
    }

    /// Full text across all indexes, lowest index first.
    #[must_use]
    pub fn combined(&self) -> String {
        self.parts.values().cloned().collect::<Vec<_>>().join("")
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.values().all(String::is_empty)
    }
}
