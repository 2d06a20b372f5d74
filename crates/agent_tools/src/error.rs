use std::path::PathBuf;

use thiserror::Error;

/// Model-visible tool failures. The router turns every non-fatal variant
/// into a `success = false` tool result the model can recover from.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments for tool '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("path '{path}' escapes the restricted root {root}")]
    OutsideBoundary { path: String, root: PathBuf },

    #[error("unknown tool '{0}'")]
    ToolNotFound(String),

    #[error("approval policy forbids running '{0}'")]
    ApprovalDenied(String),

    #[error("{0}")]
    PatchVerification(String),

    #[error("{0}")]
    PatchApplyFailed(String),

    #[error("timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("unknown PTY session '{0}'")]
    PtyUnknownSession(String),

    #[error("PTY session '{0}' is already open")]
    PtyAlreadyOpen(String),

    #[error("I/O failure while {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Internal(String),
}

impl ToolError {
    #[must_use]
    pub fn invalid_arguments(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }
}
