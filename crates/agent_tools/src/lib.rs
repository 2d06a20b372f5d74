//! Tool execution layer for lincona.
//!
//! Owns everything between a model-issued tool call and its result: the
//! filesystem boundary every path goes through, the shared output limiter,
//! the PTY session manager for long-lived processes, and the registry/router
//! that advertises tool schemas and dispatches validated invocations.
//!
//! The schema emitted by [`ToolRouter::tool_specs`] is authoritative: each
//! tool's typed argument struct is the same shape, so the advertised contract
//! and the parser cannot drift.

mod boundary;
mod error;
mod limits;
mod pty;
mod registry;
mod tools;

pub use boundary::{FsBoundary, FsMode};
pub use error::ToolError;
pub use limits::{truncate_output, DEFAULT_MAX_BYTES, DEFAULT_MAX_LINES};
pub use pty::{PtyManager, PtyRead, DEFAULT_YIELD_MS, OUTPUT_RING_BYTES};
pub use registry::{
    builtin_registrations, ApprovalPolicy, ApprovalPrompt, NullToolLogger, ToolLogger,
    ToolOutcome, ToolRegistration, ToolRouter,
};
