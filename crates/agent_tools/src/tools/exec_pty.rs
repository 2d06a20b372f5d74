use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::boundary::FsBoundary;
use crate::pty::PtyManager;
use crate::registry::{parse_args, ToolOutcome, ToolRegistration};

const EXEC_TOOL_NAME: &str = "exec_command";
const WRITE_TOOL_NAME: &str = "write_stdin";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExecCommandArgs {
    session_id: String,
    cmd: String,
    workdir: Option<String>,
    yield_ms: Option<u64>,
    max_output_tokens: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WriteStdinArgs {
    session_id: String,
    chars: String,
    yield_ms: Option<u64>,
    max_output_tokens: Option<usize>,
}

pub(crate) fn registrations(
    boundary: &Arc<FsBoundary>,
    pty: &Arc<PtyManager>,
) -> Vec<ToolRegistration> {
    let exec_boundary = Arc::clone(boundary);
    let exec_pty = Arc::clone(pty);
    let write_pty = Arc::clone(pty);

    vec![
        ToolRegistration::new(
            EXEC_TOOL_NAME,
            "Start a long-lived command attached to a new PTY session",
            json!({
                "type": "object",
                "properties": {
                    "session_id": { "type": "string", "description": "Caller-chosen PTY session identifier; must not already be open." },
                    "cmd": { "type": "string", "description": "Command passed to /bin/sh -c." },
                    "workdir": { "type": ["string", "null"], "description": "Working directory; boundary root when null." },
                    "yield_ms": { "type": ["integer", "null"], "minimum": 1, "description": "Initial read window in milliseconds (default 200)." },
                    "max_output_tokens": { "type": ["integer", "null"], "minimum": 1, "description": "Output byte budget for the read window." }
                },
                "required": ["session_id", "cmd", "workdir"],
                "additionalProperties": false
            }),
            true,
            Box::new(move |args: Value| {
                let args: ExecCommandArgs = parse_args(EXEC_TOOL_NAME, args)?;
                let workdir = exec_boundary.resolve_workdir(args.workdir.as_deref())?;
                let read = exec_pty.open(
                    &args.session_id,
                    &args.cmd,
                    &workdir,
                    args.yield_ms,
                    args.max_output_tokens,
                )?;
                Ok(ToolOutcome::ok_truncated(
                    json!({ "output": read.output, "truncated": read.truncated }),
                    read.truncated,
                ))
            }),
        ),
        ToolRegistration::new(
            WRITE_TOOL_NAME,
            "Write characters to an open PTY session and read its output",
            json!({
                "type": "object",
                "properties": {
                    "session_id": { "type": "string", "description": "Existing PTY session id." },
                    "chars": { "type": "string", "description": "Characters written to the session's stdin." },
                    "yield_ms": { "type": ["integer", "null"], "minimum": 1, "description": "Read window in milliseconds (default 200)." },
                    "max_output_tokens": { "type": ["integer", "null"], "minimum": 1, "description": "Output byte budget for the read window." }
                },
                "required": ["session_id", "chars"],
                "additionalProperties": false
            }),
            true,
            Box::new(move |args: Value| {
                let args: WriteStdinArgs = parse_args(WRITE_TOOL_NAME, args)?;
                let read = write_pty.write(
                    &args.session_id,
                    &args.chars,
                    args.yield_ms,
                    args.max_output_tokens,
                )?;
                Ok(ToolOutcome::ok_truncated(
                    json!({ "output": read.output, "truncated": read.truncated }),
                    read.truncated,
                ))
            }),
        ),
    ]
}
