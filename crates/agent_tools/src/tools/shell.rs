use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::boundary::FsBoundary;
use crate::error::ToolError;
use crate::limits::{truncate_output, DEFAULT_MAX_BYTES, DEFAULT_MAX_LINES};
use crate::registry::{parse_args, ToolOutcome, ToolRegistration};

const TOOL_NAME: &str = "shell";
const WAIT_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ShellArgs {
    command: String,
    workdir: Option<String>,
    timeout_ms: u64,
}

/// Structured result of one shell run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellResult {
    pub stdout: String,
    pub stderr: String,
    pub returncode: Option<i32>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub timeout: bool,
}

/// Runs `/bin/sh -c <command>` in the boundary-validated workdir, collecting
/// both streams with truncation and killing the child on timeout.
pub fn run_shell(
    boundary: &FsBoundary,
    command: &str,
    workdir: Option<&str>,
    timeout_ms: u64,
) -> Result<ShellResult, ToolError> {
    if command.trim().is_empty() {
        return Err(ToolError::invalid_arguments(TOOL_NAME, "field 'command' cannot be empty"));
    }
    let cwd = boundary.resolve_workdir(workdir)?;

    let mut child = Command::new("/bin/sh")
        .arg("-c")
        .arg(command)
        .current_dir(&cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ToolError::io("spawning shell command", source))?;

    // Pipes are drained on their own threads so a full pipe never deadlocks
    // the wait loop.
    let stdout_handle = spawn_pipe_reader(child.stdout.take());
    let stderr_handle = spawn_pipe_reader(child.stderr.take());

    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    let mut timed_out = false;
    let returncode = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {
                if Instant::now() >= deadline {
                    timed_out = true;
                    warn!(command, timeout_ms, "shell command timed out; killing");
                    let _ = child.kill();
                    let _ = child.wait();
                    break None;
                }
                std::thread::sleep(WAIT_POLL);
            }
            Err(source) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ToolError::io("waiting for shell command", source));
            }
        }
    };

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    let (stdout, stdout_truncated) = truncate_output(
        &String::from_utf8_lossy(&stdout_bytes),
        DEFAULT_MAX_BYTES,
        DEFAULT_MAX_LINES,
    );
    let (stderr, stderr_truncated) = truncate_output(
        &String::from_utf8_lossy(&stderr_bytes),
        DEFAULT_MAX_BYTES,
        DEFAULT_MAX_LINES,
    );

    Ok(ShellResult {
        stdout,
        stderr,
        returncode,
        stdout_truncated,
        stderr_truncated,
        timeout: timed_out,
    })
}

fn spawn_pipe_reader<R: Read + Send + 'static>(
    pipe: Option<R>,
) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut collected = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut collected);
        }
        collected
    })
}

pub(crate) fn registrations(boundary: &Arc<FsBoundary>) -> Vec<ToolRegistration> {
    let boundary = Arc::clone(boundary);
    vec![ToolRegistration::new(
        TOOL_NAME,
        "Run a one-shot shell command",
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command passed to /bin/sh -c." },
                "workdir": { "type": ["string", "null"], "description": "Working directory; boundary root when null." },
                "timeout_ms": { "type": "integer", "minimum": 1, "description": "Kill the command after this many milliseconds (default 60000)." }
            },
            "required": ["command", "workdir", "timeout_ms"],
            "additionalProperties": false
        }),
        true,
        Box::new(move |args: Value| {
            let args: ShellArgs = parse_args(TOOL_NAME, args)?;
            if args.timeout_ms == 0 {
                return Err(ToolError::invalid_arguments(TOOL_NAME, "field 'timeout_ms' must be >= 1"));
            }
            let result = run_shell(&boundary, &args.command, args.workdir.as_deref(), args.timeout_ms)?;
            let truncated = result.stdout_truncated || result.stderr_truncated;
            Ok(ToolOutcome::ok_truncated(
                json!({
                    "stdout": result.stdout,
                    "stderr": result.stderr,
                    "returncode": result.returncode,
                    "stdout_truncated": result.stdout_truncated,
                    "stderr_truncated": result.stderr_truncated,
                    "timeout": result.timeout,
                }),
                truncated,
            ))
        }),
    )]
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::boundary::FsBoundary;

    use super::run_shell;

    fn boundary() -> (tempfile::TempDir, Arc<FsBoundary>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let boundary = Arc::new(FsBoundary::restricted(dir.path()).expect("boundary"));
        (dir, boundary)
    }

    #[test]
    fn stdout_stderr_and_exit_code_are_captured() {
        let (_dir, boundary) = boundary();
        let result = run_shell(&boundary, "echo out; echo err 1>&2; exit 3", None, 5_000)
            .expect("command runs");

        assert_eq!(result.stdout.trim(), "out");
        assert_eq!(result.stderr.trim(), "err");
        assert_eq!(result.returncode, Some(3));
        assert!(!result.timeout);
    }

    #[test]
    fn commands_run_in_the_boundary_root_by_default() {
        let (dir, boundary) = boundary();
        let result = run_shell(&boundary, "pwd", None, 5_000).expect("command runs");
        let reported = std::path::PathBuf::from(result.stdout.trim());
        let expected = dir.path().canonicalize().expect("canonical root");
        assert_eq!(reported, expected);
    }

    #[test]
    fn timeout_kills_the_child_and_sets_the_flag() {
        let (_dir, boundary) = boundary();
        let started = std::time::Instant::now();
        let result = run_shell(&boundary, "sleep 10", None, 200).expect("command runs");

        assert!(result.timeout);
        assert_eq!(result.returncode, None);
        assert!(
            started.elapsed() < std::time::Duration::from_secs(5),
            "timeout must not wait for the full sleep"
        );
    }

    #[test]
    fn long_output_is_truncated_per_stream() {
        let (_dir, boundary) = boundary();
        let result = run_shell(&boundary, "seq 1 5000", None, 10_000).expect("command runs");

        assert!(result.stdout_truncated);
        assert!(!result.stderr_truncated);
        assert!(result.stdout.contains("[truncated"));
    }

    #[test]
    fn empty_commands_are_rejected() {
        let (_dir, boundary) = boundary();
        let error = run_shell(&boundary, "   ", None, 1_000).expect_err("empty command fails");
        assert!(error.to_string().contains("command"));
    }
}
