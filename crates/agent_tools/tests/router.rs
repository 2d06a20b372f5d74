use std::sync::Arc;

use agent_tools::{
    ApprovalPolicy, FsBoundary, PtyManager, ToolLogger, ToolOutcome, ToolRouter,
};
use serde_json::Value;

#[derive(Debug, Default)]
struct RecordingLogger {
    info: Vec<String>,
    debug: Vec<String>,
}

impl ToolLogger for RecordingLogger {
    fn info(&mut self, message: &str) {
        self.info.push(message.to_string());
    }

    fn debug(&mut self, message: &str) {
        self.debug.push(message.to_string());
    }
}

fn router_with_policy(
    root: &std::path::Path,
    policy: ApprovalPolicy,
) -> (ToolRouter, Arc<PtyManager>) {
    let boundary = Arc::new(FsBoundary::restricted(root).expect("boundary builds"));
    let pty = Arc::new(PtyManager::new());
    (
        ToolRouter::new(boundary, Arc::clone(&pty), policy),
        pty,
    )
}

fn content_text(outcome: &ToolOutcome) -> String {
    match &outcome.content {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[test]
fn tool_specs_advertise_the_full_builtin_set() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (router, _pty) = router_with_policy(dir.path(), ApprovalPolicy::Always);

    let names: Vec<String> = router
        .tool_specs()
        .iter()
        .map(|spec| spec["name"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(
        names,
        [
            "list_dir",
            "read_file",
            "grep_files",
            "apply_patch_json",
            "apply_patch_freeform",
            "shell",
            "exec_command",
            "write_stdin",
        ]
    );

    for spec in router.tool_specs() {
        assert_eq!(spec["type"], "function");
        assert_eq!(spec["parameters"]["type"], "object");
        assert_eq!(spec["parameters"]["additionalProperties"], false);
        assert!(
            spec["parameters"]["required"].is_array(),
            "every schema pins its required keys"
        );
    }
}

#[test]
fn unknown_tools_fail_without_dispatching() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut router, _pty) = router_with_policy(dir.path(), ApprovalPolicy::Always);
    let mut logger = RecordingLogger::default();

    let outcome = router.dispatch("mystery_tool", "{}", &mut logger);
    assert!(!outcome.success);
    assert!(content_text(&outcome).contains("unknown tool 'mystery_tool'"));
}

#[test]
fn invalid_arguments_name_the_offending_field() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut router, _pty) = router_with_policy(dir.path(), ApprovalPolicy::Always);
    let mut logger = RecordingLogger::default();

    let outcome = router.dispatch(
        "read_file",
        r#"{"offset":0,"limit":10,"mode":"slice","indent":"    "}"#,
        &mut logger,
    );
    assert!(!outcome.success);
    let message = content_text(&outcome);
    assert!(message.contains("read_file"));
    assert!(message.contains("path"), "error must quote the field: {message}");
}

#[test]
fn restricted_mode_rejects_paths_outside_the_root() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut router, _pty) = router_with_policy(dir.path(), ApprovalPolicy::Always);
    let mut logger = RecordingLogger::default();

    let outcome = router.dispatch(
        "read_file",
        r#"{"path":"/etc/passwd","offset":0,"limit":10,"mode":"slice","indent":"    "}"#,
        &mut logger,
    );
    assert!(!outcome.success);
    assert!(content_text(&outcome).contains("escapes the restricted root"));
}

#[test]
fn approval_policy_never_refuses_side_effectful_tools() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut router, _pty) = router_with_policy(dir.path(), ApprovalPolicy::Never);
    let mut logger = RecordingLogger::default();

    let marker = dir.path().join("must-not-exist.txt");
    let outcome = router.dispatch(
        "shell",
        &format!(
            r#"{{"command":"touch {}","workdir":null,"timeout_ms":5000}}"#,
            marker.display()
        ),
        &mut logger,
    );

    assert!(!outcome.success);
    assert!(content_text(&outcome).contains("approval policy forbids"));
    assert!(!marker.exists(), "no subprocess may run when refused");
}

#[test]
fn on_request_policy_consults_the_host_prompt() {
    let dir = tempfile::tempdir().expect("tempdir");
    let boundary = Arc::new(FsBoundary::restricted(dir.path()).expect("boundary builds"));
    let pty = Arc::new(PtyManager::new());
    let mut router = ToolRouter::new(boundary, pty, ApprovalPolicy::OnRequest)
        .with_approval_prompt(Box::new(|tool_name, _args| tool_name == "shell"));
    let mut logger = RecordingLogger::default();

    let approved = router.dispatch(
        "shell",
        r#"{"command":"echo approved","workdir":null,"timeout_ms":5000}"#,
        &mut logger,
    );
    assert!(approved.success);
    assert!(approved.content["stdout"].as_str().unwrap_or_default().contains("approved"));

    let denied = router.dispatch(
        "apply_patch_freeform",
        r#"{"patch":"*** Begin Patch\n*** Add File: x.txt\n+x\n*** End Patch"}"#,
        &mut logger,
    );
    assert!(!denied.success);
    assert!(content_text(&denied).contains("approval policy forbids"));
}

#[test]
fn read_only_tools_run_under_the_never_policy() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("visible.txt"), "contents\n").expect("seed file");
    let (mut router, _pty) = router_with_policy(dir.path(), ApprovalPolicy::Never);
    let mut logger = RecordingLogger::default();

    let outcome = router.dispatch(
        "list_dir",
        r#"{"path":".","depth":1,"offset":0,"limit":50}"#,
        &mut logger,
    );
    assert!(outcome.success);
    assert_eq!(outcome.content, serde_json::json!(["visible.txt"]));
}

#[test]
fn dispatches_log_requests_at_info_and_responses_at_debug() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("f.txt"), "x\n").expect("seed file");
    let (mut router, _pty) = router_with_policy(dir.path(), ApprovalPolicy::Always);
    let mut logger = RecordingLogger::default();

    router.dispatch(
        "list_dir",
        r#"{"path":".","depth":1,"offset":0,"limit":10}"#,
        &mut logger,
    );

    assert_eq!(logger.info.len(), 1);
    assert!(logger.info[0].starts_with("tool request: list_dir"));
    assert_eq!(logger.debug.len(), 1);
    assert!(logger.debug[0].starts_with("tool response: list_dir"));
}

#[test]
fn pty_round_trip_through_the_router() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut router, pty) = router_with_policy(dir.path(), ApprovalPolicy::Always);
    let mut logger = RecordingLogger::default();

    let opened = router.dispatch(
        "exec_command",
        r#"{"session_id":"s1","cmd":"/bin/cat","workdir":null}"#,
        &mut logger,
    );
    assert!(opened.success, "open failed: {:?}", opened.content);

    let written = router.dispatch(
        "write_stdin",
        r#"{"session_id":"s1","chars":"hi\n","yield_ms":400}"#,
        &mut logger,
    );
    assert!(written.success);
    assert!(
        written.content["output"]
            .as_str()
            .unwrap_or_default()
            .contains("hi"),
        "output was: {:?}",
        written.content
    );

    pty.close_all();
    let after_close = router.dispatch(
        "write_stdin",
        r#"{"session_id":"s1","chars":"again\n"}"#,
        &mut logger,
    );
    assert!(!after_close.success);
    assert!(content_text(&after_close).contains("unknown PTY session"));
}

#[test]
fn patch_tools_apply_atomically_through_dispatch() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a.txt"), "foo\n").expect("seed a.txt");
    let (mut router, _pty) = router_with_policy(dir.path(), ApprovalPolicy::Always);
    let mut logger = RecordingLogger::default();

    let outcome = router.dispatch(
        "apply_patch_freeform",
        r#"{"patch":"*** Begin Patch\n*** Update File: a.txt\n@@\n-foo\n+bar\n*** End Patch"}"#,
        &mut logger,
    );
    assert!(outcome.success, "apply failed: {:?}", outcome.content);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("a.txt")).expect("read"),
        "bar\n"
    );

    // A verification failure must leave the tree untouched.
    let failed = router.dispatch(
        "apply_patch_freeform",
        r#"{"patch":"*** Begin Patch\n*** Add File: new.txt\n+n\n*** Update File: missing.txt\n@@\n-x\n+y\n*** End Patch"}"#,
        &mut logger,
    );
    assert!(!failed.success);
    assert!(!dir.path().join("new.txt").exists());
}
