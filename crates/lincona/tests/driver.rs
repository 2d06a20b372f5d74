use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::BoxFuture;
use futures_util::stream;
use lincona::config::ResolvedConfig;
use lincona::driver::{ConversationDriver, TurnControl, MAX_TOOL_HOPS};
use lincona::shutdown::{InterruptState, ShutdownCoordinator};
use responses_api::{ByteStream, ResponsesApiError, ResponsesClient, StreamTransport};
use serde_json::Value;
use session_store::{iter_events, EventKind};

struct ScriptedTransport {
    observed_payloads: Mutex<Vec<Value>>,
    legs: Mutex<VecDeque<Vec<String>>>,
}

impl ScriptedTransport {
    fn new(legs: Vec<Vec<String>>) -> Arc<Self> {
        Arc::new(Self {
            observed_payloads: Mutex::new(Vec::new()),
            legs: Mutex::new(VecDeque::from(legs)),
        })
    }

    fn observed_payloads(&self) -> Vec<Value> {
        lock_unpoisoned(&self.observed_payloads).clone()
    }
}

impl StreamTransport for ScriptedTransport {
    fn send(&self, payload: Value) -> BoxFuture<'static, Result<ByteStream, ResponsesApiError>> {
        lock_unpoisoned(&self.observed_payloads).push(payload);
        let chunks = lock_unpoisoned(&self.legs)
            .pop_front()
            .expect("scripted legs should cover every driver request");

        Box::pin(async move {
            let bytes = stream::iter(
                chunks
                    .into_iter()
                    .map(|chunk| Ok(chunk.into_bytes()))
                    .collect::<Vec<_>>(),
            );
            Ok(Box::pin(bytes) as ByteStream)
        })
    }
}

#[derive(Clone, Default)]
struct CapturedOutput(Arc<Mutex<Vec<u8>>>);

impl CapturedOutput {
    fn text(&self) -> String {
        String::from_utf8_lossy(&lock_unpoisoned(&self.0)).to_string()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        lock_unpoisoned(&self.0).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn text_leg(text: &str) -> Vec<String> {
    vec![
        format!("data: {{\"type\":\"response.output_text.delta\",\"index\":0,\"text\":\"{text}\"}}\n\n"),
        "data: {\"type\":\"response.completed\"}\n\n".to_string(),
    ]
}

fn tool_leg(call_id: &str, tool_name: &str, args_json: &str) -> Vec<String> {
    let escaped = args_json.replace('\\', "\\\\").replace('"', "\\\"");
    vec![
        format!("data: {{\"type\":\"response.tool_call.created\",\"call_id\":\"{call_id}\",\"name\":\"{tool_name}\"}}\n\n"),
        format!("data: {{\"type\":\"response.tool_call.arguments.delta\",\"call_id\":\"{call_id}\",\"delta\":\"{escaped}\"}}\n\n"),
        format!("data: {{\"type\":\"response.tool_call.done\",\"call_id\":\"{call_id}\"}}\n\n"),
        "data: {\"type\":\"response.completed\"}\n\n".to_string(),
    ]
}

fn error_leg(message: &str) -> Vec<String> {
    vec![format!(
        "data: {{\"type\":\"response.error\",\"code\":\"server_error\",\"message\":\"{message}\"}}\n\n"
    )]
}

struct Harness {
    driver: ConversationDriver,
    transport: Arc<ScriptedTransport>,
    output: CapturedOutput,
    _data_root: tempfile::TempDir,
}

fn harness(legs: Vec<Vec<String>>) -> Harness {
    let data_root = tempfile::tempdir().expect("tempdir");
    let config = ResolvedConfig::new("test-key").with_data_root(data_root.path());

    let transport = ScriptedTransport::new(legs);
    let client = ResponsesClient::new(Arc::clone(&transport) as Arc<dyn StreamTransport>);
    let output = CapturedOutput::default();

    let driver = ConversationDriver::with_output(
        config,
        client,
        Arc::new(ShutdownCoordinator::new()),
        Arc::new(InterruptState::new()),
        None,
        Box::new(output.clone()),
    )
    .expect("driver starts");

    Harness {
        driver,
        transport,
        output,
        _data_root: data_root,
    }
}

fn transcript_kinds(driver: &ConversationDriver) -> Vec<EventKind> {
    iter_events(driver.transcript_path())
        .expect("transcript opens")
        .collect::<Result<Vec<_>, _>>()
        .expect("transcript is valid")
        .into_iter()
        .map(|event| event.kind)
        .collect()
}

#[test]
fn plain_turn_streams_text_and_persists_in_order() {
    let mut harness = harness(vec![text_leg("Hello!")]);

    let control = harness.driver.handle_line("say hello").expect("turn runs");
    assert_eq!(control, TurnControl::Continue);
    assert!(harness.output.text().contains("Hello!"));

    let kinds = transcript_kinds(&harness.driver);
    assert!(matches!(kinds[0], EventKind::System { .. }));
    assert!(matches!(
        &kinds[1],
        EventKind::UserMessage { text } if text == "say hello"
    ));
    assert!(matches!(
        &kinds[2],
        EventKind::AssistantMessage { text } if text == "Hello!"
    ));
}

#[test]
fn tool_calls_dispatch_and_feed_back_into_the_next_leg() {
    let mut harness = harness(vec![
        tool_leg(
            "call_1",
            "list_dir",
            r#"{"path":".","depth":1,"offset":0,"limit":5}"#,
        ),
        text_leg("All done."),
    ]);

    harness.driver.handle_line("look around").expect("turn runs");

    let kinds = transcript_kinds(&harness.driver);
    let call_position = kinds
        .iter()
        .position(|kind| matches!(kind, EventKind::ToolCall { .. }))
        .expect("tool call persisted");
    let result_position = kinds
        .iter()
        .position(|kind| matches!(kind, EventKind::ToolResult { .. }))
        .expect("tool result persisted");
    assert!(call_position < result_position);
    assert!(matches!(
        &kinds[result_position],
        EventKind::ToolResult { success: true, call_id, .. } if call_id == "call_1"
    ));

    let payloads = harness.transport.observed_payloads();
    assert_eq!(payloads.len(), 2, "tool results trigger a second leg");
    let follow_up_input = payloads[1]["input"].as_array().expect("input array");
    let tool_entry = follow_up_input
        .iter()
        .find(|entry| entry["role"] == "tool")
        .expect("tool result fed back");
    assert_eq!(tool_entry["tool_call_id"], "call_1");

    assert!(harness.output.text().contains("All done."));
}

#[test]
fn tool_hops_beyond_the_limit_are_synthesized_errors() {
    let mut legs: Vec<Vec<String>> = (0..MAX_TOOL_HOPS + 2)
        .map(|index| {
            tool_leg(
                &format!("call_{index}"),
                "list_dir",
                r#"{"path":".","depth":1,"offset":0,"limit":5}"#,
            )
        })
        .collect();
    legs.push(text_leg("wrapping up"));

    let mut harness = harness(legs);
    harness.driver.handle_line("loop forever").expect("turn runs");

    let results: Vec<(bool, String)> = transcript_kinds(&harness.driver)
        .into_iter()
        .filter_map(|kind| match kind {
            EventKind::ToolResult {
                success, content, ..
            } => Some((success, content.to_string())),
            _ => None,
        })
        .collect();

    assert_eq!(results.len(), MAX_TOOL_HOPS + 2);
    assert!(results[..MAX_TOOL_HOPS].iter().all(|(success, _)| *success));
    for (success, content) in &results[MAX_TOOL_HOPS..] {
        assert!(!success);
        assert!(content.contains("tool-hop limit reached"));
    }
}

#[test]
fn truncated_tool_results_leave_a_truncation_notice() {
    // The boundary roots at the test process cwd; the crate manifest is a
    // stable multi-line file there.
    let mut harness = harness(vec![
        tool_leg(
            "call_rf",
            "read_file",
            r#"{"path":"Cargo.toml","offset":0,"limit":1,"mode":"slice","indent":""}"#,
        ),
        text_leg("done"),
    ]);

    harness.driver.handle_line("peek at the manifest").expect("turn runs");

    let kinds = transcript_kinds(&harness.driver);
    let result_position = kinds
        .iter()
        .position(|kind| matches!(kind, EventKind::ToolResult { truncated: true, .. }))
        .expect("truncated tool result persisted");
    assert!(matches!(
        &kinds[result_position + 1],
        EventKind::TruncationNotice { detail } if detail.contains("read_file")
    ));
}

#[test]
fn stream_errors_abort_the_turn_and_point_at_the_log() {
    let mut harness = harness(vec![error_leg("model fell over")]);

    harness.driver.handle_line("do something").expect("turn handled");

    let kinds = transcript_kinds(&harness.driver);
    assert!(matches!(
        kinds.last(),
        Some(EventKind::Error { message }) if message.contains("model fell over")
    ));
    let printed = harness.output.text();
    assert!(printed.contains("error: model fell over"));
    assert!(printed.contains(".log"));
}

#[test]
fn approval_policy_never_refuses_shell_through_a_full_turn() {
    let mut harness = harness(vec![
        tool_leg(
            "call_sh",
            "shell",
            r#"{"command":"echo hi","workdir":null,"timeout_ms":1000}"#,
        ),
        text_leg("understood"),
    ]);

    harness
        .driver
        .handle_line("/approvals never")
        .expect("slash handled");
    harness.driver.handle_line("run a command").expect("turn runs");

    let refused = transcript_kinds(&harness.driver)
        .into_iter()
        .find_map(|kind| match kind {
            EventKind::ToolResult {
                success, content, ..
            } => Some((success, content.to_string())),
            _ => None,
        })
        .expect("tool result persisted");
    assert!(!refused.0);
    assert!(refused.1.contains("approval policy forbids"));
}

#[test]
fn slash_commands_mutate_the_overlay_and_persist_events() {
    let mut harness = harness(Vec::new());

    harness
        .driver
        .handle_line("/reasoning high")
        .expect("slash handled");
    assert_eq!(harness.driver.state().reasoning_effort.as_str(), "high");

    harness
        .driver
        .handle_line("/model not-a-real-model")
        .expect("slash handled");
    assert_ne!(harness.driver.state().model, "not-a-real-model");
    assert!(harness.output.text().contains("not in the allowed set"));

    let slash_events = transcript_kinds(&harness.driver)
        .into_iter()
        .filter(|kind| matches!(kind, EventKind::SlashCommand { .. }))
        .count();
    assert_eq!(slash_events, 2);

    assert!(
        harness.transport.observed_payloads().is_empty(),
        "slash commands never reach the model"
    );
}

#[test]
fn unknown_slash_commands_are_user_errors_not_model_requests() {
    let mut harness = harness(Vec::new());

    harness
        .driver
        .handle_line("/frobnicate")
        .expect("slash handled");

    assert!(harness.output.text().contains("unknown command: /frobnicate"));
    assert!(harness.transport.observed_payloads().is_empty());
}

#[test]
fn newsession_rotates_the_transcript_and_reseeds_history() {
    let mut harness = harness(Vec::new());
    let first_id = harness.driver.state().session_id.clone();
    let first_path = harness.driver.transcript_path();

    let control = harness
        .driver
        .handle_line("/newsession")
        .expect("slash handled");
    assert_eq!(control, TurnControl::Continue);

    let second_id = harness.driver.state().session_id.clone();
    assert_ne!(first_id, second_id);
    assert!(first_path.exists());
    assert!(harness.driver.transcript_path().exists());
    assert_eq!(harness.driver.state().history.len(), 1, "history reseeded");

    let kinds = transcript_kinds(&harness.driver);
    assert!(matches!(kinds[0], EventKind::System { .. }));
}

#[test]
fn quit_returns_the_quit_control() {
    let mut harness = harness(Vec::new());
    let control = harness.driver.handle_line("/quit").expect("slash handled");
    assert_eq!(control, TurnControl::Quit);
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
