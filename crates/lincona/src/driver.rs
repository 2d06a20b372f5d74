use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use agent_tools::{
    ApprovalPolicy, FsBoundary, FsMode, PtyManager, ToolLogger, ToolOutcome, ToolRouter,
};
use responses_api::{
    ChatMessage, ConversationRequest, ResponseEvent, ResponsesClient, TextAccumulator,
};
use serde_json::Value;
use session_store::{
    generate_session_id, log_file_path, session_file_path, Event, EventKind, JsonlEventWriter,
    SessionLogger, DEFAULT_LOG_MAX_BYTES,
};
use tracing::debug;

use crate::commands::{parse_slash_command, SlashCommand, HELP_TEXT};
use crate::config::{ReasoningEffort, ResolvedConfig, Verbosity};
use crate::shutdown::{InterruptState, ShutdownCoordinator};

/// Hard ceiling on model-initiated tool calls within one turn.
pub const MAX_TOOL_HOPS: usize = 8;

const SYSTEM_PROMPT: &str = "You are Lincona, a coding agent. Always use the provided tools to \
inspect the repository before answering questions about files, documentation, or code \
structure. Prefer list_dir/read_file/grep_files to gather evidence; do not guess. Report \
tool errors as-is and never fabricate tool output.";

/// Confirmation hook shared across router rebuilds.
pub type SharedApprovalPrompt = Arc<Mutex<dyn FnMut(&str, &Value) -> bool + Send>>;

/// Errors that must terminate the process (exit 1) after an error event is
/// persisted. Everything recoverable is surfaced to the user instead.
#[derive(Debug)]
pub struct FatalError(pub String);

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for FatalError {}

/// What the REPL should do after one line of input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnControl {
    Continue,
    Quit,
}

/// Session-scoped mutable state. The resolved configuration is never edited;
/// slash commands only touch this overlay.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: String,
    pub history: Vec<ChatMessage>,
    pub model: String,
    pub reasoning_effort: ReasoningEffort,
    pub verbosity: Verbosity,
    pub fs_mode: FsMode,
    pub approval_policy: ApprovalPolicy,
}

/// The turn loop: builds requests from history plus tool specs, consumes the
/// model event stream, dispatches tool calls serially, and persists every
/// step to the session transcript.
pub struct ConversationDriver {
    config: ResolvedConfig,
    state: SessionState,
    client: ResponsesClient,
    router: ToolRouter,
    pty: Arc<PtyManager>,
    writer: Arc<Mutex<JsonlEventWriter>>,
    logger: Arc<Mutex<SessionLogger>>,
    shutdown: Arc<ShutdownCoordinator>,
    interrupts: Arc<InterruptState>,
    approval_prompt: Option<SharedApprovalPrompt>,
    runtime: tokio::runtime::Runtime,
    output: Box<dyn Write + Send>,
}

struct RouterLog<'a> {
    logger: &'a Mutex<SessionLogger>,
}

impl ToolLogger for RouterLog<'_> {
    fn info(&mut self, message: &str) {
        let _ = lock_unpoisoned(self.logger).info(message);
    }

    fn debug(&mut self, message: &str) {
        let _ = lock_unpoisoned(self.logger).debug(message);
    }
}

impl ConversationDriver {
    pub fn new(
        config: ResolvedConfig,
        client: ResponsesClient,
        shutdown: Arc<ShutdownCoordinator>,
        interrupts: Arc<InterruptState>,
        approval_prompt: Option<SharedApprovalPrompt>,
    ) -> Result<Self, FatalError> {
        Self::with_output(
            config,
            client,
            shutdown,
            interrupts,
            approval_prompt,
            Box::new(std::io::stdout()),
        )
    }

    /// Like [`ConversationDriver::new`] with an explicit output sink, so
    /// tests can capture what the user would see.
    pub fn with_output(
        config: ResolvedConfig,
        client: ResponsesClient,
        shutdown: Arc<ShutdownCoordinator>,
        interrupts: Arc<InterruptState>,
        approval_prompt: Option<SharedApprovalPrompt>,
        output: Box<dyn Write + Send>,
    ) -> Result<Self, FatalError> {
        let session_id = generate_session_id();

        let writer = JsonlEventWriter::open(session_file_path(&config.data_root, &session_id))
            .map_err(|error| FatalError(format!("cannot open session transcript: {error}")))?;
        let writer = Arc::new(Mutex::new(writer));

        let logger = SessionLogger::open(
            log_file_path(&config.data_root, &session_id),
            config.log_level,
            Some(DEFAULT_LOG_MAX_BYTES),
        )
        .map_err(|error| FatalError(format!("cannot open session log: {error}")))?;
        let logger = Arc::new(Mutex::new(logger));

        let pty = Arc::new(PtyManager::new());
        shutdown.register_logger(Arc::clone(&logger));
        shutdown.register_writer(Arc::clone(&writer));
        shutdown.register_pty_manager(Arc::clone(&pty));

        let router = build_router(
            config.fs_mode,
            config.approval_policy,
            &pty,
            approval_prompt.as_ref(),
        )?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| FatalError(format!("cannot initialize async runtime: {error}")))?;

        let state = SessionState {
            session_id,
            history: vec![ChatMessage::system(SYSTEM_PROMPT)],
            model: config.model.clone(),
            reasoning_effort: config.reasoning_effort,
            verbosity: config.verbosity,
            fs_mode: config.fs_mode,
            approval_policy: config.approval_policy,
        };

        let driver = Self {
            config,
            state,
            client,
            router,
            pty,
            writer,
            logger,
            shutdown,
            interrupts,
            approval_prompt,
            runtime,
            output,
        };
        driver.persist(EventKind::System {
            text: format!("session started: {}", driver.state.session_id),
        })?;
        let _ = lock_unpoisoned(&driver.logger)
            .info(&format!("session started: {}", driver.state.session_id));
        Ok(driver)
    }

    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    #[must_use]
    pub fn transcript_path(&self) -> PathBuf {
        session_file_path(&self.config.data_root, &self.state.session_id)
    }

    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        log_file_path(&self.config.data_root, &self.state.session_id)
    }

    /// Handles one line of user input: a slash command or a model turn.
    pub fn handle_line(&mut self, line: &str) -> Result<TurnControl, FatalError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(TurnControl::Continue);
        }

        match parse_slash_command(trimmed) {
            Some(command) => self.handle_slash(trimmed, command),
            None => {
                self.run_turn(trimmed)?;
                Ok(TurnControl::Continue)
            }
        }
    }

    fn handle_slash(
        &mut self,
        raw: &str,
        command: SlashCommand,
    ) -> Result<TurnControl, FatalError> {
        self.persist(EventKind::SlashCommand {
            command: raw.to_string(),
        })?;

        match command {
            SlashCommand::NewSession => {
                self.rotate_session()?;
                self.say(&format!("Started new session {}", self.state.session_id));
            }
            SlashCommand::Model(model) => {
                if self.config.allowed_models.contains(&model) {
                    self.state.model = model;
                    self.say(&format!("model set to {}", self.state.model));
                } else {
                    self.say(&format!(
                        "model '{model}' is not in the allowed set: {}",
                        self.config.allowed_models.join(", ")
                    ));
                }
            }
            SlashCommand::Reasoning(level) => match ReasoningEffort::parse(&level) {
                Some(effort) => {
                    self.state.reasoning_effort = effort;
                    self.say(&format!("reasoning set to {}", effort.as_str()));
                }
                None => self.say("reasoning must be one of: none, minimal, low, medium, high"),
            },
            SlashCommand::Approvals(policy) => match ApprovalPolicy::parse(&policy) {
                Some(policy) => {
                    self.state.approval_policy = policy;
                    self.router.set_approval_policy(policy);
                    self.say(&format!("approval policy set to {}", policy.as_str()));
                }
                None => self.say("approvals must be one of: never, on-request, always"),
            },
            SlashCommand::FsMode(mode) => match FsMode::parse(&mode) {
                Some(mode) => {
                    self.router = build_router(
                        mode,
                        self.state.approval_policy,
                        &self.pty,
                        self.approval_prompt.as_ref(),
                    )?;
                    self.state.fs_mode = mode;
                    self.say(&format!("fs mode set to {}", mode.as_str()));
                }
                None => self.say("fsmode must be 'restricted' or 'unrestricted'"),
            },
            SlashCommand::Help => self.say(HELP_TEXT),
            SlashCommand::Quit => return Ok(TurnControl::Quit),
            SlashCommand::Unknown(command) => {
                self.say(&format!("unknown command: {command}; try /help"));
            }
        }

        Ok(TurnControl::Continue)
    }

    fn rotate_session(&mut self) -> Result<(), FatalError> {
        {
            let mut writer = lock_unpoisoned(&self.writer);
            let _ = writer.close();
        }
        {
            let mut logger = lock_unpoisoned(&self.logger);
            let _ = logger.close();
        }
        self.pty.close_all();

        let session_id = generate_session_id();
        // The previous pair stays registered; the coordinator's fixed phases
        // and idempotent close make that harmless.
        let writer =
            JsonlEventWriter::open(session_file_path(&self.config.data_root, &session_id))
                .map_err(|error| FatalError(format!("cannot open session transcript: {error}")))?;
        self.writer = Arc::new(Mutex::new(writer));
        self.shutdown.register_writer(Arc::clone(&self.writer));

        let logger = SessionLogger::open(
            log_file_path(&self.config.data_root, &session_id),
            self.config.log_level,
            Some(DEFAULT_LOG_MAX_BYTES),
        )
        .map_err(|error| FatalError(format!("cannot open session log: {error}")))?;
        self.logger = Arc::new(Mutex::new(logger));
        self.shutdown.register_logger(Arc::clone(&self.logger));

        self.state.session_id = session_id;
        self.state.history = vec![ChatMessage::system(SYSTEM_PROMPT)];
        self.persist(EventKind::System {
            text: format!("session started: {}", self.state.session_id),
        })?;
        let _ = lock_unpoisoned(&self.logger)
            .info(&format!("session started: {}", self.state.session_id));
        Ok(())
    }

    /// One user prompt: streams the reply, dispatches tool calls (at most
    /// [`MAX_TOOL_HOPS`]), and feeds results back until the turn completes.
    pub fn run_turn(&mut self, text: &str) -> Result<(), FatalError> {
        self.interrupts.clear();

        self.persist(EventKind::UserMessage {
            text: text.to_string(),
        })?;
        self.state.history.push(ChatMessage::user(text));

        let mut hops = 0usize;

        loop {
            let request = ConversationRequest {
                model: Some(self.state.model.clone()),
                messages: self.state.history.clone(),
                tools: self.router.tool_specs(),
                reasoning_effort: Some(self.state.reasoning_effort.as_str().to_string()),
                verbosity: Some(self.state.verbosity.as_str().to_string()),
            };

            let cancel = self.interrupts.cancel_signal();
            let submitted = self
                .runtime
                .block_on(self.client.submit(&request, Some(cancel)));
            let mut stream = match submitted {
                Ok(stream) => stream,
                Err(error) => {
                    return self.abort_turn(&format!("request failed: {error}"));
                }
            };

            let mut accumulator = TextAccumulator::default();
            let mut pending_calls: Vec<(String, String, String)> = Vec::new();
            let mut stream_error: Option<String> = None;
            let mut printed_any = false;

            let runtime = &self.runtime;
            let output = &mut self.output;
            runtime.block_on(async {
                while let Some(event) = stream.next().await {
                    match event {
                        ResponseEvent::TextDelta { index, text } => {
                            let _ = write!(output, "{text}");
                            let _ = output.flush();
                            printed_any = true;
                            accumulator.push(index, &text);
                        }
                        ResponseEvent::MessageDone { .. } => {}
                        ResponseEvent::ToolCallStart { call_id, name } => {
                            debug!(%call_id, %name, "tool call started");
                        }
                        ResponseEvent::ToolCallReady {
                            call_id,
                            name,
                            args_json,
                        } => {
                            pending_calls.push((call_id, name, args_json));
                        }
                        ResponseEvent::Error { message, .. } => {
                            stream_error = Some(message);
                            break;
                        }
                        ResponseEvent::TurnDone => break,
                    }
                }
            });
            if printed_any {
                let _ = writeln!(self.output);
            }

            if self.interrupts.cancel_requested() {
                return self.abort_turn("turn cancelled by interrupt");
            }

            let assistant_text = accumulator.combined();
            if !assistant_text.is_empty() {
                self.persist(EventKind::AssistantMessage {
                    text: assistant_text.clone(),
                })?;
                self.state.history.push(ChatMessage::assistant(assistant_text));
            }

            if let Some(message) = stream_error {
                return self.abort_turn(&message);
            }

            if pending_calls.is_empty() {
                return Ok(());
            }

            // Tool calls run strictly serialized; the transcript stays
            // linearizable.
            for (call_id, tool_name, args_json) in pending_calls {
                if self.interrupts.cancel_requested() {
                    return self.abort_turn("turn cancelled by interrupt");
                }

                let arguments = serde_json::from_str::<Value>(&args_json)
                    .unwrap_or(Value::String(args_json.clone()));
                self.persist(EventKind::ToolCall {
                    call_id: call_id.clone(),
                    tool_name: tool_name.clone(),
                    arguments,
                })?;

                hops += 1;
                let outcome = if hops > MAX_TOOL_HOPS {
                    ToolOutcome::fail("tool-hop limit reached")
                } else {
                    let mut log = RouterLog {
                        logger: &self.logger,
                    };
                    self.router.dispatch(&tool_name, &args_json, &mut log)
                };

                self.persist(EventKind::ToolResult {
                    call_id: call_id.clone(),
                    tool_name: tool_name.clone(),
                    content: outcome.content.clone(),
                    success: outcome.success,
                    truncated: outcome.truncated,
                })?;
                if outcome.truncated {
                    self.persist(EventKind::TruncationNotice {
                        detail: format!("output of '{tool_name}' ({call_id}) was truncated"),
                    })?;
                }

                let feedback = serde_json::to_string(&outcome)
                    .unwrap_or_else(|_| "{\"success\":false}".to_string());
                self.state
                    .history
                    .push(ChatMessage::tool(feedback, call_id));
            }
            // Second leg: the loop resubmits with tool results in history.
        }
    }

    /// Persists an error event, tells the user where the details live, and
    /// ends the turn without touching history further.
    fn abort_turn(&mut self, message: &str) -> Result<(), FatalError> {
        self.persist(EventKind::Error {
            message: message.to_string(),
        })?;
        let _ = lock_unpoisoned(&self.logger).error(message);
        let log_path = self.log_path();
        self.say(&format!("error: {message} (details: {})", log_path.display()));
        Ok(())
    }

    fn persist(&self, kind: EventKind) -> Result<(), FatalError> {
        let event = Event::now(kind)
            .map_err(|error| FatalError(format!("cannot build transcript event: {error}")))?;
        lock_unpoisoned(&self.writer)
            .append(&event)
            .map_err(|error| FatalError(format!("session persistence failed: {error}")))
    }

    fn say(&mut self, message: &str) {
        let _ = writeln!(self.output, "{message}");
        let _ = self.output.flush();
    }

    /// Best-effort persistence of a fatal error before the process exits.
    pub fn record_fatal(&mut self, error: &FatalError) {
        let _ = lock_unpoisoned(&self.writer).append(&Event {
            ts: session_store::now_rfc3339().unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string()),
            kind: EventKind::Error {
                message: error.to_string(),
            },
        });
        let _ = lock_unpoisoned(&self.logger).error(&error.to_string());
    }
}

fn build_router(
    fs_mode: FsMode,
    approval_policy: ApprovalPolicy,
    pty: &Arc<PtyManager>,
    approval_prompt: Option<&SharedApprovalPrompt>,
) -> Result<ToolRouter, FatalError> {
    let cwd = std::env::current_dir()
        .map_err(|error| FatalError(format!("cannot resolve working directory: {error}")))?;
    let boundary = FsBoundary::new(fs_mode, cwd)
        .map_err(|error| FatalError(format!("cannot build filesystem boundary: {error}")))?;

    let mut router = ToolRouter::new(Arc::new(boundary), Arc::clone(pty), approval_policy);
    if let Some(shared) = approval_prompt {
        let shared = Arc::clone(shared);
        router = router.with_approval_prompt(Box::new(move |tool_name, args| {
            let mut prompt = lock_unpoisoned(&shared);
            (*prompt)(tool_name, args)
        }));
    }
    Ok(router)
}

fn lock_unpoisoned<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
