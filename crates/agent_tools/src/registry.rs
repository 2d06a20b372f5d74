use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::boundary::FsBoundary;
use crate::error::ToolError;
use crate::pty::PtyManager;
use crate::tools;

/// Rule governing side-effectful tools (shell, patch apply, PTY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalPolicy {
    Never,
    OnRequest,
    Always,
}

impl ApprovalPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value.to_ascii_lowercase().as_str() {
            "never" => Self::Never,
            "on-request" => Self::OnRequest,
            "always" => Self::Always,
            _ => return None,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::OnRequest => "on-request",
            Self::Always => "always",
        }
    }
}

/// Host-provided confirmation hook for the `on-request` policy. Receives the
/// tool name and validated arguments; returns whether to proceed.
pub type ApprovalPrompt = Box<dyn FnMut(&str, &Value) -> bool + Send>;

/// Sink for the router's request/response records. The host wires this to
/// the session logger; nothing is ever written to stdout.
pub trait ToolLogger {
    fn info(&mut self, message: &str);
    fn debug(&mut self, message: &str);
}

/// Logger that drops everything; useful for standalone dispatch.
#[derive(Debug, Default)]
pub struct NullToolLogger;

impl ToolLogger for NullToolLogger {
    fn info(&mut self, _message: &str) {}
    fn debug(&mut self, _message: &str) {}
}

/// Result of one dispatch, fed back to the model as a tool-role message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutcome {
    pub success: bool,
    pub content: Value,
    pub truncated: bool,
}

impl ToolOutcome {
    #[must_use]
    pub fn ok(content: impl Into<Value>) -> Self {
        Self {
            success: true,
            content: content.into(),
            truncated: false,
        }
    }

    #[must_use]
    pub fn ok_truncated(content: impl Into<Value>, truncated: bool) -> Self {
        Self {
            success: true,
            content: content.into(),
            truncated,
        }
    }

    #[must_use]
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            content: Value::String(message.into()),
            truncated: false,
        }
    }
}

type Handler = Box<dyn Fn(Value) -> Result<ToolOutcome, ToolError> + Send>;

/// One tool: the schema advertised to the model plus its handler.
pub struct ToolRegistration {
    pub name: &'static str,
    pub description: &'static str,
    /// JSON-Schema object; the authoritative contract for this tool.
    pub parameters: Value,
    pub requires_approval: bool,
    pub(crate) handler: Handler,
}

impl ToolRegistration {
    pub(crate) fn new(
        name: &'static str,
        description: &'static str,
        parameters: Value,
        requires_approval: bool,
        handler: Handler,
    ) -> Self {
        Self {
            name,
            description,
            parameters,
            requires_approval,
            handler,
        }
    }
}

/// All built-in tools, in advertisement order.
pub fn builtin_registrations(
    boundary: &Arc<FsBoundary>,
    pty: &Arc<PtyManager>,
) -> Vec<ToolRegistration> {
    let mut registrations = Vec::new();
    registrations.extend(tools::list_dir::registrations(boundary));
    registrations.extend(tools::read_file::registrations(boundary));
    registrations.extend(tools::grep_files::registrations(boundary));
    registrations.extend(tools::apply_patch::registrations(boundary));
    registrations.extend(tools::shell::registrations(boundary));
    registrations.extend(tools::exec_pty::registrations(boundary, pty));
    registrations
}

/// Dispatches tool calls with schema validation and approval gating.
pub struct ToolRouter {
    registrations: Vec<ToolRegistration>,
    index: HashMap<&'static str, usize>,
    approval_policy: ApprovalPolicy,
    approval_prompt: Option<ApprovalPrompt>,
}

impl ToolRouter {
    pub fn new(
        boundary: Arc<FsBoundary>,
        pty: Arc<PtyManager>,
        approval_policy: ApprovalPolicy,
    ) -> Self {
        let registrations = builtin_registrations(&boundary, &pty);
        let index = registrations
            .iter()
            .enumerate()
            .map(|(position, registration)| (registration.name, position))
            .collect();

        Self {
            registrations,
            index,
            approval_policy,
            approval_prompt: None,
        }
    }

    #[must_use]
    pub fn with_approval_prompt(mut self, prompt: ApprovalPrompt) -> Self {
        self.approval_prompt = Some(prompt);
        self
    }

    pub fn set_approval_policy(&mut self, policy: ApprovalPolicy) {
        self.approval_policy = policy;
    }

    #[must_use]
    pub fn approval_policy(&self) -> ApprovalPolicy {
        self.approval_policy
    }

    /// The tool array delivered to the model verbatim.
    #[must_use]
    pub fn tool_specs(&self) -> Vec<Value> {
        self.registrations
            .iter()
            .map(|registration| {
                json!({
                    "type": "function",
                    "name": registration.name,
                    "description": registration.description,
                    "parameters": registration.parameters,
                })
            })
            .collect()
    }

    /// Validates and runs one tool call. Non-fatal failures come back as
    /// `success = false` outcomes so the model can recover.
    pub fn dispatch(
        &mut self,
        tool_name: &str,
        raw_args_json: &str,
        logger: &mut dyn ToolLogger,
    ) -> ToolOutcome {
        logger.info(&format!(
            "tool request: {tool_name} args={}",
            clip_for_log(raw_args_json)
        ));

        let outcome = self.dispatch_inner(tool_name, raw_args_json);
        let rendered = serde_json::to_string(&outcome)
            .unwrap_or_else(|_| "<unserializable>".to_string());
        logger.debug(&format!(
            "tool response: {tool_name} result={}",
            clip_for_log(&rendered)
        ));
        outcome
    }

    fn dispatch_inner(&mut self, tool_name: &str, raw_args_json: &str) -> ToolOutcome {
        let Some(position) = self.index.get(tool_name).copied() else {
            return ToolOutcome::fail(ToolError::ToolNotFound(tool_name.to_string()).to_string());
        };

        let args = match serde_json::from_str::<Value>(raw_args_json) {
            Ok(args @ Value::Object(_)) => args,
            Ok(_) => {
                return ToolOutcome::fail(
                    ToolError::invalid_arguments(tool_name, "arguments must be a JSON object")
                        .to_string(),
                );
            }
            Err(error) => {
                return ToolOutcome::fail(
                    ToolError::invalid_arguments(tool_name, format!("arguments are not valid JSON: {error}"))
                        .to_string(),
                );
            }
        };

        let registration = &self.registrations[position];
        if registration.requires_approval {
            match self.approval_policy {
                ApprovalPolicy::Never => {
                    return ToolOutcome::fail(
                        ToolError::ApprovalDenied(tool_name.to_string()).to_string(),
                    );
                }
                ApprovalPolicy::OnRequest => {
                    let approved = self
                        .approval_prompt
                        .as_mut()
                        .map(|prompt| prompt(tool_name, &args))
                        .unwrap_or(false);
                    if !approved {
                        return ToolOutcome::fail(
                            ToolError::ApprovalDenied(tool_name.to_string()).to_string(),
                        );
                    }
                }
                ApprovalPolicy::Always => {}
            }
        }

        let registration = &self.registrations[position];
        match (registration.handler)(args) {
            Ok(outcome) => outcome,
            Err(error) => ToolOutcome::fail(error.to_string()),
        }
    }
}

/// Deserializes typed tool arguments, naming the offending field on failure.
pub(crate) fn parse_args<T: for<'de> Deserialize<'de>>(
    tool_name: &'static str,
    args: Value,
) -> Result<T, ToolError> {
    serde_json::from_value(args)
        .map_err(|error| ToolError::invalid_arguments(tool_name, error.to_string()))
}

fn clip_for_log(text: &str) -> String {
    const LIMIT: usize = 2000;
    if text.len() <= LIMIT {
        return text.to_string();
    }
    let mut end = LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &text[..end])
}
