use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Chat roles accepted by the Responses endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One history entry sent as request input. Tool results carry the
/// `tool_call_id` they satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            tool_call_id: None,
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            tool_call_id: None,
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            tool_call_id: None,
        }
    }

    #[must_use]
    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// One streaming request. `None` fields fall back to client defaults.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConversationRequest {
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    /// Tool specs exactly as advertised by the registry.
    pub tools: Vec<Value>,
    pub reasoning_effort: Option<String>,
    pub verbosity: Option<String>,
}

impl ConversationRequest {
    /// Serializes the request body, resolving absent fields from the given
    /// client defaults.
    pub fn to_payload(
        &self,
        default_model: Option<&str>,
        default_reasoning_effort: Option<&str>,
        default_verbosity: Option<&str>,
    ) -> Result<Value, String> {
        let model = self
            .model
            .as_deref()
            .or(default_model)
            .filter(|model| !model.trim().is_empty())
            .ok_or_else(|| "model is required".to_string())?;
        if self.messages.is_empty() {
            return Err("messages cannot be empty".to_string());
        }

        let mut payload = json!({
            "model": model,
            "input": self.messages,
            "stream": true,
        });

        if !self.tools.is_empty() {
            payload["tools"] = Value::Array(self.tools.clone());
        }
        if let Some(effort) = self.reasoning_effort.as_deref().or(default_reasoning_effort) {
            payload["reasoning"] = json!({ "effort": effort });
        }
        if let Some(verbosity) = self.verbosity.as_deref().or(default_verbosity) {
            payload["verbosity"] = Value::String(verbosity.to_string());
        }

        Ok(payload)
    }
}
