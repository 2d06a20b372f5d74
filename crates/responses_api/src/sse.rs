use std::collections::HashMap;

use serde_json::Value;

use crate::error::ResponsesApiError;
use crate::events::ResponseEvent;

/// Ceiling for one tool call's buffered argument bytes.
pub const DEFAULT_MAX_TOOL_BUFFER_BYTES: usize = 1024 * 1024;

/// Incremental parser for SSE text streams.
///
/// Bytes are consumed one line at a time: `data:` lines accumulate into the
/// current frame, a blank line completes it. Partial lines, partial frames,
/// and partial tool-call arguments all stay buffered across `feed` calls, so
/// the output is a deterministic function of the fed bytes.
#[derive(Debug)]
pub struct SseStreamParser {
    buffer: Vec<u8>,
    frame_data: Vec<String>,
    arg_buffers: HashMap<String, String>,
    tool_names: HashMap<String, String>,
    max_tool_buffer_bytes: usize,
    turn_done_emitted: bool,
}

impl Default for SseStreamParser {
    fn default() -> Self {
        Self {
            buffer: Vec::new(),
            frame_data: Vec::new(),
            arg_buffers: HashMap::new(),
            tool_names: HashMap::new(),
            max_tool_buffer_bytes: DEFAULT_MAX_TOOL_BUFFER_BYTES,
            turn_done_emitted: false,
        }
    }
}

impl SseStreamParser {
    #[must_use]
    pub fn with_max_tool_buffer_bytes(mut self, limit: usize) -> Self {
        self.max_tool_buffer_bytes = limit;
        self
    }

    /// Feed bytes into the parser and drain the events of every frame that
    /// completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<ResponseEvent>, ResponsesApiError> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(line) = self.take_line()? {
            if line.is_empty() {
                if self.frame_data.is_empty() {
                    continue;
                }
                let payload = self.frame_data.join("\n");
                self.frame_data.clear();
                self.handle_payload(&payload, &mut events)?;
            } else if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    self.frame_data.push(data.to_string());
                }
            }
            // Other SSE fields (event:, id:, retry:, comments) carry nothing
            // this client consumes.
        }

        Ok(events)
    }

    /// Parse a complete SSE payload in one shot.
    pub fn parse_frames(input: &str) -> Result<Vec<ResponseEvent>, ResponsesApiError> {
        let mut parser = Self::default();
        parser.feed(input.as_bytes())
    }

    #[must_use]
    pub fn is_empty_buffer(&self) -> bool {
        self.frame_data.is_empty() && self.buffer.iter().all(|byte| byte.is_ascii_whitespace())
    }

    /// Removes and returns the next complete line, without its terminator
    /// and with any `\r` of a CRLF pair dropped.
    fn take_line(&mut self) -> Result<Option<String>, ResponsesApiError> {
        let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') else {
            return Ok(None);
        };

        let mut raw: Vec<u8> = self.buffer.drain(..=newline).collect();
        raw.pop();
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }

        String::from_utf8(raw)
            .map(Some)
            .map_err(|_| ResponsesApiError::MalformedSse("line is not valid UTF-8".to_string()))
    }

    fn handle_payload(
        &mut self,
        payload: &str,
        events: &mut Vec<ResponseEvent>,
    ) -> Result<(), ResponsesApiError> {
        if payload == "[DONE]" {
            self.push_turn_done(events);
            return Ok(());
        }

        let value = serde_json::from_str::<Value>(payload)
            .map_err(|_| ResponsesApiError::MalformedSse(clip(payload)))?;
        self.map_event(value, events)
    }

    fn map_event(
        &mut self,
        value: Value,
        events: &mut Vec<ResponseEvent>,
    ) -> Result<(), ResponsesApiError> {
        let Some(event_type) = value.get("type").and_then(Value::as_str) else {
            return Err(ResponsesApiError::MalformedSse(
                "payload has no type field".to_string(),
            ));
        };

        match event_type {
            "response.output_text.delta" => {
                let index = value.get("index").and_then(Value::as_u64).unwrap_or(0) as u32;
                let text = value
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_owned();
                events.push(ResponseEvent::TextDelta { index, text });
            }
            "response.output_text.done" => {
                let index = value.get("index").and_then(Value::as_u64).unwrap_or(0) as u32;
                events.push(ResponseEvent::MessageDone { index });
            }
            "response.tool_call.created" => {
                let call_id = required_string(&value, "call_id")?;
                let name = required_string(&value, "name")?;
                self.arg_buffers.insert(call_id.clone(), String::new());
                self.tool_names.insert(call_id.clone(), name.clone());
                events.push(ResponseEvent::ToolCallStart { call_id, name });
            }
            "response.tool_call.arguments.delta" => {
                let call_id = required_string(&value, "call_id")?;
                let delta = value.get("delta").and_then(Value::as_str).unwrap_or("");
                let buffer = self.arg_buffers.entry(call_id.clone()).or_default();
                buffer.push_str(delta);
                if buffer.len() > self.max_tool_buffer_bytes {
                    self.arg_buffers.remove(&call_id);
                    return Err(ResponsesApiError::ToolBufferOverflow {
                        call_id,
                        limit_bytes: self.max_tool_buffer_bytes,
                    });
                }
            }
            "response.tool_call.done" => {
                let call_id = required_string(&value, "call_id")?;
                let name = value
                    .get("name")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned)
                    .or_else(|| self.tool_names.remove(&call_id))
                    .ok_or_else(|| {
                        ResponsesApiError::MalformedSse(format!(
                            "tool call {call_id} completed without a name"
                        ))
                    })?;
                self.tool_names.remove(&call_id);

                let mut args_json = self.arg_buffers.remove(&call_id).unwrap_or_default();
                if args_json.is_empty() {
                    if let Some(inline) = value.get("arguments").and_then(Value::as_str) {
                        args_json = inline.to_owned();
                    }
                }

                match serde_json::from_str::<Value>(&args_json) {
                    Ok(Value::Object(_)) => events.push(ResponseEvent::ToolCallReady {
                        call_id,
                        name,
                        args_json,
                    }),
                    _ => events.push(ResponseEvent::Error {
                        code: Some("invalid_tool_arguments".to_string()),
                        message: format!(
                            "tool call {call_id} ({name}) arguments are not a JSON object"
                        ),
                        retry_after: None,
                    }),
                }
            }
            "response.error" => {
                let code = value
                    .get("code")
                    .and_then(Value::as_str)
                    .filter(|code| !code.is_empty())
                    .map(ToOwned::to_owned);
                let message = value
                    .get("message")
                    .and_then(Value::as_str)
                    .filter(|message| !message.is_empty())
                    .map(ToOwned::to_owned)
                    .unwrap_or_else(|| "stream reported an error".to_string());
                let retry_after = value
                    .get("retry_after")
                    .and_then(Value::as_u64)
                    .map(std::time::Duration::from_secs);
                events.push(ResponseEvent::Error {
                    code,
                    message,
                    retry_after,
                });
            }
            "response.completed" => self.push_turn_done(events),
            // Unknown event types are skipped; the endpoint may grow kinds
            // this client does not consume.
            _ => {}
        }

        Ok(())
    }

    fn push_turn_done(&mut self, events: &mut Vec<ResponseEvent>) {
        if !self.turn_done_emitted {
            self.turn_done_emitted = true;
            events.push(ResponseEvent::TurnDone);
        }
    }
}

fn required_string(value: &Value, field: &str) -> Result<String, ResponsesApiError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .map(ToOwned::to_owned)
        .ok_or_else(|| {
            ResponsesApiError::MalformedSse(format!("payload is missing required field '{field}'"))
        })
}

fn clip(payload: &str) -> String {
    const LIMIT: usize = 200;
    if payload.len() <= LIMIT {
        payload.to_string()
    } else {
        let mut end = LIMIT;
        while !payload.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &payload[..end])
    }
}
