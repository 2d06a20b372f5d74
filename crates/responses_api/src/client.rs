use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::ResponsesApiError;
use crate::events::ResponseEvent;
use crate::payload::ConversationRequest;
use crate::retry::RetryPolicy;
use crate::sse::{SseStreamParser, DEFAULT_MAX_TOOL_BUFFER_BYTES};
use crate::transport::{ByteStream, StreamTransport};

/// Bounded event-queue capacity coupling producer and consumer. A slow
/// consumer stalls the byte reader instead of buffering without limit.
pub const MAX_EVENT_QUEUE: usize = 16;

/// Optional cancellation signal shared across request and stream loops.
pub type CancellationSignal = Arc<AtomicBool>;

/// Streaming client over a [`StreamTransport`].
///
/// Per-request values fall back to the client defaults configured here.
pub struct ResponsesClient {
    transport: Arc<dyn StreamTransport>,
    default_model: Option<String>,
    default_reasoning_effort: Option<String>,
    default_verbosity: Option<String>,
    retry_policy: RetryPolicy,
    max_tool_buffer_bytes: usize,
}

/// Consumer half of one submitted turn.
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::Receiver<ResponseEvent>,
}

impl EventStream {
    /// Next event, or `None` once the stream has closed.
    pub async fn next(&mut self) -> Option<ResponseEvent> {
        self.receiver.recv().await
    }
}

impl ResponsesClient {
    pub fn new(transport: Arc<dyn StreamTransport>) -> Self {
        Self {
            transport,
            default_model: None,
            default_reasoning_effort: None,
            default_verbosity: None,
            retry_policy: RetryPolicy::default(),
            max_tool_buffer_bytes: DEFAULT_MAX_TOOL_BUFFER_BYTES,
        }
    }

    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_default_reasoning_effort(mut self, effort: impl Into<String>) -> Self {
        self.default_reasoning_effort = Some(effort.into());
        self
    }

    #[must_use]
    pub fn with_default_verbosity(mut self, verbosity: impl Into<String>) -> Self {
        self.default_verbosity = Some(verbosity.into());
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    #[must_use]
    pub fn with_max_tool_buffer_bytes(mut self, limit: usize) -> Self {
        self.max_tool_buffer_bytes = limit;
        self
    }

    /// Submits one request and returns the event stream for its reply.
    ///
    /// Retry happens only here, before any event has been produced; once the
    /// byte stream is open, failures surface as [`ResponseEvent::Error`].
    pub async fn submit(
        &self,
        request: &ConversationRequest,
        cancellation: Option<CancellationSignal>,
    ) -> Result<EventStream, ResponsesApiError> {
        let payload = request
            .to_payload(
                self.default_model.as_deref(),
                self.default_reasoning_effort.as_deref(),
                self.default_verbosity.as_deref(),
            )
            .map_err(ResponsesApiError::Unknown)?;

        let bytes = self.send_with_retry(payload, cancellation.as_ref()).await?;

        let (sender, receiver) = mpsc::channel(MAX_EVENT_QUEUE);
        let max_tool_buffer_bytes = self.max_tool_buffer_bytes;
        tokio::spawn(consume_stream(
            bytes,
            sender,
            cancellation,
            max_tool_buffer_bytes,
        ));

        Ok(EventStream { receiver })
    }

    async fn send_with_retry(
        &self,
        payload: Value,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<ByteStream, ResponsesApiError> {
        let mut last_status: Option<StatusCode> = None;
        let mut last_error: Option<String> = None;

        for attempt in 0..self.retry_policy.max_attempts {
            if is_cancelled(cancellation) {
                return Err(ResponsesApiError::Cancelled);
            }

            match self.transport.send(payload.clone()).await {
                Ok(stream) => return Ok(stream),
                Err(error) => {
                    if matches!(error, ResponsesApiError::Auth(..)) {
                        return Err(error);
                    }
                    if attempt + 1 >= self.retry_policy.max_attempts || !error.is_retryable() {
                        return Err(error);
                    }

                    let delay = self.retry_policy.delay(attempt, error.retry_after());
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, %error, "retrying request");
                    last_status = match &error {
                        ResponsesApiError::Status(status, _) => Some(*status),
                        ResponsesApiError::RateLimited { .. } => {
                            Some(StatusCode::TOO_MANY_REQUESTS)
                        }
                        _ => last_status,
                    };
                    last_error = Some(error.to_string());
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(ResponsesApiError::RetryExhausted {
            status: last_status,
            last_error,
        })
    }
}

/// Pulls bytes only while the bounded queue has capacity, parses them, and
/// forwards events. An error event is always enqueued before the closing of
/// the channel.
async fn consume_stream(
    mut bytes: ByteStream,
    queue: mpsc::Sender<ResponseEvent>,
    cancellation: Option<CancellationSignal>,
    max_tool_buffer_bytes: usize,
) {
    let mut parser = SseStreamParser::default().with_max_tool_buffer_bytes(max_tool_buffer_bytes);

    while let Some(chunk) = bytes.next().await {
        if is_cancelled(cancellation.as_ref()) {
            return;
        }

        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(error) => {
                let _ = queue
                    .send(ResponseEvent::Error {
                        code: None,
                        message: error.to_string(),
                        retry_after: None,
                    })
                    .await;
                return;
            }
        };

        let events = match parser.feed(&chunk) {
            Ok(events) => events,
            Err(error) => {
                let _ = queue
                    .send(ResponseEvent::Error {
                        code: None,
                        message: error.to_string(),
                        retry_after: None,
                    })
                    .await;
                return;
            }
        };

        for event in events {
            let terminal = event.is_terminal();
            if queue.send(event).await.is_err() {
                // Consumer went away; nothing left to deliver to.
                return;
            }
            if terminal {
                return;
            }
        }
    }

    // Reaching the end of the byte stream without a terminal event means the
    // server closed early.
    let _ = queue
        .send(ResponseEvent::Error {
            code: None,
            message: "stream ended without completion".to_string(),
            retry_after: None,
        })
        .await;
}

fn is_cancelled(cancellation: Option<&CancellationSignal>) -> bool {
    cancellation.is_some_and(|token| token.load(Ordering::Acquire))
}
