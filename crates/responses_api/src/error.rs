use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Error as JsonError;

#[derive(Debug)]
pub enum ResponsesApiError {
    MissingApiKey,
    InvalidBaseUrl(String),
    Request(reqwest::Error),
    /// 401/403; never retried.
    Auth(StatusCode, String),
    /// Non-2xx after retry handling.
    Status(StatusCode, String),
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },
    Timeout(String),
    MalformedSse(String),
    ToolBufferOverflow {
        call_id: String,
        limit_bytes: usize,
    },
    Serde(JsonError),
    RetryExhausted {
        status: Option<StatusCode>,
        last_error: Option<String>,
    },
    Cancelled,
    Unknown(String),
}

impl ResponsesApiError {
    /// Retryable per the transport policy: 429, 5xx, and known transient
    /// error text.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Status(status, message) => {
                status.is_server_error()
                    || crate::retry::is_retryable_http_error(status.as_u16(), message)
            }
            Self::Request(error) => error.is_connect() || error.is_timeout(),
            Self::Timeout(_) => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl fmt::Display for ResponsesApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingApiKey => write!(f, "API key is required"),
            Self::InvalidBaseUrl(value) => write!(f, "invalid base URL: {value}"),
            Self::Request(error) => write!(f, "request error: {error}"),
            Self::Auth(status, message) => write!(f, "authentication failed (HTTP {status}): {message}"),
            Self::Status(status, message) => write!(f, "HTTP {status} {message}"),
            Self::RateLimited {
                message,
                retry_after,
            } => match retry_after {
                Some(after) => write!(f, "rate limited (retry after {}s): {message}", after.as_secs()),
                None => write!(f, "rate limited: {message}"),
            },
            Self::Timeout(message) => write!(f, "request timed out: {message}"),
            Self::MalformedSse(message) => write!(f, "malformed SSE event: {message}"),
            Self::ToolBufferOverflow {
                call_id,
                limit_bytes,
            } => write!(
                f,
                "tool call {call_id} exceeded the {limit_bytes}-byte argument buffer"
            ),
            Self::Serde(error) => write!(f, "serialization error: {error}"),
            Self::RetryExhausted { status, last_error } => {
                let status = status
                    .map(|status| status.as_u16().to_string())
                    .unwrap_or_else(|| "n/a".to_owned());
                write!(
                    f,
                    "retry exhausted after max attempts (status: {status}, last_error: {last_error:?})"
                )
            }
            Self::Cancelled => write!(f, "request was cancelled"),
            Self::Unknown(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for ResponsesApiError {}

impl From<reqwest::Error> for ResponsesApiError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(error.to_string())
        } else {
            Self::Request(error)
        }
    }
}

impl From<JsonError> for ResponsesApiError {
    fn from(error: JsonError) -> Self {
        Self::Serde(error)
    }
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    error: Option<ErrorPayloadFields>,
}

#[derive(Debug, Deserialize)]
struct ErrorPayloadFields {
    message: Option<String>,
}

/// Best-effort extraction of a human message from a non-2xx body.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(ErrorPayload { error: Some(fields) }) = serde_json::from_str::<ErrorPayload>(body) {
        if let Some(message) = fields.message.filter(|message| !message.is_empty()) {
            return message;
        }
    }

    if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.to_string()
    }
}
