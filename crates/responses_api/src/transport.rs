use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use url::Url;

use crate::config::ResponsesApiConfig;
use crate::error::{parse_error_message, ResponsesApiError};
use crate::url::normalize_responses_url;

/// Raw byte chunks produced by one streaming response.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, ResponsesApiError>>;

/// Contract for delivering one request and streaming its response bytes.
///
/// Implementations classify non-2xx statuses into typed errors so the retry
/// layer can tell retryable failures from fatal ones.
pub trait StreamTransport: Send + Sync {
    fn send(&self, payload: Value) -> BoxFuture<'static, Result<ByteStream, ResponsesApiError>>;
}

/// reqwest-backed transport for the real Responses endpoint.
#[derive(Debug)]
pub struct HttpTransport {
    http: Client,
    endpoint: String,
    api_key: String,
    user_agent: Option<String>,
}

impl HttpTransport {
    pub fn new(config: ResponsesApiConfig) -> Result<Self, ResponsesApiError> {
        if config.api_key.trim().is_empty() {
            return Err(ResponsesApiError::MissingApiKey);
        }

        let endpoint = normalize_responses_url(&config.base_url);
        Url::parse(&endpoint)
            .map_err(|error| ResponsesApiError::InvalidBaseUrl(format!("{endpoint}: {error}")))?;

        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(ResponsesApiError::from)?;

        Ok(Self {
            http,
            endpoint,
            api_key: config.api_key,
            user_agent: config.user_agent,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl StreamTransport for HttpTransport {
    fn send(&self, payload: Value) -> BoxFuture<'static, Result<ByteStream, ResponsesApiError>> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header(ACCEPT, "text/event-stream")
            .json(&payload);
        if let Some(user_agent) = &self.user_agent {
            request = request.header(USER_AGENT, user_agent.clone());
        }

        Box::pin(async move {
            let response = request.send().await.map_err(ResponsesApiError::from)?;
            let status = response.status();

            if !status.is_success() {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<u64>().ok())
                    .map(Duration::from_secs);
                let body = response.text().await.unwrap_or_default();
                let message = parse_error_message(status, &body);

                return Err(match status {
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                        ResponsesApiError::Auth(status, message)
                    }
                    StatusCode::TOO_MANY_REQUESTS => ResponsesApiError::RateLimited {
                        message,
                        retry_after,
                    },
                    _ => ResponsesApiError::Status(status, message),
                });
            }

            let bytes = response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(ResponsesApiError::from));
            Ok(Box::pin(bytes) as ByteStream)
        })
    }
}

/// In-memory transport that replays fixed chunks, for tests and offline use.
#[derive(Debug, Clone)]
pub struct MockTransport {
    chunks: Vec<Vec<u8>>,
}

impl MockTransport {
    #[must_use]
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self { chunks }
    }

    #[must_use]
    pub fn from_text(chunks: &[&str]) -> Self {
        Self::new(chunks.iter().map(|chunk| chunk.as_bytes().to_vec()).collect())
    }
}

impl StreamTransport for MockTransport {
    fn send(&self, _payload: Value) -> BoxFuture<'static, Result<ByteStream, ResponsesApiError>> {
        let chunks = self.chunks.clone();
        Box::pin(async move {
            let bytes = stream::iter(chunks.into_iter().map(Ok));
            Ok(Box::pin(bytes) as ByteStream)
        })
    }
}
