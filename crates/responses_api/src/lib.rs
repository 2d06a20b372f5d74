//! Transport-only client primitives for a Responses-style streaming endpoint.
//!
//! This crate owns request building, SSE decoding, retry, and back-pressured
//! event delivery. It contains no tool execution, no persistence, and no
//! terminal coupling; callers feed it a [`ConversationRequest`] and consume a
//! typed [`ResponseEvent`] sequence.
//!
//! The SSE parser is a pure function of the bytes it is fed: the same input
//! always yields the same event sequence. Partial tool-call arguments are
//! buffered per call id (bounded) and surface only as a single
//! [`ResponseEvent::ToolCallReady`] once complete.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod payload;
pub mod retry;
pub mod sse;
pub mod transport;
pub mod url;

pub use client::{EventStream, ResponsesClient, MAX_EVENT_QUEUE};
pub use config::ResponsesApiConfig;
pub use error::ResponsesApiError;
pub use events::{ResponseEvent, TextAccumulator};
pub use payload::{ChatMessage, ConversationRequest, MessageRole};
pub use retry::RetryPolicy;
pub use sse::SseStreamParser;
pub use transport::{ByteStream, HttpTransport, MockTransport, StreamTransport};
pub use url::normalize_responses_url;
