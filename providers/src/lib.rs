//! Assistant chat transport and stream decoding.
//!
//! # Architecture
//!
//! - [`ChatTransport`] - the seam the engine talks to. It opens one chunked
//!   response per turn and hands back the raw bytes.
//! - [`decoder`] - turns those bytes into typed [`StreamEvent`]s
//!   ([`FrameDecoder`] for push-style use, [`EventStream`] as a lazy stream).
//! - [`http`] - the reqwest-backed transport for the assistant backend.
//!
//! # Wire format
//!
//! Newline-delimited frames. A frame is `data: <payload>`, where the payload is
//! either the `[DONE]` sentinel or a JSON object. Everything else is ignored.
//!
//! | Payload | Event |
//! |---------|-------|
//! | `{"error": {...}}` | fatal [`StreamError::Protocol`] |
//! | `{"type":"metadata", ...}` | `Metadata` |
//! | `{"type":"trace", ...}` | `Trace` |
//! | `{"type":"status", ...}` | `Status` |
//! | `{"type":"thinking", ...}` | `ThinkingDelta` |
//! | `{"type":"delegation", ...}` | `Delegation` |
//! | `{"type":"routing", ...}` | `Routing` |
//! | `{"type":"clarification_options", ...}` | `ClarificationOptions` |
//! | `{"type":"error", ...}` | `Error` (in-band, not fatal to decoding) |
//! | `{"choices":[{"delta":{"content"}}]}` / `{"content"}` | `ContentDelta` |
//!
//! # Error Handling
//!
//! Malformed or unrecognized frames are dropped so that newer servers keep
//! working with older clients. Only an explicit error marker, an oversized
//! frame, or a transport failure ends a stream with `Err`.

pub mod decoder;
pub mod frames;
pub mod http;

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use serde::Serialize;

pub use decoder::{EventStream, FrameDecoder, classify_payload};
pub use hearth_types;
pub use hearth_types::{Feedback, Message, Role, SessionId, StreamEvent, TraceId};
pub use http::HttpTransport;

/// Raw response body chunks as delivered by a transport.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, StreamError>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The backend reported a failure in-band.
    #[error("{0}")]
    Protocol(String),
    #[error("stream frame exceeded maximum size ({limit} bytes)")]
    FrameTooLarge { limit: usize },
    #[error("API error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("stream idle for {secs}s")]
    IdleTimeout { secs: u64 },
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// One turn of history as sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

impl WireMessage {
    #[must_use]
    pub fn from_message(message: &Message) -> Self {
        Self {
            role: message.role(),
            content: message.content().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub session_id: SessionId,
}

/// The backend as seen by the engine.
///
/// Implementations must not do any work before the returned future is polled;
/// the engine polls it from inside an abortable task.
pub trait ChatTransport: Send + Sync {
    fn stream_chat(&self, request: ChatRequest) -> BoxFuture<'static, Result<ByteStream, StreamError>>;

    fn submit_feedback(
        &self,
        trace_id: TraceId,
        feedback: Feedback,
    ) -> BoxFuture<'static, Result<(), StreamError>>;
}

/// Open a turn and decode it.
pub async fn stream_chat(
    transport: &dyn ChatTransport,
    request: ChatRequest,
) -> Result<EventStream, StreamError> {
    let bytes = transport.stream_chat(request).await?;
    Ok(EventStream::new(bytes))
}
