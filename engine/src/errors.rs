//! Engine error types and the user-visible notices written into messages.

use hearth_providers::StreamError;
use hearth_types::{MessageError, SessionId};
use thiserror::Error;

/// Content of a stream that completed without producing any text.
pub const EMPTY_RESPONSE_NOTICE: &str = "[Empty response - the assistant returned no content]";

/// Content of an empty assistant message whose stream never finished.
pub const INTERRUPTED_NOTICE: &str = "[Interrupted - response incomplete]";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("session {0} is already streaming a response")]
    AlreadyStreaming(SessionId),
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    #[error("session {0} has no user message to retry")]
    NothingToRetry(SessionId),
    #[error("no async runtime available to drive the stream")]
    NoRuntime,
    #[error("engine has been torn down")]
    ShutDown,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedbackError {
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    #[error("no message at index {index}")]
    NoSuchMessage { index: usize },
    #[error("message at index {index} is still streaming")]
    StillStreaming { index: usize },
    #[error(transparent)]
    Message(#[from] MessageError),
}

/// Suffix appended to streamed content when the backend reports an unrecoverable error.
#[must_use]
pub fn inline_error_suffix(message: &str) -> String {
    format!("\n\n**Error:** {message}")
}

/// Merge a transport failure into whatever content was received before it.
#[must_use]
pub fn salvage_after_failure(partial: &str, error: &StreamError) -> String {
    if partial.is_empty() {
        format!("**Error:** {error}")
    } else {
        format!("{partial}{}", inline_error_suffix(&error.to_string()))
    }
}
