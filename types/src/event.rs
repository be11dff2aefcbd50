//! Decoded stream events.
//!
//! These are the typed output of the frame decoder. They are never persisted.

use crate::ids::TraceId;
use crate::message::ClarificationOption;

/// Agent activity notification used to drive the live activity graph.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TraceEvent {
    pub agent: Option<String>,
    /// Activity kind, e.g. `agent_start`, `tool_call`, `agent_end`, `complete`.
    pub event: String,
    pub tool: Option<String>,
    pub ts: Option<String>,
    pub agents: Vec<String>,
}

/// Message passed from one agent to another.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Delegation {
    pub from: String,
    pub to: String,
    pub content: String,
    pub ts: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Plain answer text fragment.
    ContentDelta(String),
    Metadata {
        trace_id: Option<TraceId>,
        conversation_id: Option<String>,
        tool_calls: Vec<String>,
    },
    Trace(TraceEvent),
    /// Ephemeral progress text. Empty clears the status line.
    Status(String),
    /// Model reasoning fragment.
    ThinkingDelta(String),
    Delegation(Delegation),
    Routing {
        agent: String,
        confidence: Option<f64>,
        reasoning: Option<String>,
    },
    ClarificationOptions(Vec<ClarificationOption>),
    /// Application-level error reported in-band by the backend.
    Error { message: String, recoverable: bool },
    /// Explicit end-of-stream sentinel.
    Terminator,
}

impl StreamEvent {
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(self, StreamEvent::Terminator)
    }

    /// Short name for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::ContentDelta(_) => "content-delta",
            StreamEvent::Metadata { .. } => "metadata",
            StreamEvent::Trace(_) => "trace",
            StreamEvent::Status(_) => "status",
            StreamEvent::ThinkingDelta(_) => "thinking-delta",
            StreamEvent::Delegation(_) => "delegation",
            StreamEvent::Routing { .. } => "routing",
            StreamEvent::ClarificationOptions(_) => "clarification-options",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Terminator => "terminator",
        }
    }
}
