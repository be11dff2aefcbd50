//! Event classification.
//!
//! [`route`] is pure: it splits a decoded event into the part that belongs to
//! the owning session's record and the part that only matters to the shared
//! foreground UI. The engine applies the first unconditionally and the second
//! only while the stream's session owns the foreground.

use hearth_types::{ClarificationOption, Delegation, RoutedAgent, StreamEvent, TraceEvent, TraceId};

/// Mutation of the owning session's message. Always applied.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentEffect {
    AppendContent(String),
    AppendThinking(String),
    TraceId(TraceId),
    Routed(RoutedAgent),
    Clarification(Vec<ClarificationOption>),
    ErrorSuffix(String),
}

/// Mutation of shared UI state. Dropped for background streams.
#[derive(Debug, Clone, PartialEq)]
pub enum SharedEffect {
    LastTraceId(TraceId),
    Activity(TraceEvent),
    /// `None` clears the status line.
    Status(Option<String>),
    Delegation(Delegation),
    RoutedDisplay {
        agent: String,
        confidence: Option<f64>,
    },
    TransientStatus(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventEffects {
    pub content: Option<ContentEffect>,
    pub shared: Option<SharedEffect>,
    pub finish: bool,
}

impl EventEffects {
    fn content(effect: ContentEffect) -> Self {
        Self {
            content: Some(effect),
            ..Self::default()
        }
    }

    fn shared(effect: SharedEffect) -> Self {
        Self {
            shared: Some(effect),
            ..Self::default()
        }
    }
}

#[must_use]
pub fn route(event: StreamEvent) -> EventEffects {
    match event {
        StreamEvent::ContentDelta(text) => EventEffects::content(ContentEffect::AppendContent(text)),
        StreamEvent::ThinkingDelta(text) => {
            EventEffects::content(ContentEffect::AppendThinking(text))
        }
        StreamEvent::Metadata {
            trace_id,
            conversation_id,
            tool_calls,
        } => {
            if conversation_id.is_some() || !tool_calls.is_empty() {
                tracing::debug!(?conversation_id, ?tool_calls, "Stream metadata");
            }
            match trace_id {
                Some(trace_id) => EventEffects {
                    content: Some(ContentEffect::TraceId(trace_id.clone())),
                    shared: Some(SharedEffect::LastTraceId(trace_id)),
                    finish: false,
                },
                None => EventEffects::default(),
            }
        }
        StreamEvent::Trace(trace) => EventEffects::shared(SharedEffect::Activity(trace)),
        StreamEvent::Status(text) => {
            let status = (!text.trim().is_empty()).then_some(text);
            EventEffects::shared(SharedEffect::Status(status))
        }
        StreamEvent::Delegation(delegation) => {
            EventEffects::shared(SharedEffect::Delegation(delegation))
        }
        StreamEvent::Routing {
            agent,
            confidence,
            reasoning,
        } => {
            if let Some(reasoning) = reasoning {
                tracing::debug!(%agent, %reasoning, "Routing decision");
            }
            EventEffects {
                content: Some(ContentEffect::Routed(RoutedAgent {
                    agent: agent.clone(),
                    confidence,
                })),
                shared: Some(SharedEffect::RoutedDisplay { agent, confidence }),
                finish: false,
            }
        }
        StreamEvent::ClarificationOptions(options) => {
            EventEffects::content(ContentEffect::Clarification(options))
        }
        StreamEvent::Error {
            message,
            recoverable: true,
        } => EventEffects::shared(SharedEffect::TransientStatus(message)),
        StreamEvent::Error {
            message,
            recoverable: false,
        } => EventEffects::content(ContentEffect::ErrorSuffix(message)),
        StreamEvent::Terminator => EventEffects {
            finish: true,
            ..EventEffects::default()
        },
    }
}
