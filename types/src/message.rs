//! Core message domain model.
//!
//! A `Message` is either a user turn or an assistant turn. Assistant turns start
//! out streaming (content may be rewritten in place) and are sealed once the
//! stream ends. After sealing only feedback and trace-id backfill are accepted.
//! Constructors take `SystemTime` explicitly; callers own the clock.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::TraceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// User sentiment on an assistant answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Positive,
    Negative,
}

impl Feedback {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Feedback::Positive => "positive",
            Feedback::Negative => "negative",
        }
    }
}

/// Agent selected by the backend router for this turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedAgent {
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// A selectable follow-up offered by the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationOption {
    pub label: String,
    /// Text submitted when the option is picked. Defaults to the label.
    pub value: String,
}

impl ClarificationOption {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            value: label.clone(),
            label,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("message is no longer streaming; content is immutable")]
    Sealed,
    #[error("feedback was already recorded for this message")]
    FeedbackAlreadySet,
    #[error("feedback applies to assistant messages only")]
    NotAssistant,
    #[error("message already carries trace id {0}")]
    TraceAlreadySet(TraceId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    role: Role,
    content: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    streaming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<SystemTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trace_id: Option<TraceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    feedback: Option<Feedback>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    routed_agent: Option<RoutedAgent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    clarification: Option<Vec<ClarificationOption>>,
}

impl Message {
    #[must_use]
    pub fn user(content: impl Into<String>, timestamp: SystemTime) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            streaming: false,
            timestamp: Some(timestamp),
            trace_id: None,
            thinking: None,
            feedback: None,
            routed_agent: None,
            clarification: None,
        }
    }

    /// Empty assistant message awaiting its first flush.
    ///
    /// The timestamp is left unset on purpose: it is stamped when the first
    /// content actually arrives.
    #[must_use]
    pub fn assistant_placeholder() -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            streaming: true,
            timestamp: None,
            trace_id: None,
            thinking: None,
            feedback: None,
            routed_agent: None,
            clarification: None,
        }
    }

    /// A complete, sealed assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>, timestamp: SystemTime) -> Self {
        Self {
            streaming: false,
            content: content.into(),
            timestamp: Some(timestamp),
            ..Self::assistant_placeholder()
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    #[must_use]
    pub fn timestamp(&self) -> Option<SystemTime> {
        self.timestamp
    }

    #[must_use]
    pub fn trace_id(&self) -> Option<&TraceId> {
        self.trace_id.as_ref()
    }

    #[must_use]
    pub fn thinking(&self) -> Option<&str> {
        self.thinking.as_deref()
    }

    #[must_use]
    pub fn feedback(&self) -> Option<Feedback> {
        self.feedback
    }

    #[must_use]
    pub fn routed_agent(&self) -> Option<&RoutedAgent> {
        self.routed_agent.as_ref()
    }

    #[must_use]
    pub fn clarification(&self) -> Option<&[ClarificationOption]> {
        self.clarification.as_deref()
    }

    #[must_use]
    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    #[must_use]
    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    /// Replace the streamed content and thinking text.
    pub fn rewrite_stream(
        &mut self,
        content: &str,
        thinking: &str,
    ) -> Result<(), MessageError> {
        if !self.streaming {
            return Err(MessageError::Sealed);
        }
        content.clone_into(&mut self.content);
        self.thinking = (!thinking.is_empty()).then(|| thinking.to_string());
        Ok(())
    }

    pub fn set_routed_agent(&mut self, routed: RoutedAgent) -> Result<(), MessageError> {
        if !self.streaming {
            return Err(MessageError::Sealed);
        }
        self.routed_agent = Some(routed);
        Ok(())
    }

    pub fn set_clarification(
        &mut self,
        options: Vec<ClarificationOption>,
    ) -> Result<(), MessageError> {
        if !self.streaming {
            return Err(MessageError::Sealed);
        }
        self.clarification = Some(options);
        Ok(())
    }

    /// Stamp the message time once. Later calls keep the first value.
    pub fn stamp_if_unset(&mut self, now: SystemTime) {
        if self.timestamp.is_none() {
            self.timestamp = Some(now);
        }
    }

    /// Record a trace id. Streaming messages accept replacements; sealed ones only backfill.
    pub fn backfill_trace_id(&mut self, trace_id: TraceId) -> Result<(), MessageError> {
        match &self.trace_id {
            Some(existing) if !self.streaming && *existing != trace_id => {
                Err(MessageError::TraceAlreadySet(existing.clone()))
            }
            _ => {
                self.trace_id = Some(trace_id);
                Ok(())
            }
        }
    }

    pub fn set_feedback(&mut self, feedback: Feedback) -> Result<(), MessageError> {
        if self.role != Role::Assistant {
            return Err(MessageError::NotAssistant);
        }
        if self.feedback.is_some() {
            return Err(MessageError::FeedbackAlreadySet);
        }
        self.feedback = Some(feedback);
        Ok(())
    }

    /// End streaming. Idempotent.
    pub fn seal(&mut self) {
        self.streaming = false;
    }
}
