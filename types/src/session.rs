//! Chat session record.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::ids::SessionId;
use crate::message::Message;

/// Title shown until the first user message (or an explicit rename) replaces it.
pub const DEFAULT_SESSION_TITLE: &str = "New chat";

const MAX_TITLE_CHARS: usize = 48;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: SessionId,
    pub title: String,
    pub messages: Vec<Message>,
    pub model: String,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl ChatSession {
    #[must_use]
    pub fn new(id: SessionId, model: impl Into<String>, now: SystemTime) -> Self {
        Self {
            id,
            title: DEFAULT_SESSION_TITLE.to_string(),
            messages: Vec::new(),
            model: model.into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_SESSION_TITLE
    }

    /// Index of the assistant message currently being streamed, if any.
    #[must_use]
    pub fn streaming_index(&self) -> Option<usize> {
        self.messages
            .iter()
            .rposition(|m| m.is_assistant() && m.is_streaming())
    }

    #[must_use]
    pub fn last_assistant_index(&self) -> Option<usize> {
        self.messages.iter().rposition(Message::is_assistant)
    }
}

/// Derive a session title from the first user message in `messages`.
///
/// Uses the first non-blank line, capped at 48 characters.
#[must_use]
pub fn derive_title(messages: &[Message]) -> Option<String> {
    let first = messages.iter().find(|m| m.is_user())?;
    let line = first
        .content()
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())?;

    if line.chars().count() <= MAX_TITLE_CHARS {
        return Some(line.to_string());
    }
    let mut title: String = line.chars().take(MAX_TITLE_CHARS).collect();
    title.truncate(title.trim_end().len());
    title.push('…');
    Some(title)
}
