//! Incremental terminal output of the foreground conversation.

use std::io::{self, Write};

use chrono::{DateTime, Local};

use hearth_engine::{ChatEngine, ChatSession, Message, SessionId};

/// Prints the assistant message being followed as it grows, plus status changes.
#[derive(Debug, Default)]
pub struct Transcript {
    following: Option<(SessionId, usize)>,
    printed: usize,
    status: Option<String>,
}

impl Transcript {
    /// Start echoing message `index` of session `id`.
    pub fn follow(&mut self, id: SessionId, index: usize) {
        self.following = Some((id, index));
        self.printed = 0;
    }

    pub fn unfollow(&mut self) {
        self.following = None;
        self.printed = 0;
    }

    /// Print whatever changed since the last call.
    pub fn render(&mut self, engine: &ChatEngine, out: &mut impl Write) -> io::Result<()> {
        if engine.status() != self.status.as_deref() {
            self.status = engine.status().map(str::to_string);
            if let Some(status) = &self.status {
                writeln!(out, "\n[{status}]")?;
            }
        }

        let Some((id, index)) = &self.following else {
            return Ok(());
        };
        if engine.active_id() != Some(id) {
            return Ok(());
        }
        let Some(message) = engine.session(id).and_then(|s| s.messages.get(*index)) else {
            self.unfollow();
            return Ok(());
        };

        let content = message.content();
        match content.get(self.printed..) {
            Some(rest) => write!(out, "{rest}")?,
            None => write!(out, "\n{content}")?,
        }
        self.printed = content.len();

        if !message.is_streaming() {
            writeln!(out)?;
            write_footer(message, out)?;
            self.unfollow();
        }
        out.flush()
    }
}

fn write_footer(message: &Message, out: &mut impl Write) -> io::Result<()> {
    if let Some(routed) = message.routed_agent() {
        match routed.confidence {
            Some(confidence) => writeln!(out, "  (via {} {:.0}%)", routed.agent, confidence * 100.0)?,
            None => writeln!(out, "  (via {})", routed.agent)?,
        }
    }
    if let Some(options) = message.clarification() {
        for (n, option) in options.iter().enumerate() {
            writeln!(out, "  {}) {}", n + 1, option.label)?;
        }
    }
    Ok(())
}

/// Print a whole session, e.g. after switching to it.
pub fn write_session(session: &ChatSession, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "== {} ==", session.title)?;
    for message in &session.messages {
        let who = if message.is_user() { "you" } else { "hearth" };
        let tail = if message.is_streaming() { " ..." } else { "" };
        writeln!(out, "{who}> {}{tail}", message.content())?;
        if !message.is_user() && !message.is_streaming() {
            write_footer(message, out)?;
        }
    }
    out.flush()
}

/// Print the session list, marking the active and streaming ones.
pub fn write_list(engine: &ChatEngine, out: &mut impl Write) -> io::Result<()> {
    if engine.sessions().is_empty() {
        writeln!(out, "no conversations yet")?;
    }
    for (n, session) in engine.sessions().iter().enumerate() {
        let marker = if engine.active_id() == Some(&session.id) { '*' } else { ' ' };
        let streaming = if engine.is_streaming(&session.id) { " (streaming)" } else { "" };
        let updated = DateTime::<Local>::from(session.updated_at).format("%b %d %H:%M");
        writeln!(out, "{marker} {}. {} [{updated}]{streaming}", n + 1, session.title)?;
    }
    out.flush()
}
