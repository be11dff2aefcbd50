//! Per-stream accumulation and frame-coalesced commits.
//!
//! Deltas land in a [`FlushBuffer`] as they are decoded. The buffer is written
//! into the session's message list at most once per frame, and each commit
//! carries the full accumulated text rather than the deltas since the last one.

use std::time::SystemTime;

use hearth_types::{ClarificationOption, Message, RoutedAgent, TraceId};

use crate::errors::{
    EMPTY_RESPONSE_NOTICE, INTERRUPTED_NOTICE, inline_error_suffix, salvage_after_failure,
};
use crate::routing::ContentEffect;
use crate::streaming::StreamOutcome;

#[derive(Debug, Default)]
pub struct FlushBuffer {
    content: String,
    thinking: String,
    trace_id: Option<TraceId>,
    routed: Option<RoutedAgent>,
    clarification: Option<Vec<ClarificationOption>>,
    pending: bool,
}

impl FlushBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn thinking(&self) -> &str {
        &self.thinking
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Fold one content effect into the accumulators.
    ///
    /// Returns `true` if this call scheduled a flush, `false` if one was
    /// already pending.
    pub fn apply(&mut self, effect: ContentEffect) -> bool {
        match effect {
            ContentEffect::AppendContent(text) => self.content.push_str(&text),
            ContentEffect::AppendThinking(text) => self.thinking.push_str(&text),
            ContentEffect::TraceId(trace_id) => self.trace_id = Some(trace_id),
            ContentEffect::Routed(routed) => self.routed = Some(routed),
            ContentEffect::Clarification(options) => self.clarification = Some(options),
            ContentEffect::ErrorSuffix(message) => {
                self.content.push_str(&inline_error_suffix(&message));
            }
        }
        self.schedule()
    }

    fn schedule(&mut self) -> bool {
        !std::mem::replace(&mut self.pending, true)
    }

    /// Clear the pending flag, returning whether a flush was due.
    pub fn take_pending(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }

    /// Rewrite the accumulated content for how the stream ended.
    pub fn finalize(&mut self, outcome: &StreamOutcome) {
        let nothing_received = self.content.is_empty() && self.thinking.is_empty();
        match outcome {
            StreamOutcome::Completed if nothing_received => {
                EMPTY_RESPONSE_NOTICE.clone_into(&mut self.content);
            }
            StreamOutcome::Interrupted if nothing_received => {
                INTERRUPTED_NOTICE.clone_into(&mut self.content);
            }
            StreamOutcome::Failed(error) => {
                self.content = salvage_after_failure(&self.content, error);
            }
            StreamOutcome::Completed | StreamOutcome::Interrupted | StreamOutcome::Cancelled => {}
        }
        self.pending = false;
    }

    /// Write the buffer into the streaming assistant message of `messages`.
    ///
    /// Used as a `update_messages` updater. The message timestamp is fixed by
    /// the first commit that reaches it. With `seal`, the message stops
    /// streaming and becomes immutable.
    #[must_use]
    pub fn commit(&self, mut messages: Vec<Message>, now: SystemTime, seal: bool) -> Vec<Message> {
        let Some(target) = messages
            .iter_mut()
            .rev()
            .find(|m| m.is_assistant() && m.is_streaming())
        else {
            tracing::warn!("No streaming assistant message to commit into");
            return messages;
        };

        if let Err(e) = target.rewrite_stream(&self.content, &self.thinking) {
            tracing::warn!("Stream commit rejected: {e}");
            return messages;
        }
        if let Some(trace_id) = &self.trace_id
            && let Err(e) = target.backfill_trace_id(trace_id.clone())
        {
            tracing::debug!("Trace id not recorded: {e}");
        }
        if let Some(routed) = &self.routed
            && let Err(e) = target.set_routed_agent(routed.clone())
        {
            tracing::debug!("Routed agent not recorded: {e}");
        }
        if let Some(options) = &self.clarification
            && let Err(e) = target.set_clarification(options.clone())
        {
            tracing::debug!("Clarification options not recorded: {e}");
        }
        target.stamp_if_unset(now);
        if seal {
            target.seal();
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use hearth_providers::StreamError;
    use hearth_types::{ClarificationOption, Message, RoutedAgent, TraceId};

    use super::FlushBuffer;
    use crate::errors::{EMPTY_RESPONSE_NOTICE, INTERRUPTED_NOTICE};
    use crate::routing::ContentEffect;
    use crate::streaming::StreamOutcome;

    fn placeholder_history() -> Vec<Message> {
        vec![
            Message::user("Turn on the lights", UNIX_EPOCH),
            Message::assistant_placeholder(),
        ]
    }

    #[test]
    fn only_first_mutation_schedules() {
        let mut buffer = FlushBuffer::new();
        assert!(buffer.apply(ContentEffect::AppendContent("Sure, ".into())));
        assert!(!buffer.apply(ContentEffect::AppendContent("turning".into())));
        assert!(!buffer.apply(ContentEffect::AppendThinking("hmm".into())));
        assert!(buffer.take_pending());
        assert!(!buffer.take_pending());
        assert!(buffer.apply(ContentEffect::AppendContent(" them on.".into())));
        assert_eq!(buffer.content(), "Sure, turning them on.");
    }

    #[test]
    fn commit_reflects_latest_state_and_stamps_once() {
        let mut buffer = FlushBuffer::new();
        buffer.apply(ContentEffect::AppendContent("a".into()));
        let first = UNIX_EPOCH + Duration::from_secs(5);
        let messages = buffer.commit(placeholder_history(), first, false);

        buffer.apply(ContentEffect::AppendContent("b".into()));
        buffer.apply(ContentEffect::TraceId(TraceId::from("t1")));
        let later = UNIX_EPOCH + Duration::from_secs(9);
        let messages = buffer.commit(messages, later, false);

        let msg = &messages[1];
        assert_eq!(msg.content(), "ab");
        assert!(msg.is_streaming());
        assert_eq!(msg.timestamp(), Some(first));
        assert_eq!(msg.trace_id().map(TraceId::as_str), Some("t1"));
    }

    #[test]
    fn sealing_commit_carries_side_channels() {
        let mut buffer = FlushBuffer::new();
        buffer.apply(ContentEffect::AppendThinking("which room?".into()));
        buffer.apply(ContentEffect::Routed(RoutedAgent {
            agent: "lighting".into(),
            confidence: Some(0.9),
        }));
        let messages = buffer.commit(placeholder_history(), UNIX_EPOCH, true);

        let msg = &messages[1];
        assert!(!msg.is_streaming());
        assert_eq!(msg.thinking(), Some("which room?"));
        assert_eq!(msg.routed_agent().map(|r| r.agent.as_str()), Some("lighting"));
        assert_eq!(msg.timestamp(), Some(UNIX_EPOCH));
    }

    #[test]
    fn side_channels_are_rewritten_on_each_commit() {
        let mut buffer = FlushBuffer::new();
        buffer.apply(ContentEffect::Routed(RoutedAgent {
            agent: "climate".into(),
            confidence: None,
        }));
        let messages = buffer.commit(placeholder_history(), UNIX_EPOCH, false);

        buffer.apply(ContentEffect::Clarification(vec![
            ClarificationOption::new("Upstairs"),
            ClarificationOption::new("Downstairs"),
        ]));
        let messages = buffer.commit(messages, UNIX_EPOCH, true);

        let msg = &messages[1];
        assert_eq!(msg.routed_agent().map(|r| r.agent.as_str()), Some("climate"));
        assert_eq!(msg.clarification().map(<[_]>::len), Some(2));

        // Committing again into a sealed history leaves it untouched.
        assert_eq!(buffer.commit(messages.clone(), UNIX_EPOCH, true), messages);
    }

    #[test]
    fn commit_without_placeholder_is_noop() {
        let buffer = FlushBuffer::new();
        let history = vec![Message::assistant("done", UNIX_EPOCH)];
        assert_eq!(buffer.commit(history.clone(), UNIX_EPOCH, true), history);
    }

    #[test]
    fn finalize_notices() {
        let mut empty = FlushBuffer::new();
        empty.finalize(&StreamOutcome::Completed);
        assert_eq!(empty.content(), EMPTY_RESPONSE_NOTICE);

        let mut interrupted = FlushBuffer::new();
        interrupted.finalize(&StreamOutcome::Interrupted);
        assert_eq!(interrupted.content(), INTERRUPTED_NOTICE);

        let mut cancelled = FlushBuffer::new();
        cancelled.apply(ContentEffect::AppendContent("partial".into()));
        cancelled.finalize(&StreamOutcome::Cancelled);
        assert_eq!(cancelled.content(), "partial");
        assert!(!cancelled.is_pending());

        let mut thinking_only = FlushBuffer::new();
        thinking_only.apply(ContentEffect::AppendThinking("...".into()));
        thinking_only.finalize(&StreamOutcome::Completed);
        assert_eq!(thinking_only.content(), "");
    }

    #[test]
    fn finalize_failure_salvages_partial() {
        let mut buffer = FlushBuffer::new();
        buffer.apply(ContentEffect::AppendContent("Lights are".into()));
        buffer.finalize(&StreamOutcome::Failed(StreamError::Protocol("overloaded".into())));
        assert_eq!(buffer.content(), "Lights are\n\n**Error:** overloaded");
    }

    #[test]
    fn error_suffix_keeps_accumulating() {
        let mut buffer = FlushBuffer::new();
        buffer.apply(ContentEffect::AppendContent("Done".into()));
        buffer.apply(ContentEffect::ErrorSuffix("boom".into()));
        buffer.apply(ContentEffect::AppendContent("!".into()));
        assert_eq!(buffer.content(), "Done\n\n**Error:** boom!");
    }
}
