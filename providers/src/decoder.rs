//! Newline-delimited `data:` frame decoding.
//!
//! [`FrameDecoder`] is the push-based core: feed it byte chunks, get back
//! decoded events. It retains the trailing partial line between chunks, so the
//! produced sequence does not depend on where the transport split the bytes.
//! [`EventStream`] adapts a byte stream into a lazy stream of events.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::{Stream, StreamExt};
use hearth_types::StreamEvent;
use serde_json::Value;

use crate::frames::{ContentFrame, TypedFrame, error_marker};
use crate::{ByteStream, StreamError};

/// Prefix that marks a line as a stream frame.
pub const DATA_PREFIX: &str = "data: ";
/// Payload that ends the stream.
pub const DONE_SENTINEL: &str = "[DONE]";
/// Upper bound for a single unterminated line.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

pub type DecodeResult = Result<StreamEvent, StreamError>;

/// Classify one frame payload (the text after [`DATA_PREFIX`]).
///
/// Returns `Ok(None)` for frames that carry nothing this client understands.
/// An explicit `{"error": ...}` marker is fatal and comes back as `Err`.
pub fn classify_payload(payload: &str) -> Result<Option<StreamEvent>, StreamError> {
    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        return Ok(Some(StreamEvent::Terminator));
    }

    let json: Value = match serde_json::from_str(payload) {
        Ok(json) => json,
        Err(e) => {
            tracing::debug!(%e, payload_bytes = payload.len(), "Dropping malformed stream frame");
            return Ok(None);
        }
    };
    if !json.is_object() {
        tracing::debug!("Dropping non-object stream frame");
        return Ok(None);
    }

    if let Some(message) = error_marker(&json) {
        return Err(StreamError::Protocol(message));
    }

    if let Some(kind) = json.get("type").and_then(Value::as_str) {
        let kind = kind.to_string();
        return match serde_json::from_value::<TypedFrame>(json) {
            Ok(frame) => {
                let event = frame.into_event();
                if event.is_none() {
                    tracing::debug!(kind = %kind, "Ignoring unknown stream frame type");
                }
                Ok(event)
            }
            Err(e) => {
                tracing::warn!(%e, kind = %kind, "Failed to parse stream frame");
                Ok(None)
            }
        };
    }

    match serde_json::from_value::<ContentFrame>(json) {
        Ok(frame) => Ok(frame
            .into_text()
            .filter(|text| !text.is_empty())
            .map(StreamEvent::ContentDelta)),
        Err(e) => {
            tracing::warn!(%e, "Failed to parse content frame");
            Ok(None)
        }
    }
}

enum LineOutcome {
    Skip,
    Event(StreamEvent),
    Done,
    Fatal(StreamError),
}

fn decode_line(line: &[u8]) -> LineOutcome {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let Some(payload) = line.strip_prefix(DATA_PREFIX.as_bytes()) else {
        return LineOutcome::Skip;
    };
    let Ok(payload) = std::str::from_utf8(payload) else {
        tracing::warn!(payload_bytes = payload.len(), "Dropping non-UTF-8 stream frame");
        return LineOutcome::Skip;
    };

    match classify_payload(payload) {
        Ok(Some(StreamEvent::Terminator)) => LineOutcome::Done,
        Ok(Some(event)) => LineOutcome::Event(event),
        Ok(None) => LineOutcome::Skip,
        Err(e) => LineOutcome::Fatal(e),
    }
}

/// Stateful line reassembler and frame classifier.
///
/// Once a terminator or a fatal error has been produced the decoder is
/// finished and ignores further input.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Bytes held back waiting for a newline.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Append a chunk and decode every complete line in the buffer.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<DecodeResult> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        self.buffer.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let outcome = decode_line(&self.buffer[start..end]);
            start = end + 1;
            if self.apply(outcome, &mut out) {
                self.buffer.clear();
                return out;
            }
        }
        self.buffer.drain(..start);

        if self.buffer.len() > MAX_FRAME_BYTES {
            self.finished = true;
            self.buffer.clear();
            out.push(Err(StreamError::FrameTooLarge {
                limit: MAX_FRAME_BYTES,
            }));
        }
        out
    }

    /// Signal end of input. An unterminated final line is decoded as a frame.
    pub fn finish(&mut self) -> Vec<DecodeResult> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        let rest = std::mem::take(&mut self.buffer);
        if !rest.is_empty() {
            let outcome = decode_line(&rest);
            self.apply(outcome, &mut out);
        }
        self.finished = true;
        out
    }

    /// Returns true when the outcome ends decoding.
    fn apply(&mut self, outcome: LineOutcome, out: &mut Vec<DecodeResult>) -> bool {
        match outcome {
            LineOutcome::Skip => false,
            LineOutcome::Event(event) => {
                out.push(Ok(event));
                false
            }
            LineOutcome::Done => {
                out.push(Ok(StreamEvent::Terminator));
                self.finished = true;
                true
            }
            LineOutcome::Fatal(e) => {
                out.push(Err(e));
                self.finished = true;
                true
            }
        }
    }
}

/// Lazy event sequence over a transport byte stream.
///
/// Ends after a terminator, a fatal error, or the natural end of the bytes.
/// Dropping it drops the underlying transport stream.
pub struct EventStream {
    inner: ByteStream,
    decoder: FrameDecoder,
    queue: VecDeque<DecodeResult>,
    done: bool,
}

impl EventStream {
    pub fn new<S>(inner: S) -> Self
    where
        S: Stream<Item = Result<Vec<u8>, StreamError>> + Send + 'static,
    {
        Self {
            inner: inner.boxed(),
            decoder: FrameDecoder::new(),
            queue: VecDeque::new(),
            done: false,
        }
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("decoder", &self.decoder)
            .field("queued", &self.queue.len())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl Stream for EventStream {
    type Item = DecodeResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if let Some(item) = this.queue.pop_front() {
                return Poll::Ready(Some(item));
            }
            if this.done || this.decoder.is_finished() {
                this.done = true;
                return Poll::Ready(None);
            }

            match this.inner.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(chunk))) => {
                    let decoded = this.decoder.push(&chunk);
                    this.queue.extend(decoded);
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    let decoded = this.decoder.finish();
                    this.queue.extend(decoded);
                    this.done = true;
                }
            }
        }
    }
}
