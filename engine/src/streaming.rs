//! Background decode tasks.
//!
//! Each send spawns one task that opens the transport, decodes frames and
//! forwards them over its own unbounded channel. The task is wrapped in an
//! [`Abortable`]; when it is aborted it reports [`StreamMessage::Cancelled`]
//! instead of a result. The task never touches engine state.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{AbortHandle, Abortable};
use futures_util::stream::{self, StreamExt};
use hearth_providers::{ByteStream, ChatRequest, ChatTransport, EventStream, StreamError};
use hearth_types::StreamEvent;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::flush::FlushBuffer;

/// Upper bound on events drained from one stream per `pump` call, so a chatty
/// stream cannot starve the others or the frame tick.
pub(crate) const STREAM_EVENT_BUDGET: usize = 512;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Event(StreamEvent),
    /// The byte stream ended without a terminator.
    Finished,
    Failed(StreamError),
    Cancelled,
}

/// How a stream ended, as seen by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    /// Terminator or natural end of data.
    Completed,
    /// Explicit stop.
    Cancelled,
    /// Torn down before it could finish.
    Interrupted,
    Failed(StreamError),
}

#[derive(Debug)]
pub(crate) struct ActiveStream {
    pub(crate) rx: mpsc::UnboundedReceiver<StreamMessage>,
    pub(crate) buffer: FlushBuffer,
    pub(crate) abort: AbortHandle,
}

/// Spawn the decode task for `request` on `runtime`.
pub(crate) fn spawn_decode(
    runtime: &Handle,
    transport: Arc<dyn ChatTransport>,
    request: ChatRequest,
    idle_timeout: Duration,
) -> ActiveStream {
    let (tx, rx) = mpsc::unbounded_channel();
    let (abort, registration) = AbortHandle::new_pair();
    let session = request.session_id.clone();

    let task = decode(transport, request, idle_timeout, tx.clone());
    runtime.spawn(async move {
        if Abortable::new(task, registration).await.is_err() {
            tracing::debug!(session = %session, "Stream aborted");
            let _ = tx.send(StreamMessage::Cancelled);
        }
    });

    ActiveStream {
        rx,
        buffer: FlushBuffer::new(),
        abort,
    }
}

async fn decode(
    transport: Arc<dyn ChatTransport>,
    request: ChatRequest,
    idle_timeout: Duration,
    tx: mpsc::UnboundedSender<StreamMessage>,
) {
    let idle = StreamError::IdleTimeout {
        secs: idle_timeout.as_secs(),
    };

    let bytes = match tokio::time::timeout(idle_timeout, transport.stream_chat(request)).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            tracing::warn!("Chat request failed: {e}");
            let _ = tx.send(StreamMessage::Failed(e));
            return;
        }
        Err(_) => {
            let _ = tx.send(StreamMessage::Failed(idle));
            return;
        }
    };

    let mut events = EventStream::new(with_idle_timeout(bytes, idle_timeout));
    while let Some(item) = events.next().await {
        match item {
            Ok(event) => {
                let last = event.is_terminator();
                if tx.send(StreamMessage::Event(event)).is_err() || last {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!("Stream ended with error: {e}");
                let _ = tx.send(StreamMessage::Failed(e));
                return;
            }
        }
    }
    let _ = tx.send(StreamMessage::Finished);
}

/// Fail the stream if no chunk arrives within `limit`.
fn with_idle_timeout(bytes: ByteStream, limit: Duration) -> ByteStream {
    stream::unfold(Some(bytes), move |inner| async move {
        let mut inner = inner?;
        match tokio::time::timeout(limit, inner.next()).await {
            Ok(Some(chunk)) => Some((chunk, Some(inner))),
            Ok(None) => None,
            Err(_) => Some((
                Err(StreamError::IdleTimeout {
                    secs: limit.as_secs(),
                }),
                None,
            )),
        }
    })
    .boxed()
}
