//! SSE delivery loop.
//!
//! The stream starts with an `endpoint` event, replays retained messages
//! after `Last-Event-ID`, then drains the session queue. It waits on the
//! queue's notifier with the poll interval as an upper bound, so a closed
//! session is noticed even without a wakeup. Heartbeats come from axum's
//! [`KeepAlive`].
//!
//! Opening a stream replaces any stream already attached to the session.
//! The older one ends without a `client_disconnected` event.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use futures::{stream, Stream};
use tokio::sync::Notify;
use tracing::{debug, info};

use super::queue::{MessageQueue, QueuedMessage, StreamPoll};
use super::{McpTransport, TransportError};
use crate::mcp::dispatcher::{DisconnectReason, McpDispatcher};
use crate::server::metrics;

type BoxedEvents = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

pub type EventStream = Sse<KeepAliveStream<BoxedEvents>>;

impl McpTransport {
    /// Opens the SSE stream for a session.
    pub async fn open_stream(
        &self,
        session_id: Option<String>,
        last_event_id: Option<u64>,
    ) -> Result<EventStream, TransportError> {
        let session_id = session_id.ok_or(TransportError::MissingSession)?;
        self.resolve_session(&session_id, TransportError::StreamNotFound)
            .await?;
        let (generation, notify) = self
            .queue
            .attach_stream(&session_id)
            .ok_or_else(|| TransportError::StreamNotFound(session_id.clone()))?;

        let mut buffer = VecDeque::new();
        buffer.push_back(
            Event::default()
                .event("endpoint")
                .data(format!("{}?sessionId={}", self.config.message_endpoint, session_id)),
        );
        if let Some(last_event_id) = last_event_id {
            let replayed = self
                .queue
                .replay_after(&session_id, last_event_id)
                .unwrap_or_default();
            debug!(
                "Resuming session {} after event {}, replaying {} messages",
                session_id,
                last_event_id,
                replayed.len()
            );
            buffer.extend(replayed.iter().map(message_event));
        }

        info!("SSE stream opened for session {}", session_id);
        metrics::stream_opened();

        let state = StreamState {
            queue: self.queue.clone(),
            generation,
            notify,
            buffer,
            poll_interval: self.config.sse_poll_interval,
            guard: DisconnectGuard {
                session_id,
                dispatcher: self.dispatcher.clone(),
                armed: true,
            },
        };

        let events: BoxedEvents = Box::pin(stream::unfold(state, |mut state| async move {
            let event = state.next_event().await?;
            Some((Ok(event), state))
        }));

        Ok(Sse::new(events)
            .keep_alive(KeepAlive::new().interval(self.config.keep_alive_interval)))
    }
}

fn message_event(message: &QueuedMessage) -> Event {
    Event::default()
        .event("message")
        .id(message.seq.to_string())
        .data(&message.payload)
}

struct StreamState {
    queue: Arc<MessageQueue>,
    generation: u64,
    notify: Arc<Notify>,
    buffer: VecDeque<Event>,
    poll_interval: Duration,
    guard: DisconnectGuard,
}

impl StreamState {
    /// Next event to emit, or `None` once the session is gone.
    async fn next_event(&mut self) -> Option<Event> {
        loop {
            if let Some(event) = self.buffer.pop_front() {
                return Some(event);
            }

            let messages = match self.queue.poll_stream(&self.guard.session_id, self.generation) {
                StreamPoll::Messages(messages) => messages,
                StreamPoll::Superseded => {
                    debug!(
                        "Newer SSE stream attached to session {}, ending this one",
                        self.guard.session_id
                    );
                    self.guard.armed = false;
                    return None;
                }
                StreamPoll::Closed => {
                    debug!("Session {} closed, ending SSE stream", self.guard.session_id);
                    self.guard.armed = false;
                    return None;
                }
            };

            if messages.is_empty() {
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            } else {
                metrics::record_messages_delivered(messages.len());
                self.buffer.extend(messages.iter().map(message_event));
            }
        }
    }
}

/// Reports a dropped SSE connection to the dispatcher.
///
/// Disarmed when the stream ends because the session itself was closed;
/// that path reports its own reason.
struct DisconnectGuard {
    session_id: String,
    dispatcher: Arc<dyn McpDispatcher>,
    armed: bool,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        metrics::stream_closed();
        if !self.armed {
            return;
        }
        info!("SSE stream closed by client for session {}", self.session_id);
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let dispatcher = self.dispatcher.clone();
        let session_id = std::mem::take(&mut self.session_id);
        handle.spawn(async move {
            dispatcher
                .client_disconnected(&session_id, DisconnectReason::StreamClosed)
                .await;
        });
    }
}
