//! Per-session outbound message queue.
//!
//! Each session owns a bounded `pending` queue of messages not yet written
//! to an SSE stream and a bounded `delivered` ring kept for `Last-Event-ID`
//! resume. Sequence numbers are per session and start at 1.
//!
//! A session has at most one live SSE stream. Attaching a stream bumps the
//! session's stream generation and the older stream ends on its next poll,
//! so messages are never split between two connections.
//!
//! State is process-local: the process serving a session's SSE stream must
//! be the one that holds its queue.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::warn;

use crate::server::metrics;

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub seq: u64,
    pub payload: String,
    pub enqueued_at: DateTime<Utc>,
}

/// What a stream finds when it polls its session.
#[derive(Debug, PartialEq)]
pub enum StreamPoll {
    Messages(Vec<QueuedMessage>),
    /// A newer stream was attached to the session.
    Superseded,
    Closed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Unknown session: {0}")]
    UnknownSession(String),
}

struct SessionQueue {
    next_seq: u64,
    pending: VecDeque<QueuedMessage>,
    delivered: VecDeque<QueuedMessage>,
    notify: Arc<Notify>,
    stream_generation: u64,
}

impl SessionQueue {
    fn new() -> Self {
        Self {
            next_seq: 1,
            pending: VecDeque::new(),
            delivered: VecDeque::new(),
            notify: Arc::new(Notify::new()),
            stream_generation: 0,
        }
    }

    fn drain_pending(&mut self, replay_buffer_size: usize) -> Vec<QueuedMessage> {
        let drained: Vec<QueuedMessage> = self.pending.drain(..).collect();
        if replay_buffer_size > 0 {
            self.delivered.extend(drained.iter().cloned());
            while self.delivered.len() > replay_buffer_size {
                self.delivered.pop_front();
            }
        }
        drained
    }
}

pub struct MessageQueue {
    sessions: Mutex<HashMap<String, SessionQueue>>,
    max_pending: usize,
    replay_buffer_size: usize,
}

impl MessageQueue {
    pub fn new(max_pending: usize, replay_buffer_size: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_pending: max_pending.max(1),
            replay_buffer_size,
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, SessionQueue>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Creates the queue for a session. No-op if it already exists.
    pub fn open(&self, session_id: &str) {
        self.sessions()
            .entry(session_id.to_string())
            .or_insert_with(SessionQueue::new);
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions().contains_key(session_id)
    }

    /// Discards all state for a session and wakes any stream waiting on it.
    /// Returns whether the session existed.
    pub fn close(&self, session_id: &str) -> bool {
        match self.sessions().remove(session_id) {
            Some(queue) => {
                queue.notify.notify_waiters();
                true
            }
            None => false,
        }
    }

    /// Appends a message and returns its sequence number.
    ///
    /// When the pending queue is full the oldest undelivered message is dropped.
    pub fn enqueue(&self, session_id: &str, payload: String) -> Result<u64, QueueError> {
        let mut sessions = self.sessions();
        let queue = sessions
            .get_mut(session_id)
            .ok_or_else(|| QueueError::UnknownSession(session_id.to_string()))?;

        if queue.pending.len() >= self.max_pending {
            if let Some(dropped) = queue.pending.pop_front() {
                warn!(
                    "Message queue full for session {}, dropping message {}",
                    session_id, dropped.seq
                );
                metrics::record_message_dropped();
            }
        }

        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.pending.push_back(QueuedMessage {
            seq,
            payload,
            enqueued_at: Utc::now(),
        });
        queue.notify.notify_one();
        metrics::record_message_enqueued();
        Ok(seq)
    }

    /// Removes and returns every pending message in enqueue order.
    ///
    /// Returns `None` once the session has been closed.
    pub fn dequeue_all(&self, session_id: &str) -> Option<Vec<QueuedMessage>> {
        let mut sessions = self.sessions();
        let queue = sessions.get_mut(session_id)?;
        Some(queue.drain_pending(self.replay_buffer_size))
    }

    /// Registers a new SSE stream for the session, superseding any older one.
    /// Returns the stream's generation and the session's wakeup handle.
    pub fn attach_stream(&self, session_id: &str) -> Option<(u64, Arc<Notify>)> {
        let mut sessions = self.sessions();
        let queue = sessions.get_mut(session_id)?;
        queue.stream_generation += 1;
        // Wake the previous stream so it notices it was replaced
        queue.notify.notify_waiters();
        Some((queue.stream_generation, queue.notify.clone()))
    }

    /// Drains pending messages on behalf of the stream with `generation`.
    /// Only the most recently attached stream receives messages.
    pub fn poll_stream(&self, session_id: &str, generation: u64) -> StreamPoll {
        let mut sessions = self.sessions();
        let Some(queue) = sessions.get_mut(session_id) else {
            return StreamPoll::Closed;
        };
        if queue.stream_generation != generation {
            return StreamPoll::Superseded;
        }
        StreamPoll::Messages(queue.drain_pending(self.replay_buffer_size))
    }

    /// Already-delivered messages with a sequence number above `last_event_id`,
    /// limited to what the replay ring still holds.
    pub fn replay_after(&self, session_id: &str, last_event_id: u64) -> Option<Vec<QueuedMessage>> {
        let sessions = self.sessions();
        let queue = sessions.get(session_id)?;
        Some(
            queue
                .delivered
                .iter()
                .filter(|m| m.seq > last_event_id)
                .cloned()
                .collect(),
        )
    }

    pub fn pending_len(&self, session_id: &str) -> usize {
        self.sessions()
            .get(session_id)
            .map(|q| q.pending.len())
            .unwrap_or(0)
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
