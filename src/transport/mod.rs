//! HTTP transport bridging JSON-RPC/MCP to axum.
//!
//! ## Contract
//!
//! - `POST` carries one JSON-RPC message. `initialize` mints a session and
//!   returns it in the `Mcp-Session-Id` header; anything else must name an
//!   existing session (header, or `sessionId`/`clientId` query parameter).
//! - A synchronous dispatcher result (or error) is returned as `200` with the
//!   JSON-RPC envelope. Otherwise the reply is `202` with an empty body.
//! - `GET` opens the session's SSE stream, `DELETE` ends the session.
//! - Undelivered messages are bounded per session; the oldest is dropped on
//!   overflow. Delivered messages are kept in a bounded ring for resume.

mod error;
mod queue;
mod routes;
mod sse;

pub use error::TransportError;
pub use queue::{MessageQueue, QueueError, QueuedMessage, StreamPoll};
pub use routes::{make_mcp_routes, MCP_SESSION_ID_HEADER};

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use rand::Rng;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::mcp::dispatcher::{DisconnectReason, McpDispatcher, SessionContext, SessionOutbox};
use crate::mcp::protocol::{methods, McpError, McpRequest, McpResponse};
use crate::server::metrics;
use crate::session::{SessionData, SessionStore};

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Session lifetime measured from last activity.
    pub session_ttl: Duration,
    /// A request triggers GC with odds `gc_probability / gc_divisor`.
    pub gc_probability: u32,
    pub gc_divisor: u32,
    pub sse_poll_interval: Duration,
    pub keep_alive_interval: Duration,
    pub max_pending_messages: usize,
    pub replay_buffer_size: usize,
    /// Announced to SSE clients in the initial `endpoint` event.
    pub message_endpoint: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(3600),
            gc_probability: 2,
            gc_divisor: 100,
            sse_poll_interval: Duration::from_secs(1),
            keep_alive_interval: Duration::from_secs(15),
            max_pending_messages: 1024,
            replay_buffer_size: 256,
            message_endpoint: "/mcp/message".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcTrigger {
    Lottery,
    Periodic,
    Manual,
}

impl GcTrigger {
    fn as_str(&self) -> &'static str {
        match self {
            GcTrigger::Lottery => "lottery",
            GcTrigger::Periodic => "periodic",
            GcTrigger::Manual => "manual",
        }
    }
}

/// Result of a successfully processed POST.
#[derive(Debug)]
pub struct PostOutcome {
    /// Session the message was processed on. `None` when an `initialize`
    /// was rejected by the dispatcher and the minted session was discarded.
    pub session_id: Option<String>,
    /// `None` means "accepted, nothing to return synchronously".
    pub response: Option<McpResponse>,
}

pub struct McpTransport {
    config: TransportConfig,
    store: Arc<dyn SessionStore>,
    queue: Arc<MessageQueue>,
    dispatcher: Arc<dyn McpDispatcher>,
}

impl McpTransport {
    pub fn new(
        config: TransportConfig,
        store: Arc<dyn SessionStore>,
        dispatcher: Arc<dyn McpDispatcher>,
    ) -> Self {
        let queue = Arc::new(MessageQueue::new(
            config.max_pending_messages,
            config.replay_buffer_size,
        ));
        Self {
            config,
            store,
            queue,
            dispatcher,
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Number of sessions with live queue state in this process.
    pub fn open_sessions(&self) -> usize {
        self.queue.len()
    }

    fn session_context(&self, session_id: &str) -> SessionContext {
        SessionContext {
            session_id: session_id.to_string(),
            outbox: SessionOutbox::new(self.queue.clone(), session_id.to_string()),
        }
    }

    fn persist(&self, session_id: &str, data: &SessionData) {
        let result = data
            .to_json()
            .and_then(|raw| self.store.write(session_id, &raw, self.config.session_ttl));
        if let Err(e) = result {
            warn!("Failed to persist session {}: {:#}", session_id, e);
        }
    }

    // ------------------------------------------------------------------------
    // POST
    // ------------------------------------------------------------------------

    pub async fn handle_post(
        &self,
        content_type: Option<&str>,
        session_id: Option<String>,
        body: &[u8],
    ) -> Result<PostOutcome, TransportError> {
        self.maybe_collect_garbage().await;

        if !is_json_content_type(content_type) {
            return Err(TransportError::UnsupportedMediaType);
        }
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(TransportError::EmptyBody);
        }
        let request = McpRequest::from_slice(body).map_err(TransportError::Rejected)?;

        if request.method == methods::INITIALIZE {
            if let Some(suggested) = session_id {
                debug!("Ignoring client-suggested session id {} on initialize", suggested);
            }
            let session_id = self.create_session(&request);
            let connected = self
                .notify_connected(&self.session_context(&session_id))
                .await;
            let response = if connected {
                self.dispatch(&session_id, request).await
            } else {
                request.id.clone().map(|id| {
                    McpResponse::error(
                        Some(id),
                        McpError::DispatchFailed("client_connected hook panicked".to_string()),
                    )
                })
            };
            if !connected || response.as_ref().is_some_and(|r| r.error.is_some()) {
                self.discard_session(&session_id).await;
                return Ok(PostOutcome {
                    session_id: None,
                    response,
                });
            }
            return Ok(PostOutcome {
                session_id: Some(session_id),
                response,
            });
        }

        let session_id = session_id.ok_or(TransportError::MissingSession)?;
        self.resolve_session(&session_id, TransportError::UnknownSession)
            .await?;
        let response = self.dispatch(&session_id, request).await;
        Ok(PostOutcome {
            session_id: Some(session_id),
            response,
        })
    }

    fn create_session(&self, request: &McpRequest) -> String {
        let session_id = self.store.generate_session_id();
        let data = SessionData::from_initialize_params(request.params.as_ref());
        self.persist(&session_id, &data);
        self.queue.open(&session_id);
        metrics::record_session_created();
        info!("Created MCP session {}", session_id);
        session_id
    }

    /// Undoes `create_session` and pairs the earlier `client_connected`
    /// with a disconnect.
    async fn discard_session(&self, session_id: &str) {
        if let Err(e) = self.store.destroy(session_id) {
            warn!("Failed to destroy session {}: {:#}", session_id, e);
        }
        self.queue.close(session_id);
        metrics::record_session_closed(DisconnectReason::InitializeFailed.as_str());
        self.notify_disconnected(session_id, DisconnectReason::InitializeFailed)
            .await;
        debug!("Discarded session {} after failed initialize", session_id);
    }

    /// Runs the `client_connected` hook. Returns false if it panicked.
    async fn notify_connected(&self, ctx: &SessionContext) -> bool {
        let result = AssertUnwindSafe(self.dispatcher.client_connected(ctx))
            .catch_unwind()
            .await;
        match result {
            Ok(()) => true,
            Err(panic) => {
                error!(
                    "Dispatcher panicked in client_connected for session {}: {}",
                    ctx.session_id,
                    panic_message(panic.as_ref())
                );
                metrics::record_error("dispatcher_panic", "client_connected");
                false
            }
        }
    }

    async fn notify_disconnected(&self, session_id: &str, reason: DisconnectReason) {
        let result = AssertUnwindSafe(self.dispatcher.client_disconnected(session_id, reason))
            .catch_unwind()
            .await;
        if let Err(panic) = result {
            error!(
                "Dispatcher panicked in client_disconnected for session {}: {}",
                session_id,
                panic_message(panic.as_ref())
            );
            metrics::record_error("dispatcher_panic", "client_disconnected");
        }
    }

    /// Checks that `session_id` is live and refreshes its last activity.
    ///
    /// The store is authoritative. If it cannot be read, the in-process
    /// queue decides. A session the store no longer knows is closed here
    /// so it cannot receive further messages.
    async fn resolve_session(
        &self,
        session_id: &str,
        not_found: fn(String) -> TransportError,
    ) -> Result<(), TransportError> {
        match self.store.read(session_id) {
            Ok(Some(raw)) => {
                let mut data = SessionData::from_json(&raw).unwrap_or_else(|e| {
                    warn!("Corrupt session payload for {}: {:#}", session_id, e);
                    SessionData::new()
                });
                data.touch();
                self.persist(session_id, &data);
                // Sessions restored from a persistent store get their queue lazily
                self.queue.open(session_id);
                Ok(())
            }
            Ok(None) => {
                if self.queue.close(session_id) {
                    info!("Session {} expired", session_id);
                    metrics::record_session_closed(DisconnectReason::SessionExpired.as_str());
                    self.notify_disconnected(session_id, DisconnectReason::SessionExpired)
                        .await;
                }
                Err(not_found(session_id.to_string()))
            }
            Err(e) => {
                warn!(
                    "Session store read failed for {}, falling back to in-memory state: {:#}",
                    session_id, e
                );
                if self.queue.contains(session_id) {
                    Ok(())
                } else {
                    Err(not_found(session_id.to_string()))
                }
            }
        }
    }

    async fn dispatch(&self, session_id: &str, request: McpRequest) -> Option<McpResponse> {
        let ctx = self.session_context(session_id);
        let id = request.id.clone();
        let method = request.method.clone();
        let start = Instant::now();

        let result = AssertUnwindSafe(self.dispatcher.handle_message(&ctx, request))
            .catch_unwind()
            .await;
        metrics::record_dispatch(&method, start.elapsed());

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                error!(
                    "Dispatcher panicked handling {} for session {}: {}",
                    method, session_id, detail
                );
                Err(McpError::DispatchFailed(detail))
            }
        };

        match (id, outcome) {
            (Some(id), Ok(Some(result))) => Some(McpResponse::success(id, result)),
            (Some(id), Err(e)) => Some(McpResponse::error(Some(id), e)),
            (_, Ok(None)) => None,
            (None, Ok(Some(_))) => {
                debug!("Dropping result produced for notification {}", method);
                None
            }
            (None, Err(e)) => {
                warn!("Notification {} failed: {}", method, e.message());
                None
            }
        }
    }

    // ------------------------------------------------------------------------
    // DELETE
    // ------------------------------------------------------------------------

    /// Ends a session. Unknown or missing ids are not an error.
    pub async fn handle_delete(&self, session_id: Option<&str>) {
        let Some(session_id) = session_id else {
            return;
        };
        if let Err(e) = self.store.destroy(session_id) {
            warn!("Failed to destroy session {}: {:#}", session_id, e);
        }
        if self.queue.close(session_id) {
            info!("Session {} deleted by client", session_id);
            metrics::record_session_closed(DisconnectReason::SessionDeleted.as_str());
            self.notify_disconnected(session_id, DisconnectReason::SessionDeleted)
                .await;
        }
    }

    /// Ends every open SSE stream but keeps the sessions in the store, so
    /// clients of a persistent backend can reconnect after a restart.
    pub fn close_streams(&self) {
        let session_ids = self.queue.session_ids();
        for session_id in &session_ids {
            self.queue.close(session_id);
        }
        if !session_ids.is_empty() {
            info!("Closed {} session streams for shutdown", session_ids.len());
        }
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    /// Queues `message` for the session's SSE stream. Resolves once queued.
    pub async fn send_message<T: Serialize + ?Sized>(
        &self,
        session_id: &str,
        message: &T,
    ) -> Result<u64, TransportError> {
        if !self.queue.contains(session_id) {
            match self.store.read(session_id) {
                Ok(Some(_)) => self.queue.open(session_id),
                Ok(None) => return Err(TransportError::UnknownSession(session_id.to_string())),
                Err(e) => {
                    warn!("Session store read failed for {}: {:#}", session_id, e);
                    return Err(TransportError::UnknownSession(session_id.to_string()));
                }
            }
        }
        let payload = serde_json::to_string(message)?;
        Ok(self.queue.enqueue(session_id, payload)?)
    }

    // ------------------------------------------------------------------------
    // Garbage collection
    // ------------------------------------------------------------------------

    fn gc_lottery_won(&self) -> bool {
        let (gc_probability, gc_divisor) = (self.config.gc_probability, self.config.gc_divisor);
        gc_divisor > 0 && rand::rng().random_range(0..gc_divisor) < gc_probability
    }

    async fn maybe_collect_garbage(&self) {
        if self.gc_lottery_won() {
            self.collect_garbage(GcTrigger::Lottery).await;
        }
    }

    /// Drops expired sessions from the store and any queue state whose
    /// store record is gone. Returns the ids that were removed.
    pub async fn collect_garbage(&self, trigger: GcTrigger) -> Vec<String> {
        metrics::record_gc_run(trigger.as_str());

        let mut removed = match self.store.garbage_collect(self.config.session_ttl) {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Session garbage collection failed: {:#}", e);
                Vec::new()
            }
        };

        // Backends with their own expiry may not report every dropped id
        for session_id in self.queue.session_ids() {
            if removed.contains(&session_id) {
                continue;
            }
            match self.store.read(&session_id) {
                Ok(None) => removed.push(session_id),
                Ok(Some(_)) => {}
                Err(e) => debug!("Skipping GC check for {}: {:#}", session_id, e),
            }
        }

        for session_id in &removed {
            if self.queue.close(session_id) {
                metrics::record_session_closed(DisconnectReason::SessionExpired.as_str());
                self.notify_disconnected(session_id, DisconnectReason::SessionExpired)
                    .await;
            }
        }

        if !removed.is_empty() {
            info!(
                "Garbage collected {} expired sessions ({})",
                removed.len(),
                trigger.as_str()
            );
        }
        removed
    }
}

/// Runs GC every `interval` until `shutdown` is cancelled.
pub async fn run_periodic_gc(
    transport: Arc<McpTransport>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // Skip the first immediate tick
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                transport.collect_garbage(GcTrigger::Periodic).await;
            }
            _ = shutdown.cancelled() => {
                debug!("Periodic session GC stopped");
                break;
            }
        }
    }
}

fn is_json_content_type(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
