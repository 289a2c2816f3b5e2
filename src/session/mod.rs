//! MCP session persistence.
//!
//! A session record is an opaque serialized payload keyed by session id,
//! with an expiry measured from the last write. The transport owns the
//! lifecycle decisions; stores only persist and expire.

mod id;
mod memory_store;
mod schema;
mod sqlite_store;

pub use id::{generate_session_id, SESSION_ID_PREFIX};
pub use memory_store::InMemorySessionStore;
pub use schema::SESSION_VERSIONED_SCHEMAS;
pub use sqlite_store::SqliteSessionStore;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Key-value storage for session payloads with TTL semantics.
///
/// Every method reports failures through `Result`; callers are expected to
/// treat them as soft failures (log and continue).
pub trait SessionStore: Send + Sync {
    /// Returns the stored payload, or `None` if the session is unknown or expired.
    fn read(&self, session_id: &str) -> Result<Option<String>>;

    /// Upserts the payload and resets its expiry to `ttl` from now.
    fn write(&self, session_id: &str, data: &str, ttl: Duration) -> Result<()>;

    /// Removes the session. Destroying an unknown session is not an error.
    fn destroy(&self, session_id: &str) -> Result<()>;

    /// Removes sessions that are expired or whose last write is older than
    /// `max_lifetime`, returning the removed ids.
    ///
    /// Best effort: backends with their own expiry may return fewer ids
    /// than they actually dropped.
    fn garbage_collect(&self, max_lifetime: Duration) -> Result<Vec<String>>;

    fn generate_session_id(&self) -> String {
        generate_session_id()
    }
}

/// Protocol-level state persisted for each session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_capabilities: Option<Value>,
}

impl SessionData {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            last_activity: now,
            protocol_version: None,
            client_info: None,
            client_capabilities: None,
        }
    }

    /// Captures what the client declared in its `initialize` params.
    pub fn from_initialize_params(params: Option<&Value>) -> Self {
        let mut data = Self::new();
        if let Some(params) = params {
            data.protocol_version = params
                .get("protocolVersion")
                .and_then(Value::as_str)
                .map(str::to_string);
            data.client_info = params.get("clientInfo").cloned();
            data.client_capabilities = params.get("capabilities").cloned();
        }
        data
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

impl Default for SessionData {
    fn default() -> Self {
        Self::new()
    }
}
