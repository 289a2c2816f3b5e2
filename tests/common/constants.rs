//! Shared constants for end-to-end tests
//!
//! When protocol fixtures or timeouts change, update only this file.

// ============================================================================
// Protocol
// ============================================================================

/// Protocol version sent by the test client
pub const TEST_PROTOCOL_VERSION: &str = "2024-11-05";

/// Client name sent in `initialize`
pub const TEST_CLIENT_NAME: &str = "e2e-test-client";

/// Header carrying the session id
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Message endpoint announced in the SSE `endpoint` event
pub const MESSAGE_ENDPOINT: &str = "/mcp/message";

// ============================================================================
// Test Timeouts and Configuration
// ============================================================================

/// Maximum time to wait for server to become ready (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Timeout for individual HTTP requests (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Polling interval when waiting for server ready (milliseconds)
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;

/// Maximum time to wait for a single SSE event (milliseconds)
pub const SSE_EVENT_TIMEOUT_MS: u64 = 5000;
