//! SQLite schema for persisted MCP sessions.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Sessions
// =============================================================================

/// Timestamps are unix milliseconds.
const SESSIONS_TABLE_V1: Table = Table {
    name: "mcp_sessions",
    columns: &[
        sqlite_column!("session_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("data", &SqlType::Text, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
        sqlite_column!("expires_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_mcp_sessions_expires_at", "expires_at"),
        ("idx_mcp_sessions_updated_at", "updated_at"),
    ],
};

pub const SESSION_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[SESSIONS_TABLE_V1],
    migration: None,
}];
