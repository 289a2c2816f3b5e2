use super::schema::SESSION_VERSIONED_SCHEMAS;
use super::SessionStore;
use crate::sqlite_persistence::BASE_DB_VERSION;
use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Session store backed by a SQLite file, so sessions survive restarts.
pub struct SqliteSessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSessionStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let mut conn = Connection::open(path).context("Failed to open session database")?;
        let latest = SESSION_VERSIONED_SCHEMAS
            .last()
            .ok_or_else(|| anyhow!("No session schema defined"))?;

        if is_new_db {
            info!("Creating new session database at {:?}", path);
            latest.create(&conn)?;
        } else {
            let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
            let db_version = raw_version - BASE_DB_VERSION as i64;
            if db_version < 1 {
                bail!(
                    "Session database version {} is invalid (expected >= 1)",
                    db_version
                );
            }

            let schema = SESSION_VERSIONED_SCHEMAS
                .iter()
                .find(|s| s.version == db_version as usize)
                .with_context(|| format!("Unknown session database version {}", db_version))?;
            schema.validate(&conn).with_context(|| {
                format!(
                    "Session database schema validation failed for version {}",
                    db_version
                )
            })?;

            if (db_version as usize) < latest.version {
                info!(
                    "Migrating session database from version {} to {}",
                    db_version, latest.version
                );
                Self::migrate(&mut conn, db_version as usize)?;
            }
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate(conn: &mut Connection, from_version: usize) -> Result<()> {
        let tx = conn.transaction()?;
        let mut current = from_version;
        for schema in SESSION_VERSIONED_SCHEMAS
            .iter()
            .filter(|s| s.version > from_version)
        {
            if let Some(migration) = schema.migration {
                migration(&tx).with_context(|| {
                    format!("Failed to run migration to version {}", schema.version)
                })?;
            }
            current = schema.version;
        }
        tx.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + current),
            [],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Session database lock poisoned"))
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

impl SessionStore for SqliteSessionStore {
    fn read(&self, session_id: &str) -> Result<Option<String>> {
        let now = Utc::now().timestamp_millis();
        let conn = self.conn()?;
        let data = conn
            .query_row(
                "SELECT data FROM mcp_sessions WHERE session_id = ?1 AND expires_at > ?2",
                params![session_id, now],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(data)
    }

    fn write(&self, session_id: &str, data: &str, ttl: Duration) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let expires_at = now.saturating_add(millis(ttl));
        self.conn()?.execute(
            "INSERT INTO mcp_sessions (session_id, data, updated_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session_id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at,
                expires_at = excluded.expires_at",
            params![session_id, data, now, expires_at],
        )?;
        Ok(())
    }

    fn destroy(&self, session_id: &str) -> Result<()> {
        self.conn()?.execute(
            "DELETE FROM mcp_sessions WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(())
    }

    fn garbage_collect(&self, max_lifetime: Duration) -> Result<Vec<String>> {
        let now = Utc::now().timestamp_millis();
        let oldest_allowed = now.saturating_sub(millis(max_lifetime));

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let removed = {
            let mut stmt = tx.prepare(
                "SELECT session_id FROM mcp_sessions WHERE expires_at <= ?1 OR updated_at < ?2",
            )?;
            let ids = stmt
                .query_map(params![now, oldest_allowed], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            ids
        };
        tx.execute(
            "DELETE FROM mcp_sessions WHERE expires_at <= ?1 OR updated_at < ?2",
            params![now, oldest_allowed],
        )?;
        tx.commit()?;

        if !removed.is_empty() {
            debug!("Removed {} stale sessions from database", removed.len());
        }
        Ok(removed)
    }
}
