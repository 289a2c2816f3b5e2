use super::SessionStore;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry {
    data: String,
    updated_at: Instant,
    /// `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// Process-local session store. Each instance is independent.
#[derive(Default)]
pub struct InMemorySessionStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("Session store lock poisoned"))
    }
}

impl SessionStore for InMemorySessionStore {
    fn read(&self, session_id: &str) -> Result<Option<String>> {
        let entries = self.lock()?;
        let now = Instant::now();
        Ok(entries
            .get(session_id)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.data.clone()))
    }

    fn write(&self, session_id: &str, data: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        self.lock()?.insert(
            session_id.to_string(),
            Entry {
                data: data.to_string(),
                updated_at: now,
                expires_at: now.checked_add(ttl),
            },
        );
        Ok(())
    }

    fn destroy(&self, session_id: &str) -> Result<()> {
        self.lock()?.remove(session_id);
        Ok(())
    }

    fn garbage_collect(&self, max_lifetime: Duration) -> Result<Vec<String>> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        let stale: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| {
                entry.is_expired(now) || now.duration_since(entry.updated_at) > max_lifetime
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            entries.remove(id);
        }
        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(3600);

    #[test]
    fn test_read_missing_returns_none() {
        let store = InMemorySessionStore::new();
        assert!(store.read("nope").unwrap().is_none());
    }

    #[test]
    fn test_write_then_read() {
        let store = InMemorySessionStore::new();
        store.write("s1", "{\"a\":1}", TTL).unwrap();
        assert_eq!(store.read("s1").unwrap().as_deref(), Some("{\"a\":1}"));

        store.write("s1", "{\"a\":2}", TTL).unwrap();
        assert_eq!(store.read("s1").unwrap().as_deref(), Some("{\"a\":2}"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let store = InMemorySessionStore::new();
        store.write("s1", "x", TTL).unwrap();
        store.destroy("s1").unwrap();
        store.destroy("s1").unwrap();
        store.destroy("never-existed").unwrap();
        assert!(store.read("s1").unwrap().is_none());
    }

    #[test]
    fn test_expired_entry_is_invisible_and_collected() {
        let store = InMemorySessionStore::new();
        store.write("short", "x", Duration::ZERO).unwrap();
        store.write("long", "y", TTL).unwrap();

        assert!(store.read("short").unwrap().is_none());

        let removed = store.garbage_collect(TTL).unwrap();
        assert_eq!(removed, vec!["short".to_string()]);
        assert!(store.read("long").unwrap().is_some());
    }

    #[test]
    fn test_gc_by_max_lifetime() {
        let store = InMemorySessionStore::new();
        store.write("s1", "x", TTL).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let removed = store.garbage_collect(Duration::from_millis(5)).unwrap();

        assert_eq!(removed, vec!["s1".to_string()]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_huge_ttl_does_not_overflow() {
        let store = InMemorySessionStore::new();
        store.write("s1", "{}", Duration::MAX).unwrap();
        assert_eq!(store.read("s1").unwrap().as_deref(), Some("{}"));
        assert!(store.garbage_collect(Duration::MAX).unwrap().is_empty());
    }

    #[test]
    fn test_instances_are_isolated() {
        let a = InMemorySessionStore::new();
        let b = InMemorySessionStore::new();
        a.write("s1", "x", TTL).unwrap();
        assert!(b.read("s1").unwrap().is_none());
    }
}
