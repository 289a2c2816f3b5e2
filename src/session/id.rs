use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub const SESSION_ID_PREFIX: &str = "mcp_";

static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generates an unguessable session id: `mcp_` followed by 64 hex chars.
///
/// The digest covers 256 bits from the thread-local CSPRNG, the wall clock
/// and a process-wide counter, so two ids never collide even if the clock
/// stalls.
pub fn generate_session_id() -> String {
    let mut random = [0u8; 32];
    rand::rng().fill_bytes(&mut random);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let counter = SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut hasher = Sha256::new();
    hasher.update(random);
    hasher.update(nanos.to_le_bytes());
    hasher.update(counter.to_le_bytes());
    let digest = hasher.finalize();

    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}{}", SESSION_ID_PREFIX, hex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_session_id_format() {
        let id = generate_session_id();
        assert!(id.starts_with(SESSION_ID_PREFIX));

        let hex = &id[SESSION_ID_PREFIX.len()..];
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_session_ids_are_unique() {
        let ids: HashSet<String> = (0..1000).map(|_| generate_session_id()).collect();
        assert_eq!(ids.len(), 1000);
    }
}
