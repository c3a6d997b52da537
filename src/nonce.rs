//! Nonce cache (component C): single-use, short-lived challenge tokens keyed
//! by `(storeId, sessionId, filename)`, used to bind one signature to one
//! upload attempt and prevent replay.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::RngCore;

/// Composite key a nonce is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonceKey {
    pub store_id: String,
    pub session_id: String,
    pub filename: String,
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-memory nonce cache, mirroring the locking style of the reference
/// service's session registry: one mutex over a plain map, with expired
/// entries reaped both lazily (on access) and by a background sweep.
pub struct NonceCache {
    ttl: Duration,
    entries: Mutex<HashMap<NonceKey, Entry>>,
}

impl NonceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Mint and store a fresh nonce for `key`, overwriting any previous,
    /// unconsumed nonce for the same key.
    pub fn issue(&self, key: NonceKey) -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let value = hex::encode(bytes);

        let entry = Entry {
            value: value.clone(),
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.lock().insert(key, entry);
        value
    }

    /// Atomically check `candidate` against the stored nonce for `key` and,
    /// on success, remove it so it cannot be used again. Returns `false` on
    /// any mismatch, missing key, or expiry, without distinguishing which.
    pub fn validate_and_consume(&self, key: &NonceKey, candidate: &str) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() && entry.value == candidate => {
                entries.remove(key);
                true
            }
            Some(_) => false,
            None => false,
        }
    }

    /// Drop every entry whose TTL has elapsed. Intended to be driven by a
    /// periodic background task; also safe to call inline in tests.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        self.entries.lock().retain(|_, entry| entry.expires_at > now);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> NonceKey {
        NonceKey {
            store_id: "store".into(),
            session_id: "session".into(),
            filename: "file.bin".into(),
        }
    }

    #[test]
    fn issued_nonce_validates_once() {
        let cache = NonceCache::new(Duration::from_secs(60));
        let nonce = cache.issue(key());
        assert!(cache.validate_and_consume(&key(), &nonce));
        assert!(!cache.validate_and_consume(&key(), &nonce));
    }

    #[test]
    fn wrong_candidate_is_rejected_without_consuming() {
        let cache = NonceCache::new(Duration::from_secs(60));
        let nonce = cache.issue(key());
        assert!(!cache.validate_and_consume(&key(), "not-the-nonce"));
        assert!(cache.validate_and_consume(&key(), &nonce));
    }

    #[test]
    fn expired_nonce_is_rejected() {
        let cache = NonceCache::new(Duration::from_millis(1));
        let nonce = cache.issue(key());
        std::thread::sleep(Duration::from_millis(20));
        assert!(!cache.validate_and_consume(&key(), &nonce));
    }

    #[test]
    fn sweep_removes_expired_entries() {
        let cache = NonceCache::new(Duration::from_millis(1));
        cache.issue(key());
        std::thread::sleep(Duration::from_millis(20));
        cache.sweep_expired();
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn reissuing_invalidates_previous_nonce() {
        let cache = NonceCache::new(Duration::from_secs(60));
        let first = cache.issue(key());
        let second = cache.issue(key());
        assert!(!cache.validate_and_consume(&key(), &first));
        assert!(cache.validate_and_consume(&key(), &second));
    }
}
