//! Owner-permission cache (component D): a sliding-TTL memoization of
//! "does this public key own this store", backed by a [`MetadataClient`] on
//! miss so a legitimate writer's request doesn't hit the network on every
//! upload chunk.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::AppError;
use crate::external::MetadataClient;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    public_key: String,
    store_id: String,
}

struct Entry {
    is_owner: bool,
    expires_at: Instant,
}

/// Caches owner-permission checks with a sliding TTL: every hit (positive or
/// negative) extends the entry's lifetime, matching the reference service's
/// "recently active callers stay warm" cache behavior.
pub struct OwnerCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, Entry>>,
    metadata: Arc<dyn MetadataClient>,
}

impl OwnerCache {
    pub fn new(ttl: Duration, metadata: Arc<dyn MetadataClient>) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            metadata,
        }
    }

    /// Is `public_key` an owner of `store_id`? Serves from cache when fresh,
    /// otherwise consults the metadata client and caches the result either way.
    pub async fn is_owner(&self, public_key: &str, store_id: &str) -> Result<bool, AppError> {
        let key = CacheKey {
            public_key: public_key.to_string(),
            store_id: store_id.to_string(),
        };

        if let Some(cached) = self.fresh_hit(&key) {
            return Ok(cached);
        }

        let is_owner = self.metadata.is_owner(public_key, store_id).await?;
        self.entries.lock().insert(
            key,
            Entry {
                is_owner,
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(is_owner)
    }

    fn fresh_hit(&self, key: &CacheKey) -> Option<bool> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(key)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        entry.expires_at = Instant::now() + self.ttl;
        Some(entry.is_owner)
    }

    /// Drop every entry whose TTL has elapsed since its last hit.
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
    use crate::external::test_doubles::FakeMetadataClient;

    #[tokio::test]
    async fn caches_positive_result() {
        let metadata = Arc::new(FakeMetadataClient::new());
        metadata.add_owner("store", "pubkey");
        let cache = OwnerCache::new(Duration::from_secs(60), metadata);

        assert!(cache.is_owner("pubkey", "store").await.unwrap());
        assert!(cache.is_owner("pubkey", "store").await.unwrap());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn caches_negative_result() {
        let metadata = Arc::new(FakeMetadataClient::new());
        let cache = OwnerCache::new(Duration::from_secs(60), metadata);
        assert!(!cache.is_owner("stranger", "store").await.unwrap());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_refreshed_from_metadata() {
        let metadata = Arc::new(FakeMetadataClient::new());
        let cache = OwnerCache::new(Duration::from_millis(1), metadata.clone());
        assert!(!cache.is_owner("pubkey", "store").await.unwrap());

        metadata.add_owner("store", "pubkey");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.is_owner("pubkey", "store").await.unwrap());
    }

    #[tokio::test]
    async fn sweep_removes_stale_entries() {
        let metadata = Arc::new(FakeMetadataClient::new());
        let cache = OwnerCache::new(Duration::from_millis(1), metadata);
        cache.is_owner("pubkey", "store").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.sweep_expired();
        assert_eq!(cache.len(), 0);
    }
}
