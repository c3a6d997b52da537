//! Session registry (component F): owns upload sessions, their temp
//! directories, and their expiry timers.
//!
//! Mirrors the reference service's locking discipline: one lock serializes
//! registry-shape mutations (insert/remove), while each session's mutable
//! fields (root hash, expiry) are guarded by their own lock so a slow PUT
//! streaming into one session never blocks lookups for others.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::AppError;
use crate::layout::Layout;

/// Mutable state belonging to one in-flight upload session.
pub struct SessionInner {
    pub store_id: String,
    pub root_hash: Option<String>,
    pub tmp_dir: PathBuf,
    deadline: Instant,
}

/// A handle to a registered session: the mutable state plus the timer task
/// that will destroy it when its deadline passes.
struct SessionEntry {
    inner: Arc<Mutex<SessionInner>>,
    timer: JoinHandle<()>,
    /// Bumped on every `bump()` call; the timer task re-reads this after
    /// sleeping to decide whether it is still the live timer for this
    /// session or has been superseded by a later bump.
    generation: Arc<AtomicU64>,
}

/// Process-wide session registry.
pub struct SessionRegistry {
    ttl: Duration,
    layout: Arc<Layout>,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new(ttl: Duration, layout: Arc<Layout>) -> Arc<Self> {
        Arc::new(Self {
            ttl,
            layout,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Allocate a fresh session: a UUID v4 id, an exclusive temp directory,
    /// and an armed expiry timer.
    pub async fn create(self: &Arc<Self>, store_id: &str) -> Result<String, AppError> {
        let session_id = Uuid::new_v4().to_string();
        let tmp_dir = self.layout.session_tmp_dir(&session_id);
        tokio::fs::create_dir_all(&tmp_dir).await?;

        let inner = Arc::new(Mutex::new(SessionInner {
            store_id: store_id.to_string(),
            root_hash: None,
            tmp_dir,
            deadline: Instant::now() + self.ttl,
        }));
        let generation = Arc::new(AtomicU64::new(0));
        let timer = self.spawn_timer(session_id.clone(), generation.clone(), self.ttl);

        self.sessions.write().insert(
            session_id.clone(),
            SessionEntry {
                inner,
                timer,
                generation,
            },
        );
        Ok(session_id)
    }

    /// Non-mutating lookup.
    pub fn get(&self, session_id: &str) -> Option<Arc<Mutex<SessionInner>>> {
        self.sessions.read().get(session_id).map(|e| e.inner.clone())
    }

    /// Reset a session's expiry to "now + TTL" and re-arm its timer.
    /// Called at most once per `bump_min_interval` by the upload engine
    /// (the caller is responsible for coalescing calls).
    pub fn bump(self: &Arc<Self>, session_id: &str) {
        let generation = {
            let sessions = self.sessions.read();
            let Some(entry) = sessions.get(session_id) else {
                return;
            };
            entry.inner.lock().deadline = Instant::now() + self.ttl;
            entry.generation.fetch_add(1, Ordering::SeqCst);
            entry.generation.clone()
        };

        let new_timer = self.spawn_timer(session_id.to_string(), generation, self.ttl);

        let mut sessions = self.sessions.write();
        if let Some(entry) = sessions.get_mut(session_id) {
            entry.timer.abort();
            entry.timer = new_timer;
        } else {
            new_timer.abort();
        }
    }

    /// Cancel the timer, recursively delete the temp directory, and remove
    /// the entry. Idempotent: destroying an unknown session is a no-op.
    pub async fn destroy(&self, session_id: &str) {
        let entry = self.sessions.write().remove(session_id);
        let Some(entry) = entry else { return };
        entry.timer.abort();

        let tmp_dir = entry.inner.lock().tmp_dir.clone();
        if let Err(err) = tokio::fs::remove_dir_all(&tmp_dir).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(?err, session_id, "failed to remove session temp directory");
            }
        }
    }

    fn spawn_timer(
        self: &Arc<Self>,
        session_id: String,
        generation: Arc<AtomicU64>,
        ttl: Duration,
    ) -> JoinHandle<()> {
        let my_generation = generation.load(Ordering::SeqCst);
        let registry = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if generation.load(Ordering::SeqCst) == my_generation {
                registry.destroy(&session_id).await;
            }
        })
    }

    /// Scan the registry for sessions past their deadline and destroy them.
    /// Defense in depth alongside per-session timers.
    pub async fn sweep_expired(&self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, entry)| entry.inner.lock().deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            self.destroy(&id).await;
        }
    }

    /// Number of sessions currently registered, for the health endpoint.
    pub fn active_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// On startup, remove any leftover temp directories from a prior
    /// process crash; sessions never survive a restart.
    pub async fn purge_stale_temp_dirs(&self) -> std::io::Result<()> {
        let tmp_root = self.layout.tmp_root();
        let mut entries = match tokio::fs::read_dir(&tmp_root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err),
        };
        while let Some(entry) = entries.next_entry().await? {
            tokio::fs::remove_dir_all(entry.path()).await.or_else(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    Ok(())
                } else {
                    Err(err)
                }
            })?;
        }
        Ok(())
    }
}

impl SessionInner {
    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn make_registry(ttl: Duration) -> (Arc<SessionRegistry>, TempDir) {
        let dir = TempDir::new().unwrap();
        let layout = Arc::new(Layout::new(dir.path()));
        layout.ensure_base_dirs().await.unwrap();
        (SessionRegistry::new(ttl, layout), dir)
    }

    #[tokio::test]
    async fn create_get_destroy_round_trip() {
        let (registry, _dir) = make_registry(Duration::from_secs(60)).await;
        let session_id = registry.create("store").await.unwrap();

        let inner = registry.get(&session_id).unwrap();
        assert_eq!(inner.lock().store_id, "store");
        assert!(inner.lock().tmp_dir.is_dir());

        registry.destroy(&session_id).await;
        assert!(registry.get(&session_id).is_none());
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let (registry, _dir) = make_registry(Duration::from_secs(60)).await;
        let session_id = registry.create("store").await.unwrap();
        registry.destroy(&session_id).await;
        registry.destroy(&session_id).await;
        assert!(registry.get(&session_id).is_none());
    }

    #[tokio::test]
    async fn expired_session_is_destroyed_by_timer() {
        let (registry, _dir) = make_registry(Duration::from_millis(20)).await;
        let session_id = registry.create("store").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(registry.get(&session_id).is_none());
    }

    #[tokio::test]
    async fn bump_extends_the_deadline() {
        let (registry, _dir) = make_registry(Duration::from_millis(60)).await;
        let session_id = registry.create("store").await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        registry.bump(&session_id);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(registry.get(&session_id).is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(registry.get(&session_id).is_none());
    }

    #[tokio::test]
    async fn sweep_destroys_sessions_past_deadline() {
        let (registry, _dir) = make_registry(Duration::from_millis(10)).await;
        let session_id = registry.create("store").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        registry.sweep_expired().await;
        assert!(registry.get(&session_id).is_none());
    }

    #[tokio::test]
    async fn purge_stale_temp_dirs_removes_leftovers_from_a_prior_process() {
        let (registry, dir) = make_registry(Duration::from_secs(60)).await;
        let leftover = dir.path().join("tmp").join("stale-session");
        tokio::fs::create_dir_all(&leftover).await.unwrap();

        registry.purge_stale_temp_dirs().await.unwrap();
        assert!(!leftover.exists());
    }
}
