//! Hand-rolled sliding-window rate limiting.
//!
//! The reference service's auth crate leans on `tower::limit` for raw
//! concurrency limiting but has no request-rate limiter of its own; this
//! module fills that gap in the same spirit as its other in-memory,
//! `parking_lot`-guarded registries rather than pulling in an external
//! limiter crate. Handlers call [`RateLimiter::check`] directly rather than
//! through a generic middleware layer, since the key each endpoint limits on
//! (IP alone for upload-start, `(ip, storeId, path)` for fetch) differs
//! per-route.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::RateLimitConfig;
use crate::error::AppError;

struct Window {
    hits: Vec<Instant>,
}

/// A sliding-window limiter keyed by an arbitrary string (caller chooses
/// what to key on: client IP alone, or `(ip, storeId, path)`).
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    buckets: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            limit: config.limit,
            window: Duration::from_secs(config.window_secs),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Record one request attributed to `key`, returning `Ok(())` if it is
    /// within the limit or `Err(AppError::RateLimited)` otherwise. Requests
    /// that fail are not themselves counted towards the window.
    pub fn check(&self, key: &str) -> Result<(), AppError> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Window { hits: Vec::new() });
        bucket.hits.retain(|hit| now.duration_since(*hit) < self.window);

        if bucket.hits.len() as u32 >= self.limit {
            return Err(AppError::RateLimited);
        }
        bucket.hits.push(now);
        Ok(())
    }

    /// Drop buckets with no hits inside the current window, bounding memory
    /// use by distinct keys seen.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        let window = self.window;
        self.buckets
            .lock()
            .retain(|_, bucket| bucket.hits.iter().any(|hit| now.duration_since(*hit) < window));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_limit_then_rejects() {
        let limiter = RateLimiter::new(RateLimitConfig {
            limit: 2,
            window_secs: 60,
        });
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("a").is_err());
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(RateLimitConfig {
            limit: 1,
            window_secs: 60,
        });
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("b").is_ok());
        assert!(limiter.check("a").is_err());
    }

    #[test]
    fn window_expiry_allows_further_requests() {
        let limiter = RateLimiter::new(RateLimitConfig {
            limit: 1,
            window_secs: 0,
        });
        assert!(limiter.check("a").is_ok());
        std::thread::sleep(Duration::from_millis(5));
        assert!(limiter.check("a").is_ok());
    }

    #[test]
    fn sweep_drops_idle_buckets() {
        let limiter = RateLimiter::new(RateLimitConfig {
            limit: 1,
            window_secs: 0,
        });
        limiter.check("a").unwrap();
        std::thread::sleep(Duration::from_millis(5));
        limiter.sweep_expired();
        assert_eq!(limiter.buckets.lock().len(), 0);
    }
}
