//! TTL-bounded rate-limit counters keyed by identity
//!
//! Each key gets a rolling window; counters reset when their window
//! expires and stale entries are pruned, so the map stays bounded by
//! the set of recently active identities. In a multi-instance
//! deployment this state moves to a shared store with the same
//! key + expiry shape.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Prune stale windows once the map grows past this many keys
const PRUNE_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Per-key rolling-window rate limiter
pub struct RateLimiter {
    windows: DashMap<String, Window>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_requests,
            window,
        }
    }

    /// Count one request for `key`; false when the key is over its
    /// ceiling for the current window
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();

        if self.windows.len() > PRUNE_THRESHOLD {
            self.prune(now);
        }

        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert(Window { started: now, count: 0 });

        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }

        entry.count += 1;
        entry.count <= self.max_requests
    }

    fn prune(&self, now: Instant) {
        self.windows
            .retain(|_, window| now.duration_since(window.started) < self.window);
    }
}
