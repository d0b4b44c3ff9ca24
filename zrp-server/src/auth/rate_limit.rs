//! Leaky-bucket rate limiting.
//!
//! One bucket per key (client IP for login attempts, key prefix for API
//! keys). Each request adds one unit; the bucket drains at a fixed rate.
//! A full bucket rejects the request.

use dashmap::DashMap;
use std::time::Instant;

#[derive(Debug)]
struct Bucket {
    level: f64,
    last: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    capacity: f64,
    drain_per_sec: f64,
}

impl RateLimiter {
    pub fn new(capacity: f64, drain_per_sec: f64) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity,
            drain_per_sec,
        }
    }

    /// Limiter for login attempts: 5 in a burst, one more every 10 s.
    pub fn for_login() -> Self {
        Self::new(5.0, 0.1)
    }

    /// Limiter for bearer-key requests: 50-deep burst, 25/s sustained.
    pub fn for_api_keys() -> Self {
        Self::new(50.0, 25.0)
    }

    /// Record one request for `key`. Returns false when over the limit.
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entry = self.buckets.entry(key.to_string()).or_insert(Bucket {
            level: 0.0,
            last: now,
        });

        let elapsed = now.duration_since(entry.last).as_secs_f64();
        entry.level = (entry.level - elapsed * self.drain_per_sec).max(0.0);
        entry.last = now;

        if entry.level + 1.0 > self.capacity {
            return false;
        }
        entry.level += 1.0;
        true
    }

    /// Drop buckets that have fully drained (periodic housekeeping).
    pub fn evict_idle(&self) {
        let now = Instant::now();
        self.buckets.retain(|_, b| {
            let elapsed = now.duration_since(b.last).as_secs_f64();
            b.level - elapsed * self.drain_per_sec > 0.0
        });
    }
}
