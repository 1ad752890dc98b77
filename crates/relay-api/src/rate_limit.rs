// Per-key token bucket rate limiting
//
// Buckets live in a concurrent map keyed by identity (API key or client
// IP). Refill happens on access; idle buckets are evicted periodically so
// the map never grows without bound. State is shared across all endpoints.

use dashmap::DashMap;
use std::time::{Duration, Instant};

struct Bucket {
    tokens: f64,
    refilled_at: Instant,
    last_access: Instant,
}

/// Shared token-bucket limiter
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    rate_per_sec: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(rate_per_sec: f64, burst: f64) -> Self {
        Self {
            buckets: DashMap::new(),
            rate_per_sec,
            burst,
        }
    }

    /// Take one token for `key`; false means rate-limited
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut bucket = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: self.burst,
            refilled_at: now,
            last_access: now,
        });

        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.burst);
        bucket.refilled_at = now;
        bucket.last_access = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets idle longer than `max_idle`
    pub fn evict_idle(&self, max_idle: Duration) {
        let now = Instant::now();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_access) < max_idle);
    }

    #[cfg(test)]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}
