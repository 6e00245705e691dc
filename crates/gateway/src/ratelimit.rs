//! Per-session token-bucket rate limiting.
//!
//! Each session holds a bucket of `capacity` tokens; a request spends
//! one. `refill` tokens are credited per full window elapsed since the
//! last request. Defaults: 5 tokens, refill 5 per 10 s.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use ens_domain::config::LimitsConfig;

struct Bucket {
    last_seen: Instant,
    tokens: u32,
}

pub struct RateLimiter {
    capacity: u32,
    refill: u32,
    window: Duration,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill: u32, window: Duration) -> Self {
        Self {
            capacity,
            refill,
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(limits: &LimitsConfig) -> Self {
        Self::new(
            limits.rate_tokens,
            limits.rate_refill,
            Duration::from_secs(limits.rate_window_secs),
        )
    }

    /// Spend one token for `session_id`. Returns `false` when the
    /// bucket is empty.
    pub fn allow(&self, session_id: &str) -> bool {
        self.allow_at(session_id, Instant::now())
    }

    fn allow_at(&self, session_id: &str, now: Instant) -> bool {
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(session_id.to_owned()).or_insert(Bucket {
            last_seen: now,
            tokens: self.capacity,
        });

        let elapsed_windows = (now.saturating_duration_since(bucket.last_seen).as_secs()
            / self.window.as_secs().max(1)) as u32;
        let refilled = bucket
            .tokens
            .saturating_add(elapsed_windows.saturating_mul(self.refill))
            .min(self.capacity);
        bucket.last_seen = now;

        if refilled == 0 {
            bucket.tokens = 0;
            return false;
        }
        bucket.tokens = refilled - 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(5, 5, Duration::from_secs(10))
    }

    #[test]
    fn burst_up_to_capacity_then_rejected() {
        let limiter = limiter();
        for _ in 0..5 {
            assert!(limiter.allow("s1"));
        }
        assert!(!limiter.allow("s1"));
    }

    #[test]
    fn refills_after_a_full_window() {
        let limiter = limiter();
        let start = Instant::now();
        for _ in 0..5 {
            assert!(limiter.allow_at("s1", start));
        }
        assert!(!limiter.allow_at("s1", start));

        let later = start + Duration::from_secs(11);
        assert!(limiter.allow_at("s1", later));
    }

    #[test]
    fn partial_windows_do_not_refill() {
        let limiter = limiter();
        let start = Instant::now();
        for _ in 0..5 {
            assert!(limiter.allow_at("s1", start));
        }
        let soon = start + Duration::from_secs(3);
        assert!(!limiter.allow_at("s1", soon));
    }

    #[test]
    fn sessions_have_independent_buckets() {
        let limiter = limiter();
        for _ in 0..5 {
            assert!(limiter.allow("a"));
        }
        assert!(!limiter.allow("a"));
        assert!(limiter.allow("b"));
    }

    #[test]
    fn refill_never_exceeds_capacity() {
        let limiter = limiter();
        let start = Instant::now();
        assert!(limiter.allow_at("s1", start));
        // A long quiet period only restores up to capacity.
        let much_later = start + Duration::from_secs(1000);
        for _ in 0..5 {
            assert!(limiter.allow_at("s1", much_later));
        }
        assert!(!limiter.allow_at("s1", much_later));
    }
}
