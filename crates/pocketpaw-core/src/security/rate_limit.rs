//! Token-bucket rate limiter keyed by IP, API key, or tier.
//!
//! Buckets live in a plain `std::sync::Mutex<HashMap<..>>`: updates are a
//! handful of arithmetic operations with no `.await` in between, so an async
//! lock would only add overhead. `allow` consumes exactly one token per call;
//! the bucket is refilled lazily on access rather than by a background timer.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A named rate limiter (e.g. "api_limiter") with a fixed rate and capacity,
/// tracking one bucket per key.
pub struct RateLimiter {
    rate_per_sec: f64,
    capacity: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

/// Result of an `allow` check.
#[derive(Debug, PartialEq)]
pub enum Decision {
    Allowed,
    /// Denied; suggested `Retry-After` in seconds, rounded up.
    Denied { retry_after_secs: u64 },
}

impl RateLimiter {
    pub fn new(rate_per_sec: f64, capacity: f64) -> Self {
        RateLimiter {
            rate_per_sec,
            capacity,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Attempt to consume one token from `key`'s bucket. A new key starts
    /// with a full bucket.
    pub fn allow(&self, key: &str) -> Decision {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Decision::Allowed
        } else {
            let deficit = 1.0 - bucket.tokens;
            let wait_secs = (deficit / self.rate_per_sec).ceil() as u64;
            Decision::Denied {
                retry_after_secs: wait_secs.max(1),
            }
        }
    }

    /// Drop the bucket for `key`, e.g. on API key revocation.
    pub fn reset(&self, key: &str) {
        self.buckets.lock().unwrap().remove(key);
    }
}

#[allow(dead_code)]
fn sleep_budget(rate: f64) -> Duration {
    Duration::from_secs_f64(1.0 / rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_capacity() {
        let limiter = RateLimiter::new(10.0, 30.0);
        for _ in 0..30 {
            assert_eq!(limiter.allow("client_a"), Decision::Allowed);
        }
    }

    #[test]
    fn test_denies_after_capacity_exhausted() {
        let limiter = RateLimiter::new(10.0, 30.0);
        for _ in 0..30 {
            limiter.allow("client_a");
        }
        match limiter.allow("client_a") {
            Decision::Denied { retry_after_secs } => assert!(retry_after_secs >= 1),
            Decision::Allowed => panic!("expected denial on 31st call"),
        }
    }

    #[test]
    fn test_refills_after_quiet_period() {
        let limiter = RateLimiter::new(10.0, 30.0);
        for _ in 0..30 {
            limiter.allow("client_a");
        }
        {
            let mut buckets = limiter.buckets.lock().unwrap();
            let bucket = buckets.get_mut("client_a").unwrap();
            bucket.last_refill -= Duration::from_millis(150);
        }
        assert_eq!(limiter.allow("client_a"), Decision::Allowed);
    }

    #[test]
    fn test_bucket_never_exceeds_capacity() {
        let limiter = RateLimiter::new(10.0, 30.0);
        {
            let mut buckets = limiter.buckets.lock().unwrap();
            buckets.insert(
                "client_a".to_string(),
                Bucket {
                    tokens: 30.0,
                    last_refill: Instant::now() - Duration::from_secs(100),
                },
            );
        }
        limiter.allow("client_a");
        let buckets = limiter.buckets.lock().unwrap();
        assert!(buckets.get("client_a").unwrap().tokens <= 30.0);
    }

    #[test]
    fn test_independent_keys() {
        let limiter = RateLimiter::new(1.0, 1.0);
        assert_eq!(limiter.allow("a"), Decision::Allowed);
        assert_eq!(limiter.allow("b"), Decision::Allowed);
        assert!(matches!(limiter.allow("a"), Decision::Denied { .. }));
    }

    #[test]
    fn test_reset_restores_full_bucket() {
        let limiter = RateLimiter::new(1.0, 1.0);
        limiter.allow("a");
        assert!(matches!(limiter.allow("a"), Decision::Denied { .. }));
        limiter.reset("a");
        assert_eq!(limiter.allow("a"), Decision::Allowed);
    }
}
