//! # Rate Limiter
//!
//! Sliding-window request budget, keyed by device id.
//!
//! Edge firmware in a crash loop can hammer the hub with polls; the
//! limiter sheds that load before any credential work happens. In-memory
//! on purpose - losing the counters on restart just resets the budget,
//! which is harmless.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sliding-window rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    requests: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Creates a limiter allowing `max_requests` per `window` per key.
    pub fn new(max_requests: usize, window: Duration) -> Self {
        RateLimiter {
            max_requests,
            window,
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Records a request and answers whether it is within budget.
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut requests = match self.requests.lock() {
            Ok(guard) => guard,
            // A poisoned lock means a panic elsewhere; failing open keeps
            // the fleet reachable
            Err(poisoned) => poisoned.into_inner(),
        };

        let bucket = requests.entry(key.to_string()).or_default();

        // Drop entries that slid out of the window
        while let Some(front) = bucket.front() {
            if now.duration_since(*front) > self.window {
                bucket.pop_front();
            } else {
                break;
            }
        }

        if bucket.len() < self.max_requests {
            bucket.push_back(now);
            true
        } else {
            false
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_enforced_per_key() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));

        assert!(limiter.check("esp001"));
        assert!(limiter.check("esp001"));
        assert!(limiter.check("esp001"));
        assert!(!limiter.check("esp001"));

        // A different device has its own budget
        assert!(limiter.check("esp002"));
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));

        assert!(limiter.check("esp001"));
        assert!(!limiter.check("esp001"));

        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check("esp001"));
    }
}
