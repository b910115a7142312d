//! Per-key sliding-window rate limiter.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::utils::clock::{SharedClock, system_clock};

/// Request rejected by the rate limiter.
#[derive(Debug, Error, Diagnostic)]
#[error("rate limit exceeded for {key}; retry in {retry_after:?}")]
#[diagnostic(code(loomflow::resilience::rate_limited))]
pub struct RateLimitedError {
    pub key: String,
    pub retry_after: Duration,
}

/// Sliding-window counter: at most `limit` admissions per `window`,
/// tracked independently per key.
///
/// Timestamps older than the window are pruned lazily on access.
#[derive(Debug)]
pub struct SlidingWindowRateLimiter {
    limit: u32,
    window: Duration,
    clock: SharedClock,
    admissions: Mutex<FxHashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl SlidingWindowRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self::with_clock(limit, window, system_clock())
    }

    pub fn with_clock(limit: u32, window: Duration, clock: SharedClock) -> Self {
        Self {
            limit,
            window,
            clock,
            admissions: Mutex::new(FxHashMap::default()),
        }
    }

    fn prune(&self, timestamps: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
        let window = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::zero());
        while let Some(front) = timestamps.front() {
            if now - *front >= window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Admit a request if the key has budget; admission is recorded.
    pub fn allow(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut admissions = self.admissions.lock().expect("admissions poisoned");
        let timestamps = admissions.entry(key.to_string()).or_default();
        self.prune(timestamps, now);
        if (timestamps.len() as u32) < self.limit {
            timestamps.push_back(now);
            true
        } else {
            false
        }
    }

    /// How long until the key has budget again. Zero when a request
    /// would be admitted right now.
    pub fn retry_after(&self, key: &str) -> Duration {
        let now = self.clock.now();
        let mut admissions = self.admissions.lock().expect("admissions poisoned");
        let timestamps = admissions.entry(key.to_string()).or_default();
        self.prune(timestamps, now);
        if (timestamps.len() as u32) < self.limit {
            return Duration::ZERO;
        }
        let window = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::zero());
        timestamps
            .front()
            .map(|oldest| {
                let free_at = *oldest + window;
                (free_at - now).to_std().unwrap_or(Duration::ZERO)
            })
            .unwrap_or(Duration::ZERO)
    }

    /// Combined check: admit or report a positive `retry_after`.
    pub fn check(&self, key: &str) -> Result<(), RateLimitedError> {
        if self.allow(key) {
            Ok(())
        } else {
            Err(RateLimitedError {
                key: key.to_string(),
                retry_after: self.retry_after(key),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::ManualClock;
    use std::sync::Arc;

    #[test]
    fn admits_up_to_limit_then_rejects() {
        let clock = Arc::new(ManualClock::starting_now());
        let limiter =
            SlidingWindowRateLimiter::with_clock(5, Duration::from_secs(60), clock.clone());

        for _ in 0..5 {
            assert!(limiter.allow("svc"));
        }
        for _ in 0..5 {
            assert!(!limiter.allow("svc"));
        }
        assert!(limiter.retry_after("svc") > Duration::ZERO);
    }

    #[test]
    fn window_rolls_forward() {
        let clock = Arc::new(ManualClock::starting_now());
        let limiter =
            SlidingWindowRateLimiter::with_clock(2, Duration::from_secs(60), clock.clone());

        assert!(limiter.allow("svc"));
        assert!(limiter.allow("svc"));
        assert!(!limiter.allow("svc"));

        clock.advance(chrono::Duration::seconds(61));
        assert!(limiter.allow("svc"));
        assert_eq!(limiter.retry_after("svc"), Duration::ZERO);
    }

    #[test]
    fn keys_are_independent() {
        let limiter = SlidingWindowRateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.allow("a"));
        assert!(limiter.allow("b"));
        assert!(!limiter.allow("a"));
    }
}
