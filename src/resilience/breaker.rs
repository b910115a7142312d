//! Three-state circuit breaker scoped per protected dependency.
//!
//! One breaker guards one dependency and is shared by every call site
//! that talks to it. State lives behind a single mutex since transitions
//! are read-modify-write under concurrent access.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use thiserror::Error;

use crate::utils::clock::{SharedClock, system_clock};

/// Breaker state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through; consecutive failures count toward the
    /// threshold, any success resets the counter.
    Closed,
    /// Calls are rejected immediately until the reset timeout elapses.
    Open,
    /// Exactly one trial call is allowed; success closes the circuit,
    /// failure reopens it with a fresh timestamp.
    HalfOpen,
}

/// Breaker tuning.
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening.
    pub failure_threshold: u32,
    /// How long to stay open before probing.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Fast-fail rejection: the dependency is considered down and the call
/// was never attempted.
#[derive(Debug, Error, Diagnostic)]
#[error("circuit open for {dependency}; retry in {retry_after:?}")]
#[diagnostic(
    code(loomflow::resilience::circuit_open),
    help("The dependency tripped the breaker; wait for the reset timeout or fail over.")
)]
pub struct CircuitOpenError {
    pub dependency: String,
    pub retry_after: Duration,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<DateTime<Utc>>,
    /// True while the single half-open trial call is in flight.
    probe_in_flight: bool,
}

/// Circuit breaker guarding one dependency.
///
/// Call sites bracket the protected call with
/// [`try_acquire`](Self::try_acquire) and then exactly one of
/// [`record_success`](Self::record_success) /
/// [`record_failure`](Self::record_failure).
#[derive(Debug)]
pub struct CircuitBreaker {
    dependency: String,
    config: CircuitBreakerConfig,
    clock: SharedClock,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(dependency: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(dependency, config, system_clock())
    }

    /// Inject a clock (manual clocks make the open→half-open transition
    /// testable without sleeping).
    pub fn with_clock(
        dependency: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            dependency: dependency.into(),
            config,
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Name of the guarded dependency.
    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    /// Current state (as stored; open→half-open happens on acquire).
    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker poisoned").state
    }

    /// Consecutive failure count.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().expect("breaker poisoned").failure_count
    }

    /// When the breaker last opened.
    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().expect("breaker poisoned").opened_at
    }

    /// Ask permission to place a call.
    ///
    /// Closed: allowed. Open: rejected until `reset_timeout` has
    /// elapsed, at which point the breaker moves to half-open and admits
    /// exactly one trial call; concurrent callers keep being rejected
    /// until that probe reports back.
    pub fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or_else(|| self.clock.now());
                let elapsed = (self.clock.now() - opened_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    tracing::info!(dependency = %self.dependency, "circuit half-open, probing");
                    Ok(())
                } else {
                    Err(CircuitOpenError {
                        dependency: self.dependency.clone(),
                        retry_after: self.config.reset_timeout - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(CircuitOpenError {
                        dependency: self.dependency.clone(),
                        retry_after: self.config.reset_timeout,
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Give back an acquired half-open probe slot without recording an
    /// outcome (the protected call was never attempted, e.g. another
    /// guard rejected the request first).
    pub fn release(&self) {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        if inner.state == CircuitState::HalfOpen {
            tracing::info!(dependency = %self.dependency, "probe succeeded, circuit closed");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(self.clock.now());
                    tracing::warn!(
                        dependency = %self.dependency,
                        failures = inner.failure_count,
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                // Probe failed: reopen with a fresh timestamp.
                inner.state = CircuitState::Open;
                inner.opened_at = Some(self.clock.now());
                inner.probe_in_flight = false;
                tracing::warn!(dependency = %self.dependency, "probe failed, circuit reopened");
            }
            CircuitState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::ManualClock;
    use std::sync::Arc;

    fn breaker(threshold: u32, reset: Duration) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let breaker = CircuitBreaker::with_clock(
            "reasoning",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                reset_timeout: reset,
            },
            clock.clone(),
        );
        (breaker, clock)
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let (breaker, _clock) = breaker(3, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn success_resets_the_counter() {
        let (breaker, _clock) = breaker(3, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.failure_count(), 0);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_admits_exactly_one_probe() {
        let (breaker, clock) = breaker(1, Duration::from_secs(30));
        breaker.record_failure();
        assert!(breaker.try_acquire().is_err());

        clock.advance(chrono::Duration::seconds(31));
        assert!(breaker.try_acquire().is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        // Second caller is rejected while the probe is in flight.
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn probe_success_closes_probe_failure_reopens() {
        let (breaker, clock) = breaker(1, Duration::from_secs(30));
        breaker.record_failure();
        let first_opened = breaker.opened_at().unwrap();

        clock.advance(chrono::Duration::seconds(31));
        breaker.try_acquire().unwrap();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.opened_at().unwrap() > first_opened);

        clock.advance(chrono::Duration::seconds(31));
        breaker.try_acquire().unwrap();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }
}
