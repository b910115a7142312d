//! Retry with capped exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use miette::Diagnostic;
use rand::RngExt;
use tracing::instrument;

use crate::service::CallError;

/// Immutable retry configuration; never mutated at runtime.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry.
    pub base_delay: Duration,
    /// Cap on the computed delay (before jitter).
    pub max_delay: Duration,
    /// Upper bound of the random jitter added to each delay.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay after a failed `attempt` (1-based):
    /// `min(base * 2^(attempt-1), max) + jitter`.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let scaled = self
            .base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay);
        let capped = scaled.min(self.max_delay);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return capped;
        }
        let extra = rand::rng().random_range(0..=jitter_ms);
        capped + Duration::from_millis(extra)
    }
}

/// Structured result of a retried operation.
///
/// Never panics or throws on exhaustion; the caller inspects it and
/// chooses between propagating ([`into_result`](Self::into_result)) and
/// degrading to a fallback value.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// The successful value, if any attempt succeeded.
    pub value: Option<T>,
    /// Attempts actually made.
    pub attempts: u32,
    /// One entry per failed attempt, in order.
    pub errors: Vec<CallError>,
    /// Total time spent sleeping between attempts.
    pub total_wait: Duration,
}

impl<T> RetryOutcome<T> {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.value.is_some()
    }

    /// Propagate: the value, or a [`RetryExhausted`] carrying the full
    /// per-attempt error log.
    pub fn into_result(self) -> Result<T, RetryExhausted> {
        match self.value {
            Some(value) => Ok(value),
            None => Err(RetryExhausted {
                attempts: self.attempts,
                errors: self.errors,
            }),
        }
    }
}

/// All attempts failed (or a fatal error short-circuited the loop).
#[derive(Debug, Diagnostic)]
#[diagnostic(code(loomflow::resilience::retry_exhausted))]
pub struct RetryExhausted {
    pub attempts: u32,
    pub errors: Vec<CallError>,
}

impl RetryExhausted {
    /// The final attempt's error, if recorded.
    pub fn last(&self) -> Option<&CallError> {
        self.errors.last()
    }
}

impl std::fmt::Display for RetryExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let last = self
            .errors
            .last()
            .map(|e| e.message.as_str())
            .unwrap_or("unknown error");
        write!(f, "call failed after {} attempt(s): {last}", self.attempts)
    }
}

impl std::error::Error for RetryExhausted {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors.last().map(|e| e as &dyn std::error::Error)
    }
}

/// Executes fallible async operations under a [`RetryPolicy`].
#[derive(Clone, Debug, Default)]
pub struct Retrier {
    policy: RetryPolicy,
}

impl Retrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` up to `max_attempts` times.
    ///
    /// `op` receives the 1-based attempt number. Retryable errors back
    /// off and re-attempt; a fatal error short-circuits immediately, so
    /// a fatal first failure reports `attempts == 1`.
    #[instrument(skip(self, op))]
    pub async fn run<T, F, Fut>(&self, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let max = self.policy.max_attempts.max(1);
        let mut errors: Vec<CallError> = Vec::new();
        let mut total_wait = Duration::ZERO;

        for attempt in 1..=max {
            match op(attempt).await {
                Ok(value) => {
                    return RetryOutcome {
                        value: Some(value),
                        attempts: attempt,
                        errors,
                        total_wait,
                    };
                }
                Err(error) => {
                    let retryable = error.is_retryable();
                    tracing::debug!(
                        attempt,
                        retryable,
                        error = %error,
                        "attempt failed"
                    );
                    errors.push(error);
                    if !retryable {
                        return RetryOutcome {
                            value: None,
                            attempts: attempt,
                            errors,
                            total_wait,
                        };
                    }
                    if attempt < max {
                        let delay = self.policy.delay_for(attempt);
                        total_wait += delay;
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        RetryOutcome {
            value: None,
            attempts: max,
            errors,
            total_wait,
        }
    }
}
