//! Canonical composition of the resilience primitives around one
//! reasoning service.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::instrument;

use super::breaker::{CircuitBreaker, CircuitBreakerConfig};
use super::budget::BudgetLedger;
use super::concurrency::ConcurrencyLimiter;
use super::rate_limit::SlidingWindowRateLimiter;
use super::retry::{Retrier, RetryPolicy};
use super::ResilienceError;
use crate::service::ReasoningService;

/// A [`ReasoningService`] wrapped in the full guard stack.
///
/// Check order per call: circuit breaker (fast fail, no work wasted on a
/// known-down dependency) → rate limiter → concurrency gate → budget
/// ledger → retried invocation. Breaker state is fed by the *overall*
/// outcome of the retry loop, so one user-visible failure counts once
/// toward the threshold regardless of attempts.
///
/// Retry exhaustion propagates as [`ResilienceError::Exhausted`]; call
/// sites wanting degradation instead should use [`Retrier`] directly and
/// inspect the outcome.
pub struct GuardedService {
    inner: Arc<dyn ReasoningService>,
    dependency: String,
    breaker: CircuitBreaker,
    retrier: Retrier,
    rate_limiter: Option<Arc<SlidingWindowRateLimiter>>,
    concurrency: Option<ConcurrencyLimiter>,
    budget: Option<Arc<BudgetLedger>>,
    cost_per_call: f64,
}

impl GuardedService {
    pub fn new(inner: Arc<dyn ReasoningService>, dependency: impl Into<String>) -> Self {
        let dependency = dependency.into();
        Self {
            inner,
            breaker: CircuitBreaker::new(dependency.clone(), CircuitBreakerConfig::default()),
            dependency,
            retrier: Retrier::new(RetryPolicy::default()),
            rate_limiter: None,
            concurrency: None,
            budget: None,
            cost_per_call: 0.0,
        }
    }

    #[must_use]
    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retrier = Retrier::new(policy);
        self
    }

    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<SlidingWindowRateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, max_in_flight: usize, acquire_timeout: Duration) -> Self {
        self.concurrency = Some(ConcurrencyLimiter::new(max_in_flight, acquire_timeout));
        self
    }

    #[must_use]
    pub fn with_budget(mut self, ledger: Arc<BudgetLedger>, cost_per_call: f64) -> Self {
        self.budget = Some(ledger);
        self.cost_per_call = cost_per_call;
        self
    }

    /// The breaker guarding this dependency (shared state inspection).
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Place a guarded call.
    #[instrument(skip(self, request), fields(dependency = %self.dependency), err)]
    pub async fn invoke(&self, request: Value) -> Result<Value, ResilienceError> {
        self.breaker.try_acquire()?;

        // Any rejection past this point must hand back a half-open probe
        // slot, or the breaker would never finish probing.
        if let Some(limiter) = &self.rate_limiter
            && let Err(err) = limiter.check(&self.dependency)
        {
            self.breaker.release();
            return Err(err.into());
        }

        let _permit = match &self.concurrency {
            Some(gate) => match gate.acquire().await {
                Ok(permit) => Some(permit),
                Err(err) => {
                    self.breaker.release();
                    return Err(err.into());
                }
            },
            None => None,
        };

        if let Some(ledger) = &self.budget
            && let Err(err) = ledger.record(self.cost_per_call)
        {
            self.breaker.release();
            return Err(err.into());
        }

        let outcome = self
            .retrier
            .run(|_| self.inner.invoke(request.clone()))
            .await;

        if outcome.succeeded() {
            self.breaker.record_success();
        } else {
            self.breaker.record_failure();
        }
        Ok(outcome.into_result()?)
    }
}
