//! Fault-tolerance primitives for calls to unreliable collaborators.
//!
//! Composable wrappers, each usable on its own:
//!
//! - [`Retrier`]: capped exponential backoff with jitter, returning a
//!   structured [`RetryOutcome`] instead of throwing on exhaustion
//! - [`CircuitBreaker`]: three-state guard scoped per protected
//!   dependency, shared across call sites
//! - [`FallbackChain`]: ordered alternative providers; failure reports
//!   every provider's error
//! - [`SlidingWindowRateLimiter`]: per-key request budget over a
//!   rolling window
//! - [`ConcurrencyLimiter`]: bounded admission with an acquire timeout
//! - [`BudgetLedger`]: rolling-window spend accounting with a hard
//!   ceiling
//! - [`GuardedService`]: the canonical composition around a
//!   [`ReasoningService`](crate::service::ReasoningService)
//!
//! Exhausting retries is **not** automatically fatal: the outcome is
//! returned to the caller, which decides whether to propagate or
//! degrade.

mod breaker;
mod budget;
mod concurrency;
mod fallback;
mod guarded;
mod rate_limit;
mod retry;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, CircuitState};
pub use budget::{BudgetExceededError, BudgetLedger, BudgetStatus};
pub use concurrency::{ConcurrencyLimiter, ConcurrencyTimeoutError};
pub use fallback::{FallbackChain, FallbackExhausted, FallbackSuccess};
pub use guarded::GuardedService;
pub use rate_limit::{RateLimitedError, SlidingWindowRateLimiter};
pub use retry::{Retrier, RetryExhausted, RetryOutcome, RetryPolicy};

use miette::Diagnostic;
use thiserror::Error;

/// Union of the ways a guarded call can be refused or give up.
///
/// Every variant is distinguishable so call sites can degrade
/// differently per cause (e.g. backing off on `RateLimited` but
/// surfacing `BudgetExceeded`).
#[derive(Debug, Error, Diagnostic)]
pub enum ResilienceError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    RateLimited(#[from] RateLimitedError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    ConcurrencyTimeout(#[from] ConcurrencyTimeoutError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    BudgetExceeded(#[from] BudgetExceededError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Exhausted(#[from] RetryExhausted),
}
