use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;

use loomflow::resilience::{
    BudgetLedger, CircuitBreaker, CircuitBreakerConfig, CircuitState, FallbackChain,
    GuardedService, ResilienceError, Retrier, RetryPolicy, SlidingWindowRateLimiter,
};
use loomflow::service::{CallError, ReasoningService};
use loomflow::utils::clock::ManualClock;

mod common;
use common::*;

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_attempts,
        Duration::from_millis(1),
        Duration::from_millis(2),
    )
    .with_jitter(Duration::ZERO)
}

#[tokio::test]
async fn retry_reports_structured_outcome_on_exhaustion() {
    let service = AlwaysFails::retryable("upstream timeout");
    let retrier = Retrier::new(fast_retry(3));

    let outcome = retrier.run(|_| service.invoke(json!({}))).await;
    assert!(!outcome.succeeded());
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.errors.len(), 3);
    assert_eq!(service.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn fatal_error_stops_after_one_attempt() {
    let service = AlwaysFails::fatal("bad request");
    let retrier = Retrier::new(fast_retry(3));

    let outcome = retrier.run(|_| service.invoke(json!({}))).await;
    assert_eq!(outcome.attempts, 1);
    assert_eq!(service.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retry_recovers_from_transient_failures() {
    let service = FlakyService::new(2);
    let retrier = Retrier::new(fast_retry(5));

    let outcome = retrier.run(|_| service.invoke(json!({}))).await;
    assert!(outcome.succeeded());
    assert_eq!(outcome.attempts, 3);
}

#[tokio::test]
async fn open_breaker_rejects_without_touching_the_dependency() {
    let service = Arc::new(AlwaysFails::retryable("down"));
    let guarded = GuardedService::new(service.clone(), "reasoning")
        .with_retry(fast_retry(1))
        .with_breaker(CircuitBreaker::new(
            "reasoning",
            CircuitBreakerConfig {
                failure_threshold: 2,
                reset_timeout: Duration::from_secs(60),
            },
        ));

    // Two failing calls trip the breaker.
    assert!(guarded.invoke(json!({})).await.is_err());
    assert!(guarded.invoke(json!({})).await.is_err());
    assert_eq!(guarded.breaker().state(), CircuitState::Open);
    let calls_before = service.calls.load(Ordering::SeqCst);

    // The third is rejected fast, with no call placed.
    let err = guarded.invoke(json!({})).await.unwrap_err();
    assert!(matches!(err, ResilienceError::CircuitOpen(_)), "got: {err}");
    assert_eq!(service.calls.load(Ordering::SeqCst), calls_before);
}

#[tokio::test]
async fn half_open_probe_closes_breaker_on_success() {
    let clock = Arc::new(ManualClock::starting_now());
    let breaker = CircuitBreaker::with_clock(
        "reasoning",
        CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(30),
        },
        clock.clone(),
    );

    breaker.record_failure();
    assert!(breaker.try_acquire().is_err());

    clock.advance(chrono::Duration::seconds(31));
    breaker.try_acquire().unwrap();
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    breaker.record_success();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.failure_count(), 0);
}

#[tokio::test]
async fn fallback_chain_short_circuits_on_first_success() {
    let primary = Arc::new(AlwaysFails::retryable("primary down"));
    let secondary = Arc::new(EchoService::default());
    let tertiary = Arc::new(EchoService::default());
    let chain = FallbackChain::new(vec![
        primary.clone() as Arc<dyn ReasoningService>,
        secondary.clone(),
        tertiary.clone(),
    ]);

    let success = chain.call(json!({"q": 1})).await.unwrap();
    assert_eq!(success.provider, "echo");
    assert_eq!(success.attempts, 2);
    assert_eq!(tertiary.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn fallback_exhaustion_reports_every_providers_error() {
    let chain = FallbackChain::new(vec![
        Arc::new(AlwaysFails::retryable("a down")) as Arc<dyn ReasoningService>,
        Arc::new(AlwaysFails::fatal("b rejected")),
        Arc::new(AlwaysFails::retryable("c down")),
    ]);

    let err = chain.call(json!({})).await.unwrap_err();
    assert_eq!(err.attempts.len(), 3);
    let messages: Vec<&str> = err
        .attempts
        .iter()
        .map(|(_, e)| e.message.as_str())
        .collect();
    assert_eq!(messages, vec!["a down", "b rejected", "c down"]);
}

#[tokio::test]
async fn rate_limit_allows_five_per_minute_then_rejects() {
    let clock = Arc::new(ManualClock::starting_now());
    let limiter = Arc::new(SlidingWindowRateLimiter::with_clock(
        5,
        Duration::from_secs(60),
        clock.clone(),
    ));
    let guarded = GuardedService::new(Arc::new(EchoService::default()), "reasoning")
        .with_retry(fast_retry(1))
        .with_rate_limiter(limiter.clone());

    let mut allowed = 0;
    let mut rejected = 0;
    for _ in 0..10 {
        match guarded.invoke(json!({})).await {
            Ok(_) => allowed += 1,
            Err(ResilienceError::RateLimited(e)) => {
                assert!(e.retry_after > Duration::ZERO);
                rejected += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(allowed, 5);
    assert_eq!(rejected, 5);

    // The window rolls forward and budget returns.
    clock.advance(chrono::Duration::seconds(61));
    assert!(guarded.invoke(json!({})).await.is_ok());
}

#[tokio::test]
async fn budget_ceiling_refuses_further_spend() {
    let ledger = Arc::new(BudgetLedger::new(2.0, Duration::from_secs(3600)));
    let guarded = GuardedService::new(Arc::new(EchoService::default()), "reasoning")
        .with_retry(fast_retry(1))
        .with_budget(ledger.clone(), 1.0);

    assert!(guarded.invoke(json!({})).await.is_ok());
    assert!(guarded.invoke(json!({})).await.is_ok());
    let err = guarded.invoke(json!({})).await.unwrap_err();
    assert!(
        matches!(err, ResilienceError::BudgetExceeded(_)),
        "got: {err}"
    );
}

#[tokio::test]
async fn concurrency_gate_fails_fast_when_saturated() {
    // One slot, saturated by a slow in-flight call.
    let slow = Arc::new(SlowEcho {
        delay: Duration::from_millis(200),
    });
    let guarded = Arc::new(
        GuardedService::new(slow, "reasoning")
            .with_retry(fast_retry(1))
            .with_concurrency(1, Duration::from_millis(10)),
    );

    let busy = {
        let guarded = guarded.clone();
        tokio::spawn(async move { guarded.invoke(json!({})).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    let err = guarded.invoke(json!({})).await.unwrap_err();
    assert!(
        matches!(err, ResilienceError::ConcurrencyTimeout(_)),
        "got: {err}"
    );
    busy.await.unwrap().unwrap();
}

/// Echo that takes a while, for saturating concurrency gates.
struct SlowEcho {
    delay: Duration,
}

#[async_trait::async_trait]
impl ReasoningService for SlowEcho {
    async fn invoke(&self, request: serde_json::Value) -> Result<serde_json::Value, CallError> {
        tokio::time::sleep(self.delay).await;
        Ok(request)
    }

    fn name(&self) -> &str {
        "slow-echo"
    }
}
