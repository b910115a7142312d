//! Bounded-admission gate with an acquire timeout.

use std::sync::Arc;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A slot could not be acquired within the timeout; the request fails
/// fast instead of queuing indefinitely.
#[derive(Debug, Error, Diagnostic)]
#[error("no concurrency slot within {timeout:?}")]
#[diagnostic(code(loomflow::resilience::concurrency_timeout))]
pub struct ConcurrencyTimeoutError {
    pub timeout: Duration,
}

/// Semaphore-backed admission gate.
///
/// Holding the returned permit occupies a slot; dropping it releases
/// the slot.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    permits: Arc<Semaphore>,
    acquire_timeout: Duration,
}

impl ConcurrencyLimiter {
    pub fn new(max_in_flight: usize, acquire_timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            acquire_timeout,
        }
    }

    /// Acquire a slot or fail after the configured timeout.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, ConcurrencyTimeoutError> {
        match tokio::time::timeout(self.acquire_timeout, self.permits.clone().acquire_owned())
            .await
        {
            Ok(Ok(permit)) => Ok(permit),
            // Closed pool or elapsed timeout both mean no admission.
            Ok(Err(_)) | Err(_) => Err(ConcurrencyTimeoutError {
                timeout: self.acquire_timeout,
            }),
        }
    }

    /// Currently free slots.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
