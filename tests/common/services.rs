//! Scripted reasoning-service fakes.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use loomflow::service::{CallError, ReasoningService};
use serde_json::{Value, json};

/// Echoes the request back, counting invocations.
#[derive(Default)]
pub struct EchoService {
    pub calls: AtomicU32,
}

#[async_trait]
impl ReasoningService for EchoService {
    async fn invoke(&self, request: Value) -> Result<Value, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "echo": request }))
    }

    fn name(&self) -> &str {
        "echo"
    }
}

/// Fails retryably for the first `failures_before_success` calls, then
/// succeeds.
pub struct FlakyService {
    pub failures_before_success: u32,
    pub calls: AtomicU32,
}

impl FlakyService {
    pub fn new(failures_before_success: u32) -> Self {
        Self {
            failures_before_success,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ReasoningService for FlakyService {
    async fn invoke(&self, _request: Value) -> Result<Value, CallError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures_before_success {
            Err(CallError::retryable("upstream timeout"))
        } else {
            Ok(json!({ "ok": true }))
        }
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

/// Always fails with the configured error.
pub struct AlwaysFails {
    pub error: CallError,
    pub calls: AtomicU32,
}

impl AlwaysFails {
    pub fn retryable(message: &str) -> Self {
        Self {
            error: CallError::retryable(message),
            calls: AtomicU32::new(0),
        }
    }

    pub fn fatal(message: &str) -> Self {
        Self {
            error: CallError::fatal(message),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ReasoningService for AlwaysFails {
    async fn invoke(&self, _request: Value) -> Result<Value, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }

    fn name(&self) -> &str {
        "always-fails"
    }
}
