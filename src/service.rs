//! Boundary contract for the external reasoning service.
//!
//! The core never interprets request or response payloads: both are
//! opaque JSON. Failures carry an explicit [`CallErrorKind`] so the
//! resilience layer can decide to re-attempt without depending on a
//! concrete error type hierarchy.

use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Classification of an external call failure.
///
/// Retryable failures (timeouts, throttling, transient provider trouble)
/// are worth re-attempting; fatal ones (bad request, auth) are not and
/// short-circuit the retry loop after the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallErrorKind {
    Retryable,
    Fatal,
}

/// A failed call to an external collaborator.
#[derive(Debug, Clone, PartialEq, Error, Diagnostic, Serialize, Deserialize)]
#[error("external call failed ({kind:?}): {message}")]
#[diagnostic(code(loomflow::service::call))]
pub struct CallError {
    pub kind: CallErrorKind,
    pub message: String,
}

impl CallError {
    /// A transient failure worth re-attempting.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: CallErrorKind::Retryable,
            message: message.into(),
        }
    }

    /// A permanent failure; retrying will not help.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: CallErrorKind::Fatal,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind == CallErrorKind::Retryable
    }
}

/// Asynchronous, fallible call into the external reasoning service.
///
/// Implementations are injected through
/// [`EngineResources`](crate::node::EngineResources) rather than reached
/// through globals, so tests can substitute deterministic fakes.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Submit an opaque request and await the opaque response.
    async fn invoke(&self, request: Value) -> Result<Value, CallError>;

    /// Stable name for diagnostics and fallback-chain reporting.
    fn name(&self) -> &str {
        "reasoning"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_classification() {
        assert!(CallError::retryable("timeout").is_retryable());
        assert!(!CallError::fatal("bad request").is_retryable());
    }

    #[test]
    fn serde_round_trip() {
        let err = CallError::retryable("throttled");
        let json = serde_json::to_string(&err).unwrap();
        let back: CallError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }
}
