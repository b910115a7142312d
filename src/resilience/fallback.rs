//! Ordered fallback chain over alternative providers.

use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use serde_json::Value;
use tracing::instrument;

use crate::service::{CallError, CallErrorKind, ReasoningService};

/// The winning provider and its response.
#[derive(Debug)]
pub struct FallbackSuccess {
    pub value: Value,
    /// Name of the provider that answered.
    pub provider: String,
    /// How many providers were tried before one succeeded (1-based).
    pub attempts: u32,
}

/// Every provider failed; the error carries each one's failure, in
/// order, not just the last.
#[derive(Debug, Diagnostic)]
#[diagnostic(code(loomflow::resilience::fallback_exhausted))]
pub struct FallbackExhausted {
    pub attempts: Vec<(String, CallError)>,
}

impl std::fmt::Display for FallbackExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let summary = self
            .attempts
            .iter()
            .map(|(provider, error)| format!("{provider}: {}", error.message))
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "all {} provider(s) failed: {summary}", self.attempts.len())
    }
}

impl std::error::Error for FallbackExhausted {}

/// Ordered list of alternative providers for one logical operation.
///
/// Providers are tried in order; the first success short-circuits the
/// rest.
pub struct FallbackChain {
    providers: Vec<Arc<dyn ReasoningService>>,
}

impl FallbackChain {
    pub fn new(providers: Vec<Arc<dyn ReasoningService>>) -> Self {
        Self { providers }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Try each provider in order with the same request.
    #[instrument(skip(self, request), err)]
    pub async fn call(&self, request: Value) -> Result<FallbackSuccess, FallbackExhausted> {
        let mut attempts: Vec<(String, CallError)> = Vec::new();
        for (index, provider) in self.providers.iter().enumerate() {
            match provider.invoke(request.clone()).await {
                Ok(value) => {
                    return Ok(FallbackSuccess {
                        value,
                        provider: provider.name().to_string(),
                        attempts: index as u32 + 1,
                    });
                }
                Err(error) => {
                    tracing::debug!(
                        provider = provider.name(),
                        error = %error,
                        "provider failed, trying next"
                    );
                    attempts.push((provider.name().to_string(), error));
                }
            }
        }
        Err(FallbackExhausted { attempts })
    }
}

/// A fallback chain is itself a reasoning service, so it nests inside
/// other wrappers. The flattened error is retryable when any provider
/// failed retryably.
#[async_trait]
impl ReasoningService for FallbackChain {
    async fn invoke(&self, request: Value) -> Result<Value, CallError> {
        match self.call(request).await {
            Ok(success) => Ok(success.value),
            Err(exhausted) => {
                let any_retryable = exhausted
                    .attempts
                    .iter()
                    .any(|(_, error)| error.is_retryable());
                Err(CallError {
                    kind: if any_retryable {
                        CallErrorKind::Retryable
                    } else {
                        CallErrorKind::Fatal
                    },
                    message: exhausted.to_string(),
                })
            }
        }
    }

    fn name(&self) -> &str {
        "fallback-chain"
    }
}
