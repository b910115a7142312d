//! Test node implementations.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use loomflow::control::TaskDescriptor;
use loomflow::node::{Node, NodeContext, NodeError, NodeOutput, NodePartial};
use loomflow::state::StateSnapshot;
use serde_json::{Value, json};

/// Writes a fixed set of fields and nothing else.
pub struct WriteFields {
    pub fields: Vec<(String, Value)>,
}

impl WriteFields {
    pub fn one(field: &str, value: Value) -> Self {
        Self {
            fields: vec![(field.to_string(), value)],
        }
    }
}

#[async_trait]
impl Node for WriteFields {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let mut partial = NodePartial::new();
        for (field, value) in &self.fields {
            partial = partial.with_field(field.clone(), value.clone());
        }
        Ok(partial.into())
    }

    fn declared_writes(&self) -> Vec<String> {
        self.fields.iter().map(|(field, _)| field.clone()).collect()
    }
}

/// Appends its tag to the `trace` field.
pub struct TraceNode {
    pub tag: &'static str,
}

#[async_trait]
impl Node for TraceNode {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        Ok(NodePartial::new()
            .with_field("trace", json!(self.tag))
            .into())
    }

    fn declared_writes(&self) -> Vec<String> {
        vec!["trace".to_string()]
    }
}

/// Emits a fixed fan-out wave.
pub struct FanOutFixed {
    pub descriptors: Vec<TaskDescriptor>,
}

#[async_trait]
impl Node for FanOutFixed {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::FanOut(self.descriptors.clone()))
    }
}

/// Branch worker for fan-out tests.
///
/// Reads its branch-scoped `task` field; a task of `"boom"` fails
/// fatally, anything else lands in `results` and bumps `success_count`.
pub struct SearchBranch;

#[async_trait]
impl Node for SearchBranch {
    async fn run(
        &self,
        snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let task = snapshot.field("task").cloned().unwrap_or(Value::Null);
        if task == json!("boom") {
            return Err(NodeError::ValidationFailed(
                "search backend exploded".to_string(),
            ));
        }
        ctx.emit("search", format!("found result for {task}"))?;
        Ok(NodePartial::new()
            .with_field("results", json!([task]))
            .with_field("success_count", json!(1))
            .into())
    }

    fn declared_writes(&self) -> Vec<String> {
        vec!["results".to_string(), "success_count".to_string()]
    }
}

/// Branch worker that sleeps long enough to trip a wave timeout.
pub struct SlowBranch {
    pub sleep: Duration,
}

#[async_trait]
impl Node for SlowBranch {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        tokio::time::sleep(self.sleep).await;
        Ok(NodePartial::new().with_field("results", json!(["slow"])).into())
    }

    fn declared_writes(&self) -> Vec<String> {
        vec!["results".to_string()]
    }
}

/// Does nothing; used for self-loop and routing topologies. Counts how
/// many times it actually ran.
pub struct SpinNode {
    pub runs: Arc<AtomicU32>,
}

impl SpinNode {
    pub fn new() -> (Self, Arc<AtomicU32>) {
        let runs = Arc::new(AtomicU32::new(0));
        (Self { runs: runs.clone() }, runs)
    }
}

#[async_trait]
impl Node for SpinNode {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(NodePartial::default().into())
    }
}

/// Calls the injected reasoning service through a retrier and degrades
/// on exhaustion instead of failing the thread.
pub struct AskModel {
    pub retry: loomflow::resilience::RetryPolicy,
}

#[async_trait]
impl Node for AskModel {
    async fn run(
        &self,
        snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let service = ctx.reasoning()?.clone();
        let request = json!({ "topic": snapshot.field("topic").cloned().unwrap_or(Value::Null) });
        let retrier = loomflow::resilience::Retrier::new(self.retry.clone());
        let outcome = retrier.run(|_| service.invoke(request.clone())).await;

        let mut partial = NodePartial::new();
        match outcome.value {
            Some(response) => {
                partial = partial.with_field("summary", response);
            }
            None => {
                let fault = loomflow::channels::errors::Fault::msg(format!(
                    "reasoning exhausted after {} attempts",
                    outcome.attempts
                ));
                partial = partial
                    .with_field("summary", json!("unavailable"))
                    .with_errors(vec![loomflow::channels::errors::ErrorEvent::node(
                        ctx.node_id.clone(),
                        ctx.step,
                        fault,
                    )]);
            }
        }
        Ok(partial.into())
    }

    fn declared_writes(&self) -> Vec<String> {
        vec!["summary".to_string()]
    }
}

/// Always fails fatally.
pub struct ExplodingNode;

#[async_trait]
impl Node for ExplodingNode {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        Err(NodeError::ValidationFailed("kaboom".to_string()))
    }
}
