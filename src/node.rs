//! Node execution framework.
//!
//! A node is a single unit of computation: it receives a read-only
//! [`StateSnapshot`] and an execution context, and returns either a
//! partial state update or a fan-out signal. Nodes are stateless between
//! invocations and owned by the compiled [`Workflow`](crate::workflow::Workflow).

use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::channels::errors::ErrorEvent;
use crate::control::TaskDescriptor;
use crate::event_bus::Event;
use crate::service::{CallError, ReasoningService};
use crate::state::StateSnapshot;
use crate::utils::clock::{SharedClock, system_clock};

/// Core trait for executable workflow nodes.
///
/// # Error handling
///
/// - **Fatal**: return `Err(NodeError)`; the thread fails and keeps its
///   last good checkpoint.
/// - **Recoverable**: absorb via the resilience layer and/or record an
///   [`ErrorEvent`] on the returned partial. The engine never retries a
///   node; retrying belongs at the fallible call inside it.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use loomflow::node::{Node, NodeContext, NodeError, NodeOutput, NodePartial};
/// use loomflow::state::StateSnapshot;
/// use serde_json::json;
///
/// struct Plan;
///
/// #[async_trait]
/// impl Node for Plan {
///     async fn run(&self, snapshot: StateSnapshot, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
///         ctx.emit("plan", "drafting search plan")?;
///         let topic = snapshot.field("topic").cloned().unwrap_or(json!("unknown"));
///         Ok(NodePartial::new().with_field("plan", json!({"topic": topic})).into())
///     }
///
///     fn declared_writes(&self) -> Vec<String> {
///         vec!["plan".to_string()]
///     }
/// }
/// ```
#[async_trait]
pub trait Node: Send + Sync {
    /// Execute this node against a snapshot of the current state.
    async fn run(
        &self,
        snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError>;

    /// Fields this node may write.
    ///
    /// The compiler uses the declaration to reject non-associative fields
    /// reachable from more than one branch of the same fan-out. An empty
    /// declaration means "writes nothing" for analysis purposes, so nodes
    /// that update state should declare their writes.
    fn declared_writes(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Injected collaborators available to every node.
///
/// Replaces module-level clients and global counters with an explicit
/// context object: the reasoning service and clock are handed in at
/// engine construction and travel with every call.
#[derive(Clone)]
pub struct EngineResources {
    /// External reasoning service, if the workflow uses one.
    pub reasoning: Option<Arc<dyn ReasoningService>>,
    /// Time source; swap for a manual clock in tests.
    pub clock: SharedClock,
}

impl Default for EngineResources {
    fn default() -> Self {
        Self {
            reasoning: None,
            clock: system_clock(),
        }
    }
}

impl std::fmt::Debug for EngineResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineResources")
            .field("reasoning", &self.reasoning.as_ref().map(|s| s.name()))
            .finish()
    }
}

impl EngineResources {
    pub fn with_reasoning(mut self, service: Arc<dyn ReasoningService>) -> Self {
        self.reasoning = Some(service);
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }
}

/// Execution context passed to nodes.
#[derive(Clone, Debug)]
pub struct NodeContext {
    /// Identifier of the executing node.
    pub node_id: String,
    /// Thread this execution belongs to.
    pub thread_id: String,
    /// Step number within the thread.
    pub step: u64,
    /// Channel into the engine's event bus.
    pub event_sender: flume::Sender<Event>,
    /// Injected collaborators.
    pub resources: Arc<EngineResources>,
}

impl NodeContext {
    /// Emit a node-scoped event enriched with this context's metadata.
    pub fn emit(
        &self,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), NodeContextError> {
        self.event_sender
            .send(Event::node_message_with_meta(
                self.node_id.clone(),
                self.step,
                scope,
                message,
            ))
            .map_err(|_| NodeContextError::EventBusUnavailable)
    }

    /// The injected reasoning service, or a fatal error if the workflow
    /// was built without one.
    pub fn reasoning(&self) -> Result<&Arc<dyn ReasoningService>, NodeError> {
        self.resources
            .reasoning
            .as_ref()
            .ok_or(NodeError::MissingResource {
                what: "reasoning service",
            })
    }
}

/// What a node produced: a state update or a fan-out signal.
#[derive(Clone, Debug)]
pub enum NodeOutput {
    /// Merge this partial into shared state at the barrier.
    Partial(NodePartial),
    /// Schedule these branches as a parallel wave. Requires a
    /// [`FanOutSpec`](crate::control::FanOutSpec) declared for the node.
    FanOut(Vec<TaskDescriptor>),
}

impl From<NodePartial> for NodeOutput {
    fn from(partial: NodePartial) -> Self {
        NodeOutput::Partial(partial)
    }
}

/// Partial state update returned by node execution.
///
/// All members are optional so nodes touch only what they care about;
/// the merge barrier folds field writes through each field's reducer.
#[derive(Clone, Debug, Default)]
pub struct NodePartial {
    /// Field writes, merged via each field's declared policy.
    pub fields: Option<FxHashMap<String, serde_json::Value>>,
    /// Error events to append to the thread's error log.
    pub errors: Option<Vec<ErrorEvent>>,
}

impl NodePartial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the full field map.
    #[must_use]
    pub fn with_fields(mut self, fields: FxHashMap<String, serde_json::Value>) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Add one field write.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields
            .get_or_insert_with(FxHashMap::default)
            .insert(field.into(), value);
        self
    }

    /// Attach error events.
    #[must_use]
    pub fn with_errors(mut self, errors: Vec<ErrorEvent>) -> Self {
        self.errors = Some(errors);
        self
    }

    /// True when the partial carries nothing to merge.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.as_ref().map_or(true, |f| f.is_empty())
            && self.errors.as_ref().map_or(true, |e| e.is_empty())
    }
}

/// Errors from NodeContext operations.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeContextError {
    #[error("failed to emit event: event bus unavailable")]
    #[diagnostic(
        code(loomflow::node::event_bus_unavailable),
        help("The event bus may be disconnected. Check engine shutdown ordering.")
    )]
    EventBusUnavailable,
}

/// Fatal errors halting the thread at this node.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    /// Expected input data missing from the snapshot.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(loomflow::node::missing_input),
        help("Check that an upstream node produced the required field.")
    )]
    MissingInput { what: &'static str },

    /// A required injected resource was not configured.
    #[error("missing engine resource: {what}")]
    #[diagnostic(
        code(loomflow::node::missing_resource),
        help("Configure EngineResources on the engine before running this workflow.")
    )]
    MissingResource { what: &'static str },

    /// The external call failed and the node chose to propagate.
    #[error(transparent)]
    #[diagnostic(code(loomflow::node::external))]
    External(#[from] CallError),

    /// JSON (de)serialization failed.
    #[error(transparent)]
    #[diagnostic(code(loomflow::node::serde_json))]
    Serde(#[from] serde_json::Error),

    /// Input validation failed.
    #[error("validation failed: {0}")]
    #[diagnostic(code(loomflow::node::validation))]
    ValidationFailed(String),

    /// Event bus communication failure.
    #[error("event bus error: {0}")]
    #[diagnostic(code(loomflow::node::event_bus))]
    EventBus(#[from] NodeContextError),
}
