//! GraphBuilder: fluent construction of workflow graphs.
//!
//! A graph is a node registry, static edges, routers, fan-out specs, and
//! loop guards over a declared [`StateSchema`]. Building never fails;
//! [`compile`](GraphBuilder::compile) validates everything at once.

use rustc_hash::FxHashMap;
use std::sync::Arc;

use super::edges::Router;
use crate::control::{FanOutSpec, LoopGuard};
use crate::node::Node;
use crate::runtimes::EngineConfig;
use crate::state::StateSchema;
use crate::types::NodeKind;

/// Builder for workflow graphs.
///
/// # Required configuration
///
/// - a state schema declaring every field nodes write
/// - at least one executable node
/// - an edge from `NodeKind::Start` marking the entry
/// - a path from the entry to a terminal (`End` or `GiveUp`)
///
/// `Start`, `End`, and `GiveUp` are virtual: they anchor topology but are
/// never registered or executed.
///
/// # Examples
///
/// ```
/// use loomflow::graphs::GraphBuilder;
/// use loomflow::reducers::MergePolicy;
/// use loomflow::state::StateSchema;
/// use loomflow::types::NodeKind;
/// # use loomflow::node::{Node, NodeContext, NodeError, NodeOutput, NodePartial};
/// # use loomflow::state::StateSnapshot;
/// # struct Step;
/// # #[async_trait::async_trait]
/// # impl Node for Step {
/// #     async fn run(&self, _: StateSnapshot, _: NodeContext) -> Result<NodeOutput, NodeError> {
/// #         Ok(NodePartial::default().into())
/// #     }
/// # }
///
/// let schema = StateSchema::new().field("answer", MergePolicy::Replace);
/// let workflow = GraphBuilder::new(schema)
///     .add_node(NodeKind::Custom("step".into()), Step)
///     .add_edge(NodeKind::Start, NodeKind::Custom("step".into()))
///     .add_edge(NodeKind::Custom("step".into()), NodeKind::End)
///     .compile()
///     .unwrap();
/// ```
pub struct GraphBuilder {
    /// Declared state fields and merge policies.
    pub schema: StateSchema,
    /// Registry of executable nodes keyed by identifier.
    pub nodes: FxHashMap<NodeKind, Arc<dyn Node>>,
    /// Unconditional edges defining static topology.
    pub edges: FxHashMap<NodeKind, Vec<NodeKind>>,
    /// Conditional routers, at most one per source node.
    pub routers: FxHashMap<NodeKind, Router>,
    /// Fan-out declarations, at most one per origin node.
    pub fan_outs: FxHashMap<NodeKind, FanOutSpec>,
    /// Loop guards, at most one per guarded node.
    pub guards: FxHashMap<NodeKind, LoopGuard>,
    /// Runtime configuration carried into the compiled workflow.
    pub engine_config: EngineConfig,
}

impl GraphBuilder {
    /// Create an empty builder over the given schema.
    #[must_use]
    pub fn new(schema: StateSchema) -> Self {
        Self {
            schema,
            nodes: FxHashMap::default(),
            edges: FxHashMap::default(),
            routers: FxHashMap::default(),
            fan_outs: FxHashMap::default(),
            guards: FxHashMap::default(),
            engine_config: EngineConfig::default(),
        }
    }

    /// Register a node.
    ///
    /// Attempts to register the virtual `Start`/`End`/`GiveUp` kinds are
    /// ignored with a warning; they exist only for topology.
    #[must_use]
    pub fn add_node(mut self, id: impl Into<NodeKind>, node: impl Node + 'static) -> Self {
        let id = id.into();
        if id.is_virtual() {
            tracing::warn!(?id, "ignoring registration of virtual node kind");
        } else {
            self.nodes.insert(id, Arc::new(node));
        }
        self
    }

    /// Add an unconditional edge.
    ///
    /// A node with several outgoing static edges takes the first one; use
    /// a router for real branching. (Multiple edges still matter for
    /// validation of hand-wired fallback topologies.)
    #[must_use]
    pub fn add_edge(mut self, from: impl Into<NodeKind>, to: impl Into<NodeKind>) -> Self {
        self.edges.entry(from.into()).or_default().push(to.into());
        self
    }

    /// Attach a conditional router to a node.
    ///
    /// Evaluated with the post-update state after the node runs; the
    /// returned label selects among the router's declared destinations.
    /// Replaces any previously attached router for the node.
    #[must_use]
    pub fn add_router(mut self, from: impl Into<NodeKind>, router: Router) -> Self {
        self.routers.insert(from.into(), router);
        self
    }

    /// Declare fan-out behavior for a node.
    ///
    /// The node may then return task descriptors targeting the declared
    /// branch entries; the engine joins the wave and advances to the
    /// spec's join node.
    #[must_use]
    pub fn add_fan_out(mut self, origin: impl Into<NodeKind>, spec: FanOutSpec) -> Self {
        self.fan_outs.insert(origin.into(), spec);
        self
    }

    /// Attach a loop guard to a cycle-bearing node.
    #[must_use]
    pub fn add_loop_guard(mut self, node: impl Into<NodeKind>, guard: LoopGuard) -> Self {
        self.guards.insert(node.into(), guard);
        self
    }

    /// Override runtime configuration for the compiled workflow.
    #[must_use]
    pub fn with_engine_config(mut self, engine_config: EngineConfig) -> Self {
        self.engine_config = engine_config;
        self
    }
}
