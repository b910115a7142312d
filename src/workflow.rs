//! The compiled, immutable workflow plan and its merge barrier.
//!
//! A [`Workflow`] owns the node registry, routing tables, fan-out specs,
//! loop guards, and the reducer registry built from the state schema. The
//! engine interprets it; [`apply_partials`](Workflow::apply_partials) is
//! the single place node outputs are folded into state, so merge order
//! and version accounting stay deterministic.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::instrument;

use crate::channels::Channel;
use crate::channels::errors::{ErrorEvent, ErrorScope};
use crate::control::{FanOutSpec, LoopGuard};
use crate::graphs::Router;
use crate::node::{EngineResources, Node, NodePartial};
use crate::reducers::{ReducerError, ReducerRegistry};
use crate::runtimes::engine::{EngineError, WorkflowEngine};
use crate::runtimes::EngineConfig;
use crate::state::{StateSchema, VersionedState};
use crate::types::NodeKind;

/// Executable workflow: validated topology plus merge machinery.
///
/// Produced by [`GraphBuilder::compile`](crate::graphs::GraphBuilder::compile);
/// cheap to clone and safe to share across engines.
///
/// # Examples
///
/// ```rust,no_run
/// # use loomflow::workflow::Workflow;
/// # async fn example(workflow: Workflow) -> Result<(), Box<dyn std::error::Error>> {
/// let initial = workflow.initial_state();
/// let final_state = workflow.invoke(initial).await?;
/// println!("{} errors recorded", final_state.errors.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Workflow {
    schema: Arc<StateSchema>,
    nodes: FxHashMap<NodeKind, Arc<dyn Node>>,
    edges: FxHashMap<NodeKind, Vec<NodeKind>>,
    routers: FxHashMap<NodeKind, Router>,
    fan_outs: FxHashMap<NodeKind, FanOutSpec>,
    guards: FxHashMap<NodeKind, LoopGuard>,
    reducer_registry: ReducerRegistry,
    engine_config: EngineConfig,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("schema", &self.schema)
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("edges", &self.edges)
            .field("routers", &self.routers.keys().collect::<Vec<_>>())
            .field("fan_outs", &self.fan_outs)
            .field("guards", &self.guards)
            .field("engine_config", &self.engine_config)
            .finish_non_exhaustive()
    }
}

/// Result of applying node partials at a merge barrier.
///
/// Field updates and error events are reported in a stable order so the
/// engine, checkpointers, and tests observe identical behavior across
/// runs.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// Names of fields whose content changed (versions were bumped).
    pub updated_fields: Vec<String>,
    /// Error events appended to the thread's error log, sorted.
    pub errors: Vec<ErrorEvent>,
}

impl Workflow {
    /// Internal (crate) factory keeping the plan's tables private.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        schema: Arc<StateSchema>,
        nodes: FxHashMap<NodeKind, Arc<dyn Node>>,
        edges: FxHashMap<NodeKind, Vec<NodeKind>>,
        routers: FxHashMap<NodeKind, Router>,
        fan_outs: FxHashMap<NodeKind, FanOutSpec>,
        guards: FxHashMap<NodeKind, LoopGuard>,
        reducer_registry: ReducerRegistry,
        engine_config: EngineConfig,
    ) -> Self {
        Self {
            schema,
            nodes,
            edges,
            routers,
            fan_outs,
            guards,
            reducer_registry,
            engine_config,
        }
    }

    /// The declared state schema.
    pub fn schema(&self) -> &Arc<StateSchema> {
        &self.schema
    }

    /// Registered executable nodes.
    pub fn nodes(&self) -> &FxHashMap<NodeKind, Arc<dyn Node>> {
        &self.nodes
    }

    /// Static edge table.
    pub fn edges(&self) -> &FxHashMap<NodeKind, Vec<NodeKind>> {
        &self.edges
    }

    /// Conditional routers by source node.
    pub fn routers(&self) -> &FxHashMap<NodeKind, Router> {
        &self.routers
    }

    /// Fan-out declarations by origin node.
    pub fn fan_outs(&self) -> &FxHashMap<NodeKind, FanOutSpec> {
        &self.fan_outs
    }

    /// Loop guards by guarded node.
    pub fn guards(&self) -> &FxHashMap<NodeKind, LoopGuard> {
        &self.guards
    }

    /// Runtime configuration attached at build time.
    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine_config
    }

    /// The node execution starts from (first Start edge).
    #[must_use]
    pub fn entry(&self) -> Option<NodeKind> {
        self.edges
            .get(&NodeKind::Start)
            .and_then(|targets| targets.first())
            .cloned()
    }

    /// Fresh state with every field at its schema default.
    #[must_use]
    pub fn initial_state(&self) -> VersionedState {
        VersionedState::new(self.schema.clone())
    }

    /// Run the workflow to completion on a one-off engine with default
    /// resources. For injected services, detached runs, or resumable
    /// threads, construct a [`WorkflowEngine`] directly.
    pub async fn invoke(
        &self,
        initial_state: VersionedState,
    ) -> Result<VersionedState, EngineError> {
        self.invoke_with_resources(initial_state, EngineResources::default())
            .await
    }

    /// Run the workflow to completion with explicit injected resources.
    pub async fn invoke_with_resources(
        &self,
        initial_state: VersionedState,
        resources: EngineResources,
    ) -> Result<VersionedState, EngineError> {
        let mut engine = WorkflowEngine::new(self.clone(), resources).await;
        let thread_id = self
            .engine_config
            .thread_id
            .clone()
            .unwrap_or_else(|| crate::utils::id_generator::IdGenerator::new().generate_thread_id());
        engine.create_thread(thread_id.clone(), initial_state).await?;
        engine.run_until_complete(&thread_id).await
    }

    /// Merge node outputs into state at a barrier.
    ///
    /// Partials are applied in the given order (branch completion order
    /// for a fan-out wave); within one partial, field writes land in
    /// sorted-key order. Versions bump once per field whose content
    /// changed. Error events are sorted by a stable key before being
    /// appended so downstream consumers observe identical ordering across
    /// runs.
    #[instrument(skip(self, state, partials), err)]
    pub fn apply_partials(
        &self,
        state: &mut VersionedState,
        partials: Vec<NodePartial>,
    ) -> Result<MergeOutcome, ReducerError> {
        // Capture before-state for the fields this barrier touches.
        let mut touched: FxHashSet<String> = FxHashSet::default();
        for partial in &partials {
            if let Some(fields) = &partial.fields {
                touched.extend(fields.keys().cloned());
            }
        }
        let mut before: FxHashMap<String, (serde_json::Value, u32)> = FxHashMap::default();
        for field in &touched {
            if let Some(channel) = state.field(field) {
                before.insert(field.clone(), (channel.snapshot(), channel.version()));
            }
        }

        let mut errors_all: Vec<ErrorEvent> = Vec::new();
        for partial in &partials {
            self.reducer_registry.apply(state, partial)?;
            if let Some(errors) = &partial.errors {
                errors_all.extend(errors.iter().cloned());
            }
        }

        fn scope_sort_key(scope: &ErrorScope) -> (u8, &str, u64) {
            match scope {
                ErrorScope::Node { kind, step } => (0, kind.as_str(), *step),
                ErrorScope::Branch { entry, step } => (1, entry.as_str(), *step),
                ErrorScope::Thread { thread, step } => (2, thread.as_str(), *step),
                ErrorScope::App => (3, "", 0),
            }
        }
        errors_all.sort_by(|a, b| {
            scope_sort_key(&a.scope)
                .cmp(&scope_sort_key(&b.scope))
                .then_with(|| a.when.cmp(&b.when))
                .then_with(|| a.error.message.cmp(&b.error.message))
        });

        if !errors_all.is_empty() {
            let before_version = state.errors.version();
            state.errors.get_mut().extend(errors_all.iter().cloned());
            state.errors.set_version(before_version.saturating_add(1));
        }

        // Bump versions only where content actually changed.
        let mut updated: Vec<String> = Vec::new();
        let mut touched_sorted: Vec<String> = touched.into_iter().collect();
        touched_sorted.sort();
        for field in touched_sorted {
            let Some((before_value, before_version)) = before.get(&field) else {
                continue;
            };
            let Some(channel) = state.field_mut(&field) else {
                continue;
            };
            if channel.value() != before_value {
                channel.set_version(before_version.saturating_add(1));
                tracing::debug!(
                    target: "loomflow::workflow",
                    field = %field,
                    after_version = channel.version(),
                    "field updated"
                );
                updated.push(field);
            }
        }

        Ok(MergeOutcome {
            updated_fields: updated,
            errors: errors_all,
        })
    }
}
