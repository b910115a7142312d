//! The workflow engine: a per-thread interpreter over a compiled
//! [`Workflow`].
//!
//! Each thread runs sequentially: one node at a time against a read-only
//! snapshot, updates folded in at the merge barrier, routing decided on
//! the post-update state. The exception is a fan-out wave, where branches
//! run in parallel on a bounded [`JoinSet`] and their updates merge into
//! shared state *as each branch completes*, so partial progress is
//! observable before the join. A checkpoint is persisted after every
//! step; threads resume from their latest checkpoint on creation.

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::json;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::instrument;

use crate::channels::Channel;
use crate::channels::errors::{ErrorEvent, Fault};
use crate::control::{FanOutSpec, JoinPolicy, TaskDescriptor};
use crate::event_bus::{Event, EventBus, STREAM_END_SCOPE};
use crate::node::{EngineResources, NodeContext, NodeError, NodeOutput, NodePartial};
use crate::reducers::ReducerError;
use crate::runtimes::checkpointer::{
    Checkpoint, Checkpointer, CheckpointerError, InMemoryCheckpointer,
};
use crate::runtimes::persistence::PortableThread;
use crate::runtimes::retention::RetentionPolicy;
use crate::runtimes::runtime_config::CheckpointerType;
use crate::runtimes::types::ThreadStatus;
use crate::state::VersionedState;
use crate::types::NodeKind;
use crate::workflow::Workflow;

/// In-memory execution state of one thread.
#[derive(Debug, Clone)]
pub struct ThreadState {
    pub state: VersionedState,
    /// Steps executed so far.
    pub step: u64,
    /// Node the engine will run next.
    pub next_node: NodeKind,
    pub status: ThreadStatus,
}

/// How a thread was initialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadInit {
    Fresh,
    Resumed { checkpoint_sequence: u64 },
}

/// Result of executing one step.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub step: u64,
    /// Node that ran; `None` when the step only finalized a terminal.
    pub ran_node: Option<NodeKind>,
    /// Where the thread goes next.
    pub next_node: NodeKind,
    /// Whether the thread has reached a terminal.
    pub completed: bool,
}

/// Errors raised by the engine.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("thread not found: {thread_id}")]
    #[diagnostic(code(loomflow::engine::thread_not_found))]
    ThreadNotFound { thread_id: String },

    #[error("no edge leaves Start; nothing to run")]
    #[diagnostic(code(loomflow::engine::no_entry))]
    NoEntryNode,

    #[error("frontier references unregistered node {node}")]
    #[diagnostic(code(loomflow::engine::unknown_node))]
    UnknownNode { node: String },

    /// Unreachable for graphs that compiled cleanly, but routers are
    /// arbitrary functions and may return labels outside their declared
    /// set.
    #[error("router on {node} returned unmapped label {label:?}")]
    #[diagnostic(code(loomflow::engine::routing))]
    Routing { node: String, label: String },

    #[error("node {node} failed")]
    #[diagnostic(code(loomflow::engine::node_failed))]
    NodeFailed {
        node: String,
        #[source]
        source: NodeError,
    },

    #[error("node {node} returned task descriptors but declares no fan-out")]
    #[diagnostic(
        code(loomflow::engine::fan_out_undeclared),
        help("Declare the wave with GraphBuilder::add_fan_out.")
    )]
    FanOutUndeclared { node: String },

    #[error("descriptor targets {entry}, not a declared branch entry of fan-out {origin}")]
    #[diagnostic(code(loomflow::engine::unknown_branch_entry))]
    UnknownBranchEntry { origin: String, entry: String },

    #[error("branch {entry} of fan-out {origin} failed: {message}")]
    #[diagnostic(code(loomflow::engine::branch_failed))]
    BranchFailed {
        origin: String,
        entry: String,
        message: String,
    },

    #[error("fan-out wave at {origin} exceeded its timeout; outstanding branches cancelled")]
    #[diagnostic(code(loomflow::engine::wave_timeout))]
    WaveTimeout { origin: String },

    #[error("no checkpointer configured")]
    #[diagnostic(code(loomflow::engine::no_checkpointer))]
    NoCheckpointer,

    #[error(transparent)]
    #[diagnostic(code(loomflow::engine::reducer))]
    Reducer(#[from] ReducerError),

    #[error(transparent)]
    #[diagnostic(code(loomflow::engine::checkpointer))]
    Checkpointer(#[from] CheckpointerError),

    #[error("workflow task join error: {0}")]
    #[diagnostic(code(loomflow::engine::join))]
    Join(#[from] JoinError),
}

struct BranchSuccess {
    entry: String,
    partials: Vec<NodePartial>,
}

struct BranchFailure {
    entry: String,
    label: Option<String>,
    message: String,
}

/// Handle for a detached workflow run.
///
/// Dropping the handle leaves the task running; [`abort`](Self::abort)
/// force-cancels it (the thread's last persisted checkpoint survives).
pub struct ThreadHandle {
    thread_id: String,
    join_handle: Option<JoinHandle<Result<VersionedState, EngineError>>>,
}

impl ThreadHandle {
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Force-cancel the run.
    pub fn abort(&self) {
        if let Some(handle) = &self.join_handle {
            handle.abort();
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join_handle
            .as_ref()
            .map(|h| h.is_finished())
            .unwrap_or(true)
    }

    /// Await the run's outcome.
    pub async fn join(mut self) -> Result<VersionedState, EngineError> {
        let handle = self
            .join_handle
            .take()
            .expect("join_handle already awaited");
        match handle.await {
            Ok(result) => result,
            Err(err) => Err(EngineError::Join(err)),
        }
    }
}

/// Runtime engine for workflow threads.
///
/// Separation of concerns mirrors the plan/runtime split: [`Workflow`] is
/// the immutable graph, `WorkflowEngine` owns sessions, checkpointing,
/// events, and the branch concurrency pool. One workflow can back many
/// engines.
pub struct WorkflowEngine {
    workflow: Arc<Workflow>,
    resources: Arc<EngineResources>,
    threads: FxHashMap<String, ThreadState>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    autosave: bool,
    event_bus: EventBus,
    branch_permits: Arc<Semaphore>,
}

impl WorkflowEngine {
    /// Build an engine from the workflow's attached configuration.
    pub async fn new(workflow: Workflow, resources: EngineResources) -> Self {
        let config = workflow.engine_config().clone();
        let event_bus = config.event_bus.build_event_bus();
        Self::with_options(
            workflow,
            resources,
            config.checkpointer.clone(),
            true,
            event_bus,
            true,
        )
        .await
    }

    /// Build an engine with explicit checkpointer, autosave, and bus.
    pub async fn with_options(
        workflow: Workflow,
        resources: EngineResources,
        checkpointer_type: Option<CheckpointerType>,
        autosave: bool,
        event_bus: EventBus,
        start_listener: bool,
    ) -> Self {
        let workflow = Arc::new(workflow);
        let checkpointer = Self::create_checkpointer(&workflow, checkpointer_type).await;
        if start_listener {
            event_bus.listen_for_events();
        }
        let limit = workflow.engine_config().concurrency_limit.max(1);
        Self {
            workflow,
            resources: Arc::new(resources),
            threads: FxHashMap::default(),
            checkpointer,
            autosave,
            event_bus,
            branch_permits: Arc::new(Semaphore::new(limit)),
        }
    }

    async fn create_checkpointer(
        workflow: &Arc<Workflow>,
        checkpointer_type: Option<CheckpointerType>,
    ) -> Option<Arc<dyn Checkpointer>> {
        match checkpointer_type {
            None => None,
            Some(CheckpointerType::InMemory) => Some(Arc::new(InMemoryCheckpointer::new())),
            #[cfg(feature = "sqlite")]
            Some(CheckpointerType::Sqlite) => {
                let db_url = std::env::var("LOOMFLOW_SQLITE_URL").ok().unwrap_or_else(|| {
                    let name = workflow
                        .engine_config()
                        .sqlite_db_name
                        .clone()
                        .unwrap_or_else(|| "loomflow.db".to_string());
                    format!("sqlite://{name}")
                });
                match crate::runtimes::SqliteCheckpointer::connect(
                    &db_url,
                    workflow.schema().clone(),
                )
                .await
                {
                    Ok(cp) => Some(Arc::new(cp) as Arc<dyn Checkpointer>),
                    Err(e) => {
                        tracing::error!(
                            url = %db_url,
                            error = %e,
                            "SqliteCheckpointer initialization failed"
                        );
                        None
                    }
                }
            }
        }
    }

    /// Run a thread to completion on a dedicated engine task.
    ///
    /// The returned handle is the administrative cancel point: aborting
    /// it stops the run while the thread's last checkpoint survives in
    /// any durable store.
    pub fn spawn_run(
        workflow: Workflow,
        resources: EngineResources,
        thread_id: String,
        initial_state: VersionedState,
    ) -> ThreadHandle {
        let id = thread_id.clone();
        let join_handle = tokio::spawn(async move {
            let mut engine = WorkflowEngine::new(workflow, resources).await;
            engine.create_thread(id.clone(), initial_state).await?;
            engine.run_until_complete(&id).await
        });
        ThreadHandle {
            thread_id,
            join_handle: Some(join_handle),
        }
    }

    /// Create a thread, resuming from its latest checkpoint when one
    /// exists. Corrupt snapshots surface as
    /// [`CheckpointerError::Corruption`]; they never silently fall back
    /// to a fresh thread.
    #[instrument(skip(self, initial_state), err)]
    pub async fn create_thread(
        &mut self,
        thread_id: String,
        initial_state: VersionedState,
    ) -> Result<ThreadInit, EngineError> {
        if let Some(cp) = &self.checkpointer
            && let Some(stored) = cp.load_latest(&thread_id).await?
        {
            let sequence = stored.sequence;
            tracing::info!(
                thread = %thread_id,
                sequence,
                step = stored.step,
                "resuming thread from checkpoint"
            );
            self.threads.insert(
                thread_id,
                ThreadState {
                    state: stored.state,
                    step: stored.step,
                    next_node: stored.next_node,
                    status: stored.status,
                },
            );
            return Ok(ThreadInit::Resumed {
                checkpoint_sequence: sequence,
            });
        }

        let entry = self.workflow.entry().ok_or(EngineError::NoEntryNode)?;
        let thread = ThreadState {
            state: initial_state,
            step: 0,
            next_node: entry,
            status: ThreadStatus::Running,
        };
        self.threads.insert(thread_id.clone(), thread);
        self.maybe_checkpoint(&thread_id).await;
        Ok(ThreadInit::Fresh)
    }

    /// Execute one step of a thread.
    #[instrument(skip(self), err)]
    pub async fn run_step(&mut self, thread_id: &str) -> Result<StepReport, EngineError> {
        // Terminal frontiers only need their status finalized.
        {
            let thread = self
                .threads
                .get(thread_id)
                .ok_or_else(|| EngineError::ThreadNotFound {
                    thread_id: thread_id.to_string(),
                })?;
            if thread.next_node.is_terminal() {
                return self.finalize_terminal(thread_id).await;
            }
        }

        // Take ownership for the duration of the step.
        let mut thread = self
            .threads
            .remove(thread_id)
            .expect("thread exists after lookup");

        match self.execute_step(thread_id, &mut thread).await {
            Ok(report) => {
                self.threads.insert(thread_id.to_string(), thread);
                self.maybe_checkpoint(thread_id).await;
                Ok(report)
            }
            Err(err) => {
                // Record the fault on the thread's error log, preserve the
                // last good checkpoint, and report FAILED.
                let event = ErrorEvent::thread(
                    thread_id.to_string(),
                    thread.step,
                    Fault::msg(err.to_string()),
                )
                .with_context(json!({ "node": thread.next_node.encode() }));
                let partial = NodePartial::new().with_errors(vec![event]);
                let _ = self.workflow.apply_partials(&mut thread.state, vec![partial]);
                thread.status = ThreadStatus::Failed;
                self.threads.insert(thread_id.to_string(), thread);
                self.maybe_checkpoint(thread_id).await;
                Err(err)
            }
        }
    }

    async fn finalize_terminal(&mut self, thread_id: &str) -> Result<StepReport, EngineError> {
        let thread = self
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| EngineError::ThreadNotFound {
                thread_id: thread_id.to_string(),
            })?;
        let terminal = thread.next_node.clone();
        let was_terminal = thread.status.is_terminal();
        thread.status = match (&terminal, thread.status) {
            (_, ThreadStatus::Failed) => ThreadStatus::Failed,
            (NodeKind::GiveUp, _) => ThreadStatus::GaveUp,
            _ => ThreadStatus::Completed,
        };
        let step = thread.step;
        if !was_terminal {
            self.maybe_checkpoint(thread_id).await;
        }
        Ok(StepReport {
            step,
            ran_node: None,
            next_node: terminal,
            completed: true,
        })
    }

    async fn execute_step(
        &self,
        thread_id: &str,
        thread: &mut ThreadState,
    ) -> Result<StepReport, EngineError> {
        thread.step += 1;
        let step = thread.step;
        let kind = thread.next_node.clone();

        let node = self
            .workflow
            .nodes()
            .get(&kind)
            .cloned()
            .ok_or_else(|| EngineError::UnknownNode { node: kind.encode() })?;

        tracing::debug!(thread = %thread_id, step, node = %kind, "running node");

        let ctx = NodeContext {
            node_id: kind.to_string(),
            thread_id: thread_id.to_string(),
            step,
            event_sender: self.event_bus.get_sender(),
            resources: self.resources.clone(),
        };
        let snapshot = thread.state.snapshot();

        // Nodes suspend on the external collaborator; reflect that in the
        // thread status while the call is in flight.
        thread.status = ThreadStatus::AwaitingExternal;
        let output = node
            .run(snapshot, ctx)
            .await
            .map_err(|source| EngineError::NodeFailed {
                node: kind.encode(),
                source,
            })?;
        thread.status = ThreadStatus::Running;

        let mut wave_join: Option<NodeKind> = None;
        match output {
            NodeOutput::Partial(partial) => {
                self.workflow
                    .apply_partials(&mut thread.state, vec![partial])?;
            }
            NodeOutput::FanOut(descriptors) => {
                let spec = self
                    .workflow
                    .fan_outs()
                    .get(&kind)
                    .cloned()
                    .ok_or_else(|| EngineError::FanOutUndeclared { node: kind.encode() })?;
                thread.status = ThreadStatus::ParallelJoin;
                self.run_wave(thread_id, step, &kind, &spec, descriptors, &mut thread.state)
                    .await?;
                thread.status = ThreadStatus::Running;
                wave_join = Some(spec.join);
            }
        }

        // Loop guard: increment the counter, trip to the give-up target
        // once the budget is exhausted. Tripping is not an error; the
        // thread ends at the give-up terminal with GaveUp status.
        let mut give_up: Option<NodeKind> = None;
        if let Some(guard) = self.workflow.guards().get(&kind) {
            let increment =
                NodePartial::new().with_field(guard.counter_field.clone(), json!(1));
            self.workflow
                .apply_partials(&mut thread.state, vec![increment])?;
            let iterations = thread
                .state
                .field(&guard.counter_field)
                .map(|ch| ch.value().as_i64().unwrap_or(0))
                .unwrap_or(0);
            if iterations >= guard.max_iterations as i64 {
                let _ = self.event_bus.get_sender().send(Event::diagnostic(
                    "loop_guard",
                    format!(
                        "thread={thread_id} node={kind} iterations={iterations} budget \
                         exhausted, routing to {}",
                        guard.give_up
                    ),
                ));
                give_up = Some(guard.give_up.clone());
            }
        }

        let next = if let Some(target) = give_up {
            target
        } else if let Some(join) = wave_join {
            join
        } else {
            self.route_from(&kind, &thread.state)?
        };

        thread.next_node = next.clone();
        Ok(StepReport {
            step,
            ran_node: Some(kind),
            next_node: next.clone(),
            completed: next.is_terminal(),
        })
    }

    /// Resolve the next node after `kind` using its router (evaluated on
    /// the post-update state) or its first static edge. A node with no
    /// outgoing route completes the thread.
    fn route_from(
        &self,
        kind: &NodeKind,
        state: &VersionedState,
    ) -> Result<NodeKind, EngineError> {
        if let Some(router) = self.workflow.routers().get(kind) {
            let snapshot = state.snapshot();
            let label = router.decide(&snapshot);
            return router
                .resolve(&label)
                .cloned()
                .ok_or_else(|| EngineError::Routing {
                    node: kind.encode(),
                    label,
                });
        }
        if let Some(target) = self
            .workflow
            .edges()
            .get(kind)
            .and_then(|targets| targets.first())
        {
            return Ok(target.clone());
        }
        Ok(NodeKind::End)
    }

    /// Run one fan-out wave: schedule every descriptor as a branch task
    /// under the global concurrency cap, merge each branch's updates into
    /// shared state as it completes, and enforce the join policy.
    #[instrument(skip(self, spec, descriptors, state), err)]
    async fn run_wave(
        &self,
        thread_id: &str,
        step: u64,
        origin: &NodeKind,
        spec: &FanOutSpec,
        descriptors: Vec<TaskDescriptor>,
        state: &mut VersionedState,
    ) -> Result<(), EngineError> {
        for descriptor in &descriptors {
            if !spec.branch_entries.contains(&descriptor.entry) {
                return Err(EngineError::UnknownBranchEntry {
                    origin: origin.encode(),
                    entry: descriptor.entry.encode(),
                });
            }
        }

        tracing::debug!(
            thread = %thread_id,
            step,
            origin = %origin,
            branches = descriptors.len(),
            policy = ?spec.policy,
            "starting fan-out wave"
        );

        let wave_base = state.clone();
        let mut join_set: JoinSet<Result<BranchSuccess, BranchFailure>> = JoinSet::new();
        for descriptor in descriptors {
            let workflow = self.workflow.clone();
            let resources = self.resources.clone();
            let sender = self.event_bus.get_sender();
            let permits = self.branch_permits.clone();
            let thread_id = thread_id.to_string();
            let join_node = spec.join.clone();
            let base = wave_base.clone();
            join_set.spawn(async move {
                let _permit =
                    permits
                        .acquire_owned()
                        .await
                        .map_err(|_| BranchFailure {
                            entry: descriptor.entry.encode(),
                            label: descriptor.label.clone(),
                            message: "branch permit pool closed".to_string(),
                        })?;
                run_branch(
                    workflow, resources, sender, thread_id, step, base, descriptor, join_node,
                )
                .await
            });
        }

        let deadline = self
            .workflow
            .engine_config()
            .wave_timeout
            .map(|t| tokio::time::Instant::now() + t);

        loop {
            let joined = match deadline {
                Some(at) => match tokio::time::timeout_at(at, join_set.join_next()).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        // Outstanding branches are cancelled; their
                        // unapplied updates are discarded, not partially
                        // merged.
                        join_set.abort_all();
                        return Err(EngineError::WaveTimeout {
                            origin: origin.encode(),
                        });
                    }
                },
                None => join_set.join_next().await,
            };
            let Some(joined) = joined else { break };

            match joined {
                Ok(Ok(success)) => {
                    // Merge immediately so monitoring sees partial
                    // progress before the join runs.
                    self.workflow.apply_partials(state, success.partials)?;
                    let _ = self.event_bus.get_sender().send(Event::diagnostic(
                        "fan_out",
                        format!("thread={thread_id} branch={} completed", success.entry),
                    ));
                }
                Ok(Err(failure)) => match spec.policy {
                    JoinPolicy::FailFast => {
                        join_set.abort_all();
                        return Err(EngineError::BranchFailed {
                            origin: origin.encode(),
                            entry: failure.entry,
                            message: failure.message,
                        });
                    }
                    JoinPolicy::DegradeContinue => {
                        let event = ErrorEvent::branch(
                            failure.entry.clone(),
                            step,
                            Fault::msg(failure.message.clone()),
                        )
                        .with_context(json!({ "label": failure.label }));
                        let partial = NodePartial::new().with_errors(vec![event]);
                        self.workflow.apply_partials(state, vec![partial])?;
                        let _ = self.event_bus.get_sender().send(Event::diagnostic(
                            "fan_out",
                            format!(
                                "thread={thread_id} branch={} failed, continuing: {}",
                                failure.entry, failure.message
                            ),
                        ));
                    }
                },
                Err(join_err) => {
                    if join_err.is_cancelled() {
                        continue;
                    }
                    return Err(EngineError::Join(join_err));
                }
            }
        }

        Ok(())
    }

    /// Run until the thread reaches a terminal.
    #[instrument(skip(self), err)]
    pub async fn run_until_complete(
        &mut self,
        thread_id: &str,
    ) -> Result<VersionedState, EngineError> {
        tracing::info!(thread = %thread_id, "workflow run started");

        loop {
            let report = match self.run_step(thread_id).await {
                Ok(report) => report,
                Err(err) => {
                    self.finalize_event_stream(thread_id, Some(&err));
                    return Err(err);
                }
            };
            // The terminal-finalizing step (ran_node: None) settles the
            // thread's final status; only then is the run over.
            if report.completed && report.ran_node.is_none() {
                break;
            }
        }

        let thread = self
            .threads
            .get(thread_id)
            .ok_or_else(|| EngineError::ThreadNotFound {
                thread_id: thread_id.to_string(),
            })?;
        tracing::info!(
            thread = %thread_id,
            step = thread.step,
            status = %thread.status,
            errors = thread.state.errors.len(),
            "workflow run finished"
        );
        let final_state = thread.state.clone();
        self.finalize_event_stream(thread_id, None);
        Ok(final_state)
    }

    fn finalize_event_stream(&self, thread_id: &str, error: Option<&EngineError>) {
        let status = self
            .threads
            .get(thread_id)
            .map(|t| t.status.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let message = match error {
            Some(err) => format!("thread={thread_id} status={status} error={err}"),
            None => format!("thread={thread_id} status={status}"),
        };
        let _ = self
            .event_bus
            .get_sender()
            .send(Event::diagnostic(STREAM_END_SCOPE, message));
    }

    async fn maybe_checkpoint(&self, thread_id: &str) {
        if !self.autosave {
            return;
        }
        let (Some(cp), Some(thread)) = (&self.checkpointer, self.threads.get(thread_id)) else {
            return;
        };
        let config = self.workflow.engine_config();
        let draft = Checkpoint::draft(
            thread_id,
            thread.state.clone(),
            thread.next_node.clone(),
            thread.status,
            thread.step,
        )
        .with_importance(config.checkpoint_importance)
        .with_owner(config.owner.clone());
        if let Err(e) = cp.save(draft).await {
            tracing::warn!(thread = %thread_id, error = %e, "checkpoint save failed");
        }
    }

    // ------------------------------------------------------------------
    // Administrative surface
    // ------------------------------------------------------------------

    /// Lifecycle status of an in-memory thread.
    #[must_use]
    pub fn thread_status(&self, thread_id: &str) -> Option<ThreadStatus> {
        self.threads.get(thread_id).map(|t| t.status)
    }

    /// Full in-memory state of a thread.
    #[must_use]
    pub fn get_thread(&self, thread_id: &str) -> Option<&ThreadState> {
        self.threads.get(thread_id)
    }

    /// Ids of all in-memory threads.
    #[must_use]
    pub fn list_threads(&self) -> Vec<&String> {
        self.threads.keys().collect()
    }

    /// The configured checkpoint store, if any.
    #[must_use]
    pub fn checkpointer(&self) -> Option<&Arc<dyn Checkpointer>> {
        self.checkpointer.as_ref()
    }

    /// Ordered checkpoint history of a thread.
    pub async fn checkpoints(&self, thread_id: &str) -> Result<Vec<Checkpoint>, EngineError> {
        let cp = self.checkpointer.as_ref().ok_or(EngineError::NoCheckpointer)?;
        Ok(cp.list(thread_id).await?)
    }

    /// Apply a retention policy; returns removed checkpoint count.
    pub async fn prune_checkpoints(
        &self,
        policy: &RetentionPolicy,
    ) -> Result<u64, EngineError> {
        let cp = self.checkpointer.as_ref().ok_or(EngineError::NoCheckpointer)?;
        Ok(cp.prune(policy).await?)
    }

    /// Copy a thread's latest snapshot under a new id with provenance.
    pub async fn fork_thread(
        &mut self,
        thread_id: &str,
        new_thread_id: &str,
    ) -> Result<(), EngineError> {
        let cp = self.checkpointer.as_ref().ok_or(EngineError::NoCheckpointer)?;
        let forked = cp.fork(thread_id, new_thread_id).await?;
        self.threads.insert(
            new_thread_id.to_string(),
            ThreadState {
                state: forked.state,
                step: forked.step,
                next_node: forked.next_node,
                status: forked.status,
            },
        );
        Ok(())
    }

    /// Export a thread's latest state as a portable document.
    pub async fn export_thread(&self, thread_id: &str) -> Result<PortableThread, EngineError> {
        if let Some(thread) = self.threads.get(thread_id) {
            let draft = Checkpoint::draft(
                thread_id,
                thread.state.clone(),
                thread.next_node.clone(),
                thread.status,
                thread.step,
            );
            return Ok(PortableThread::new(&draft));
        }
        let cp = self.checkpointer.as_ref().ok_or(EngineError::NoCheckpointer)?;
        let stored = cp
            .load_latest(thread_id)
            .await?
            .ok_or_else(|| CheckpointerError::NotFound {
                thread_id: thread_id.to_string(),
            })?;
        Ok(PortableThread::new(&stored))
    }

    /// Import a portable document as a new thread (fork semantics: the
    /// new thread records where it came from and resumes at the exported
    /// position).
    pub async fn import_thread(
        &mut self,
        document: PortableThread,
        new_thread_id: &str,
    ) -> Result<(), EngineError> {
        let source_id = document.thread_id.clone();
        let mut checkpoint = document
            .checkpoint
            .into_checkpoint(self.workflow.schema().clone());
        checkpoint.thread_id = new_thread_id.to_string();
        checkpoint.forked_from = Some(source_id);
        checkpoint.sequence = 0;

        self.threads.insert(
            new_thread_id.to_string(),
            ThreadState {
                state: checkpoint.state.clone(),
                step: checkpoint.step,
                next_node: checkpoint.next_node.clone(),
                status: checkpoint.status,
            },
        );
        if let Some(cp) = &self.checkpointer {
            cp.save(checkpoint).await?;
        }
        Ok(())
    }
}

/// Execute one branch of a wave: follow edges/routers from the entry
/// until the join node or a terminal, applying updates to a branch-local
/// state copy and collecting them for the shared merge.
#[allow(clippy::too_many_arguments)]
async fn run_branch(
    workflow: Arc<Workflow>,
    resources: Arc<EngineResources>,
    sender: flume::Sender<Event>,
    thread_id: String,
    step: u64,
    mut local: VersionedState,
    descriptor: TaskDescriptor,
    join_node: NodeKind,
) -> Result<BranchSuccess, BranchFailure> {
    let entry = descriptor.entry.clone();
    let fail = |message: String| BranchFailure {
        entry: entry.encode(),
        label: descriptor.label.clone(),
        message,
    };

    // Scope the descriptor's input into the branch-local view only.
    for (field, value) in &descriptor.input {
        if let Some(channel) = local.field_mut(field) {
            *channel.get_mut() = value.clone();
        }
    }

    let mut collected: Vec<NodePartial> = Vec::new();
    let mut current = descriptor.entry.clone();

    loop {
        if current == join_node || current.is_terminal() {
            break;
        }
        let Some(node) = workflow.nodes().get(&current).cloned() else {
            return Err(fail(format!("unregistered node {current}")));
        };
        let ctx = NodeContext {
            node_id: current.to_string(),
            thread_id: thread_id.clone(),
            step,
            event_sender: sender.clone(),
            resources: resources.clone(),
        };
        let snapshot = local.snapshot();
        match node.run(snapshot, ctx).await {
            Ok(NodeOutput::Partial(partial)) => {
                workflow
                    .apply_partials(&mut local, vec![partial.clone()])
                    .map_err(|e| fail(e.to_string()))?;
                collected.push(partial);
            }
            Ok(NodeOutput::FanOut(_)) => {
                return Err(fail(format!("nested fan-out at {current} inside a branch")));
            }
            Err(e) => return Err(fail(e.to_string())),
        }

        current = if let Some(router) = workflow.routers().get(&current) {
            let snapshot = local.snapshot();
            let label = router.decide(&snapshot);
            match router.resolve(&label) {
                Some(target) => target.clone(),
                None => return Err(fail(format!("router returned unmapped label {label:?}"))),
            }
        } else if let Some(target) = workflow
            .edges()
            .get(&current)
            .and_then(|targets| targets.first())
        {
            target.clone()
        } else {
            break;
        };
    }

    Ok(BranchSuccess {
        entry: entry.encode(),
        partials: collected,
    })
}
