//! # Loomflow: workflow orchestration with built-in fault tolerance
//!
//! Loomflow drives stateful, cycle-capable workflow graphs that call an
//! unreliable external reasoning service, with reducer-merged concurrent
//! state, durable resumable checkpoints, and composable resilience
//! wrappers.
//!
//! ## Core concepts
//!
//! - **State schema & reducers**: every field declares how concurrent
//!   writes merge (`replace`, `append`, `sum`, custom)
//! - **Graph compiler**: nodes, static edges, routers with declared
//!   label sets, fan-out specs, loop guards; all violations reported at
//!   once
//! - **Engine**: sequential interpretation per thread, dynamic parallel
//!   fan-out/fan-in under a concurrency cap, loop containment via
//!   guards routing to a give-up terminal
//! - **Checkpoints**: append-only per-thread snapshot history with
//!   resume, fork, export/import, and retention cleanup
//! - **Resilience**: retry/backoff, circuit breaker, fallback chains,
//!   rate and concurrency limits, budget governance
//!
//! ## Building a workflow
//!
//! ```rust
//! use async_trait::async_trait;
//! use loomflow::graphs::GraphBuilder;
//! use loomflow::node::{Node, NodeContext, NodeError, NodeOutput, NodePartial};
//! use loomflow::reducers::MergePolicy;
//! use loomflow::state::{StateSchema, StateSnapshot};
//! use loomflow::types::NodeKind;
//! use serde_json::json;
//!
//! struct Greet;
//!
//! #[async_trait]
//! impl Node for Greet {
//!     async fn run(
//!         &self,
//!         _snapshot: StateSnapshot,
//!         ctx: NodeContext,
//!     ) -> Result<NodeOutput, NodeError> {
//!         ctx.emit("greet", "composing greeting")?;
//!         Ok(NodePartial::new()
//!             .with_field("greeting", json!("hello"))
//!             .into())
//!     }
//!
//!     fn declared_writes(&self) -> Vec<String> {
//!         vec!["greeting".to_string()]
//!     }
//! }
//!
//! let schema = StateSchema::new().field("greeting", MergePolicy::Replace);
//! let workflow = GraphBuilder::new(schema)
//!     .add_node(NodeKind::Custom("greet".into()), Greet)
//!     .add_edge(NodeKind::Start, NodeKind::Custom("greet".into()))
//!     .add_edge(NodeKind::Custom("greet".into()), NodeKind::End)
//!     .compile()
//!     .expect("valid graph");
//! ```
//!
//! ## Module guide
//!
//! - [`state`]: schema, versioned state, snapshots
//! - [`reducers`]: merge policies and the reducer registry
//! - [`node`]: the `Node` trait and execution context
//! - [`control`]: task descriptors, fan-out specs, loop guards
//! - [`graphs`]: graph building and compile-time validation
//! - [`workflow`]: the compiled plan and merge barrier
//! - [`runtimes`]: engine, threads, checkpointing, retention
//! - [`resilience`]: retry, breaker, fallback, limits, budget
//! - [`service`]: the external reasoning service boundary
//! - [`event_bus`] / [`telemetry`]: observability

pub mod channels;
pub mod control;
pub mod event_bus;
pub mod graphs;
pub mod node;
pub mod reducers;
pub mod resilience;
pub mod runtimes;
pub mod service;
pub mod state;
pub mod telemetry;
pub mod types;
pub mod utils;
pub mod workflow;
