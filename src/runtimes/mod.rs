//! Workflow runtime: engine, thread lifecycle, and durable checkpoints.
//!
//! # Architecture
//!
//! - [`WorkflowEngine`]: per-thread interpreter with fan-out waves,
//!   loop guards, and an administrative surface
//! - [`Checkpointer`]: pluggable persistence trait
//!   ([`InMemoryCheckpointer`] always available, `SqliteCheckpointer`
//!   behind the default-on `sqlite` feature)
//! - [`RetentionPolicy`]: out-of-band checkpoint cleanup
//! - Persistence models: serde shapes for checkpoints and the portable
//!   thread export/import documents
//!
//! # Usage
//!
//! ```rust,no_run
//! use loomflow::node::EngineResources;
//! use loomflow::runtimes::WorkflowEngine;
//! # use loomflow::workflow::Workflow;
//! # async fn example(workflow: Workflow) -> Result<(), Box<dyn std::error::Error>> {
//! let mut engine = WorkflowEngine::new(workflow.clone(), EngineResources::default()).await;
//! let init = engine
//!     .create_thread("thread-1".to_string(), workflow.initial_state())
//!     .await?;
//! println!("initialized: {init:?}");
//! let final_state = engine.run_until_complete("thread-1").await?;
//! # Ok(())
//! # }
//! ```

pub mod checkpointer;
#[cfg(feature = "sqlite")]
pub mod checkpointer_sqlite;
pub mod engine;
pub mod persistence;
pub mod retention;
pub mod runtime_config;
pub mod types;

pub use checkpointer::{Checkpoint, Checkpointer, CheckpointerError, InMemoryCheckpointer};
#[cfg(feature = "sqlite")]
pub use checkpointer_sqlite::SqliteCheckpointer;
pub use engine::{
    EngineError, StepReport, ThreadHandle, ThreadInit, ThreadState, WorkflowEngine,
};
pub use persistence::{
    PersistedCheckpoint, PersistedErrors, PersistedField, PersistedState, PersistenceError,
    PortableThread,
};
pub use retention::{CheckpointMeta, RetentionPolicy};
pub use runtime_config::{CheckpointerType, EngineConfig, EventBusConfig, SinkConfig};
pub use types::{ThreadId, ThreadStatus};
