//! Engine configuration carried from the graph builder into runs.

use std::time::Duration;

use crate::event_bus::{EventBus, EventSink, MemorySink, StdOutSink};

/// Which checkpoint backend the engine should construct.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckpointerType {
    /// Volatile store for tests and development.
    InMemory,
    /// Durable SQLite-backed store.
    #[cfg(feature = "sqlite")]
    Sqlite,
}

/// Runtime configuration for a compiled workflow.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Explicit thread id for `Workflow::invoke`. When unset a fresh id
    /// is generated per invocation.
    pub thread_id: Option<String>,
    /// Checkpoint backend; `None` disables persistence entirely.
    pub checkpointer: Option<CheckpointerType>,
    /// SQLite database file name (overridable via `SQLITE_DB_NAME`).
    pub sqlite_db_name: Option<String>,
    /// Event bus wiring.
    pub event_bus: EventBusConfig,
    /// Global cap on concurrently running fan-out branches.
    pub concurrency_limit: usize,
    /// Deadline for an entire fan-out wave; on expiry outstanding
    /// branches are aborted and their unapplied updates discarded.
    pub wave_timeout: Option<Duration>,
    /// Importance score stamped on checkpoints (consumed by the
    /// `DropBelowImportance` retention policy).
    pub checkpoint_importance: f64,
    /// Owner recorded on checkpoints (consumed by the
    /// `MaxThreadsPerOwner` retention policy).
    pub owner: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thread_id: None,
            checkpointer: Some(CheckpointerType::InMemory),
            sqlite_db_name: Self::resolve_sqlite_db_name(None),
            event_bus: EventBusConfig::default(),
            concurrency_limit: Self::DEFAULT_CONCURRENCY_LIMIT,
            wave_timeout: None,
            checkpoint_importance: 0.0,
            owner: None,
        }
    }
}

impl EngineConfig {
    /// Default cap on concurrently running fan-out branches.
    pub const DEFAULT_CONCURRENCY_LIMIT: usize = 4;

    fn resolve_sqlite_db_name(provided: Option<String>) -> Option<String> {
        if let Some(name) = provided {
            return Some(name);
        }
        dotenvy::dotenv().ok();
        Some(std::env::var("SQLITE_DB_NAME").unwrap_or_else(|_| "loomflow.db".to_string()))
    }

    pub fn new(
        thread_id: Option<String>,
        checkpointer: Option<CheckpointerType>,
        sqlite_db_name: Option<String>,
    ) -> Self {
        Self {
            thread_id,
            checkpointer,
            sqlite_db_name: Self::resolve_sqlite_db_name(sqlite_db_name),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    #[must_use]
    pub fn with_checkpointer(mut self, checkpointer: Option<CheckpointerType>) -> Self {
        self.checkpointer = checkpointer;
        self
    }

    #[must_use]
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    #[must_use]
    pub fn with_wave_timeout(mut self, timeout: Duration) -> Self {
        self.wave_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    #[must_use]
    pub fn with_event_bus(mut self, event_bus: EventBusConfig) -> Self {
        self.event_bus = event_bus;
        self
    }
}

/// Declarative sink selection for the event bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkConfig {
    StdOut,
    Memory,
}

/// Event bus wiring declared on the engine config.
#[derive(Clone, Debug)]
pub struct EventBusConfig {
    pub sinks: Vec<SinkConfig>,
}

impl EventBusConfig {
    #[must_use]
    pub fn new(sinks: Vec<SinkConfig>) -> Self {
        Self { sinks }
    }

    #[must_use]
    pub fn with_stdout_only() -> Self {
        Self::new(vec![SinkConfig::StdOut])
    }

    #[must_use]
    pub fn silent() -> Self {
        Self::new(Vec::new())
    }

    /// Construct the configured bus.
    #[must_use]
    pub fn build_event_bus(&self) -> EventBus {
        let sinks: Vec<Box<dyn EventSink>> = self
            .sinks
            .iter()
            .map(|sink| match sink {
                SinkConfig::StdOut => Box::new(StdOutSink::default()) as Box<dyn EventSink>,
                SinkConfig::Memory => Box::new(MemorySink::new()) as Box<dyn EventSink>,
            })
            .collect();
        EventBus::with_sinks(sinks)
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self::with_stdout_only()
    }
}
