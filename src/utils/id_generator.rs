//! Identifier generation for threads and runs.

use uuid::Uuid;

/// Generates unique identifiers for workflow threads and engine runs.
///
/// Thin wrapper over UUID v4 so call sites read as intent
/// (`generate_thread_id`) rather than mechanism.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator;

impl IdGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Identifier for a workflow thread (durable, user-visible).
    #[must_use]
    pub fn generate_thread_id(&self) -> String {
        format!("thread-{}", Uuid::new_v4())
    }

    /// Identifier for a single engine run (diagnostic scoping).
    #[must_use]
    pub fn generate_run_id(&self) -> String {
        format!("run-{}", Uuid::new_v4())
    }
}
