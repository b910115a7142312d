//! Shared schemas and configurations.

use loomflow::reducers::MergePolicy;
use loomflow::runtimes::{EngineConfig, EventBusConfig};
use loomflow::state::StateSchema;
use loomflow::types::NodeKind;

/// Engine config that keeps test output clean (no stdout sink).
pub fn silent_config() -> EngineConfig {
    EngineConfig::default().with_event_bus(EventBusConfig::silent())
}

/// Schema for the research-style fan-out scenarios.
pub fn research_schema() -> StateSchema {
    StateSchema::new()
        .field("topic", MergePolicy::Replace)
        .field("task", MergePolicy::Replace)
        .field("results", MergePolicy::Append)
        .field("success_count", MergePolicy::Sum)
        .field("summary", MergePolicy::Replace)
}

/// Schema for loop-guard scenarios.
pub fn loop_schema() -> StateSchema {
    StateSchema::new().field("iterations", MergePolicy::Sum)
}

pub fn custom(name: &str) -> NodeKind {
    NodeKind::Custom(name.to_string())
}
