//! In-process event bus for workflow observability.
//!
//! Nodes and the engine emit structured [`Event`]s through a cheap
//! clonable channel sender; a background listener broadcasts them to
//! pluggable [`EventSink`]s. This is how fan-out progress stays visible
//! to monitoring before the join barrier runs.

mod bus;
mod emitter;
mod event;
mod sink;

pub use bus::EventBus;
pub use emitter::{BusEmitter, EmitterError, EventEmitter};
pub use event::{DiagnosticEvent, Event, NodeEvent, STREAM_END_SCOPE};
pub use sink::{ChannelSink, EventSink, MemorySink, StdOutSink};
