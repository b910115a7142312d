use std::fmt;
use thiserror::Error;

use super::event::Event;

/// Abstract event emitter that engine components can clone freely.
pub trait EventEmitter: Send + Sync + fmt::Debug {
    /// Emit an event synchronously without blocking.
    fn emit(&self, event: Event) -> Result<(), EmitterError>;
}

/// Errors raised when emitting an event.
#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("event bus closed")]
    Closed,
    #[error("event emission failed: {0}")]
    Other(String),
}

/// Emitter backed by the bus's flume channel.
#[derive(Debug, Clone)]
pub struct BusEmitter {
    pub(super) sender: flume::Sender<Event>,
}

impl EventEmitter for BusEmitter {
    fn emit(&self, event: Event) -> Result<(), EmitterError> {
        self.sender.send(event).map_err(|_| EmitterError::Closed)
    }
}
