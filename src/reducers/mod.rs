//! State merge strategies.
//!
//! Every state field declares a [`MergePolicy`] in the
//! [`StateSchema`](crate::state::StateSchema). At each merge barrier the
//! [`ReducerRegistry`] applies the field's reducer to fold a node's update
//! into the current value, making concurrent writes well-defined.

mod policies;
mod registry;

pub use policies::{Append, CustomMergeFn, MergePolicy, Replace, Sum};
pub use registry::ReducerRegistry;

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

/// Unified reducer contract: fold `update` into `current`, producing the
/// new field value. Reducers never touch versions; the merge barrier does.
pub trait Reducer: Send + Sync {
    fn merge(&self, field: &str, current: &Value, update: &Value) -> Result<Value, ReducerError>;
}

/// Errors raised while applying reducers at a merge barrier.
#[derive(Debug, Error, Diagnostic)]
pub enum ReducerError {
    /// A node wrote a field that is not declared in the state schema.
    #[error("field not declared in state schema: {field}")]
    #[diagnostic(
        code(loomflow::reducers::unknown_field),
        help("Declare the field (and its merge policy) on the schema passed to GraphBuilder.")
    )]
    UnknownField { field: String },

    /// The merge function rejected the value pair.
    #[error("merge failed for field {field}: {message}")]
    #[diagnostic(code(loomflow::reducers::apply))]
    Apply { field: String, message: String },
}
