//! Built-in merge policies: replace, append, sum, custom.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::{Reducer, ReducerError};

/// Signature for user-supplied merge functions.
///
/// The function must be associative and commutative when the field is
/// writable from concurrently-running branches; the compiler trusts that
/// declaration (it is the whole point of choosing `Custom` over
/// `Replace`).
pub type CustomMergeFn = Arc<dyn Fn(&Value, &Value) -> Result<Value, String> + Send + Sync>;

/// Declared merge strategy for a state field.
#[derive(Clone)]
pub enum MergePolicy {
    /// Last write wins. Only legal for fields exclusive to a single
    /// branch per step; the compiler rejects replace-fields reachable
    /// from more than one branch of a fan-out.
    Replace,
    /// Accumulate into an array. Order-preserving within one writer,
    /// arrival-ordered across writers; downstream logic must treat the
    /// result as a multiset.
    Append,
    /// Additive numeric accumulation, overflow-checked.
    Sum,
    /// User-supplied associative & commutative merge function.
    Custom {
        /// Short name used in diagnostics.
        name: String,
        merge: CustomMergeFn,
    },
}

impl MergePolicy {
    /// Construct a custom policy from a named merge function.
    pub fn custom<F>(name: impl Into<String>, merge: F) -> Self
    where
        F: Fn(&Value, &Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        MergePolicy::Custom {
            name: name.into(),
            merge: Arc::new(merge),
        }
    }

    /// Whether concurrent writers may target this field.
    ///
    /// `Append`, `Sum`, and `Custom` merges are associative/commutative by
    /// contract; `Replace` is not.
    #[must_use]
    pub fn is_concurrency_safe(&self) -> bool {
        !matches!(self, MergePolicy::Replace)
    }

    /// Build the reducer implementing this policy.
    pub(crate) fn build_reducer(&self) -> Arc<dyn Reducer> {
        match self {
            MergePolicy::Replace => Arc::new(Replace),
            MergePolicy::Append => Arc::new(Append),
            MergePolicy::Sum => Arc::new(Sum),
            MergePolicy::Custom { merge, .. } => Arc::new(CustomReducer {
                merge: merge.clone(),
            }),
        }
    }

    /// Diagnostic label.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            MergePolicy::Replace => "replace",
            MergePolicy::Append => "append",
            MergePolicy::Sum => "sum",
            MergePolicy::Custom { name, .. } => name,
        }
    }
}

impl fmt::Debug for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MergePolicy::{}", self.label())
    }
}

/// Last-write-wins reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replace;

impl Reducer for Replace {
    fn merge(&self, _field: &str, _current: &Value, update: &Value) -> Result<Value, ReducerError> {
        Ok(update.clone())
    }
}

/// Array accumulation reducer.
///
/// A `Null` current value counts as an empty array; an array update is
/// concatenated element-wise, any other update is pushed as one element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Append;

impl Reducer for Append {
    fn merge(&self, field: &str, current: &Value, update: &Value) -> Result<Value, ReducerError> {
        let mut items = match current {
            Value::Null => Vec::new(),
            Value::Array(existing) => existing.clone(),
            other => {
                return Err(ReducerError::Apply {
                    field: field.to_string(),
                    message: format!("append target is not an array: {other}"),
                });
            }
        };
        match update {
            Value::Array(new_items) => items.extend(new_items.iter().cloned()),
            other => items.push(other.clone()),
        }
        Ok(Value::Array(items))
    }
}

/// Overflow-checked additive reducer.
///
/// Integer pairs stay integers via `checked_add`; any float operand
/// promotes the result to a float. Non-numeric operands are rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sum;

impl Reducer for Sum {
    fn merge(&self, field: &str, current: &Value, update: &Value) -> Result<Value, ReducerError> {
        let zero = Value::from(0);
        let current = if current.is_null() { &zero } else { current };
        match (current.as_i64(), update.as_i64()) {
            (Some(a), Some(b)) => {
                let total = a.checked_add(b).ok_or_else(|| ReducerError::Apply {
                    field: field.to_string(),
                    message: format!("integer overflow adding {b} to {a}"),
                })?;
                Ok(Value::from(total))
            }
            _ => {
                let a = current.as_f64().ok_or_else(|| ReducerError::Apply {
                    field: field.to_string(),
                    message: format!("sum target is not numeric: {current}"),
                })?;
                let b = update.as_f64().ok_or_else(|| ReducerError::Apply {
                    field: field.to_string(),
                    message: format!("sum update is not numeric: {update}"),
                })?;
                Ok(Value::from(a + b))
            }
        }
    }
}

struct CustomReducer {
    merge: CustomMergeFn,
}

impl Reducer for CustomReducer {
    fn merge(&self, field: &str, current: &Value, update: &Value) -> Result<Value, ReducerError> {
        (self.merge)(current, update).map_err(|message| ReducerError::Apply {
            field: field.to_string(),
            message,
        })
    }
}
