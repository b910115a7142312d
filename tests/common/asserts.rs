//! Assertion helpers over versioned state.

use loomflow::channels::Channel;
use loomflow::state::VersionedState;
use serde_json::Value;

/// Current value of a field, panicking on undeclared names.
pub fn field_value(state: &VersionedState, field: &str) -> Value {
    state
        .field(field)
        .unwrap_or_else(|| panic!("field {field} not declared"))
        .snapshot()
}

/// Array field contents sorted by their JSON rendering, for
/// order-independent comparison across fan-out branches.
pub fn sorted_array(state: &VersionedState, field: &str) -> Vec<Value> {
    let mut items = field_value(state, field)
        .as_array()
        .cloned()
        .unwrap_or_default();
    items.sort_by_key(|v| v.to_string());
    items
}
