//! Collection constructors shared across modules.

use rustc_hash::FxHashMap;
use serde_json::Value;

/// Create an empty field-update map with the crate's standard hasher.
///
/// Used wherever a `NodePartial`'s field map is built up incrementally.
#[must_use]
pub fn new_field_map() -> FxHashMap<String, Value> {
    FxHashMap::default()
}

/// Build a field map from an iterator of key/value pairs.
#[must_use]
pub fn field_map<I, K>(pairs: I) -> FxHashMap<String, Value>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v))
        .collect()
}
