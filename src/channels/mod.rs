//! Versioned channels backing workflow state.
//!
//! Every state field lives in its own [`FieldChannel`]: a JSON value plus a
//! version counter bumped at merge barriers when the content actually
//! changed. The error log has its own dedicated [`ErrorsChannel`] since it
//! is always append-only and carries structured [`errors::ErrorEvent`]s
//! rather than opaque values.

pub mod errors;

use serde_json::Value;

use errors::ErrorEvent;

/// Common behavior of versioned state channels.
///
/// Reducers mutate channel contents through [`get_mut`](Channel::get_mut)
/// without touching the version; version bumps are the merge barrier's
/// responsibility so that several reducers applied in one step count as a
/// single version increment.
pub trait Channel {
    /// The payload type stored in the channel.
    type Payload: Clone;

    /// Cloned copy of the current contents.
    fn snapshot(&self) -> Self::Payload;

    /// Mutable access to the contents (does not bump the version).
    fn get_mut(&mut self) -> &mut Self::Payload;

    /// Current version counter.
    fn version(&self) -> u32;

    /// Overwrite the version counter (merge barrier only).
    fn set_version(&mut self, version: u32);
}

/// A single named state field: JSON value + version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldChannel {
    value: Value,
    version: u32,
}

impl FieldChannel {
    pub fn new(value: Value, version: u32) -> Self {
        Self { value, version }
    }

    /// Borrow the current value without cloning.
    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl Default for FieldChannel {
    fn default() -> Self {
        Self {
            value: Value::Null,
            version: 1,
        }
    }
}

impl Channel for FieldChannel {
    type Payload = Value;

    fn snapshot(&self) -> Value {
        self.value.clone()
    }

    fn get_mut(&mut self) -> &mut Value {
        &mut self.value
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn set_version(&mut self, version: u32) {
        self.version = version;
    }
}

/// Append-only log of structured error events.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ErrorsChannel {
    events: Vec<ErrorEvent>,
    version: u32,
}

impl ErrorsChannel {
    pub fn new(events: Vec<ErrorEvent>, version: u32) -> Self {
        Self { events, version }
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Channel for ErrorsChannel {
    type Payload = Vec<ErrorEvent>;

    fn snapshot(&self) -> Vec<ErrorEvent> {
        self.events.clone()
    }

    fn get_mut(&mut self) -> &mut Vec<ErrorEvent> {
        &mut self.events
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn set_version(&mut self, version: u32) {
        self.version = version;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_channel_snapshot_is_independent() {
        let mut channel = FieldChannel::new(json!([1, 2]), 1);
        let snap = channel.snapshot();
        channel
            .get_mut()
            .as_array_mut()
            .unwrap()
            .push(json!(3));
        assert_eq!(snap, json!([1, 2]));
        assert_eq!(channel.snapshot(), json!([1, 2, 3]));
    }

    #[test]
    fn version_is_explicit() {
        let mut channel = FieldChannel::default();
        assert_eq!(channel.version(), 1);
        *channel.get_mut() = json!("x");
        assert_eq!(channel.version(), 1, "get_mut must not bump the version");
        channel.set_version(2);
        assert_eq!(channel.version(), 2);
    }
}
