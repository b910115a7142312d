//! Conditional routing with compile-time declared label sets.
//!
//! A [`Router`] pairs an arbitrary decision function with a fixed map of
//! labels to destinations. The compiler validates every declared label's
//! destination; a label returned outside the declared set is a runtime
//! `Routing` error that fails the thread.

use std::sync::Arc;

use crate::state::StateSnapshot;
use crate::types::NodeKind;

/// Decision function evaluated against the post-update state snapshot.
///
/// Must return one label drawn from the router's declared set.
pub type RouterFn = Arc<dyn Fn(&StateSnapshot) -> String + Send + Sync + 'static>;

/// A conditional edge: decision function plus declared label→target map.
///
/// # Examples
///
/// ```
/// use loomflow::graphs::Router;
/// use loomflow::types::NodeKind;
/// use std::sync::Arc;
///
/// let router = Router::new(Arc::new(|snapshot| {
///     if snapshot.field_len("results") >= 3 {
///         "enough".to_string()
///     } else {
///         "more".to_string()
///     }
/// }))
/// .route("enough", NodeKind::Custom("summarize".into()))
/// .route("more", NodeKind::Custom("search".into()));
///
/// assert!(router.resolve("enough").is_some());
/// assert!(router.resolve("typo").is_none());
/// ```
#[derive(Clone)]
pub struct Router {
    decide: RouterFn,
    routes: Vec<(String, NodeKind)>,
}

impl Router {
    pub fn new(decide: RouterFn) -> Self {
        Self {
            decide,
            routes: Vec::new(),
        }
    }

    /// Declare a label and its destination.
    #[must_use]
    pub fn route(mut self, label: impl Into<String>, target: impl Into<NodeKind>) -> Self {
        self.routes.push((label.into(), target.into()));
        self
    }

    /// Declared (label, target) pairs in declaration order.
    pub fn routes(&self) -> &[(String, NodeKind)] {
        &self.routes
    }

    /// Destination for a label, if declared.
    #[must_use]
    pub fn resolve(&self, label: &str) -> Option<&NodeKind> {
        self.routes
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, target)| target)
    }

    /// Evaluate the decision function.
    #[must_use]
    pub fn decide(&self, snapshot: &StateSnapshot) -> String {
        (self.decide)(snapshot)
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes)
            .finish()
    }
}
