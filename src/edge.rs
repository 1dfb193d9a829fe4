//! Edges: directed transitions between steps
//!
//! Three kinds: direct (statically known target), conditional (a router
//! closure maps the post-merge state to a route key, looked up in a closed
//! route table), and parallel (static fan-out to several targets). The
//! distinguished pseudo-steps [`START`] and [`END`] bound every path.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::state::State;

/// Name of the entry pseudo-step. Has no incoming edges; its outgoing
/// edges form the initial frontier.
pub const START: &str = "__start__";

/// Name of the terminal pseudo-step. Has no outgoing edges; routing every
/// active branch here halts the invocation.
pub const END: &str = "__end__";

/// Unconditional transition.
#[derive(Debug, Clone)]
pub struct Edge {
    /// Source step name.
    pub from: Arc<String>,
    /// Target step name (or [`END`]).
    pub to: Arc<String>,
}

/// Routing function of a conditional edge: post-merge state to route key.
pub type RouterFn = Arc<dyn Fn(&State) -> String + Send + Sync>;

/// Conditional transition: a router plus a closed route-key table.
///
/// Every key the router can produce must be present in `routes`; an
/// unmapped key at run time is a fatal
/// [`Error::Routing`](crate::error::Error::Routing).
#[derive(Clone)]
pub struct ConditionalEdge {
    /// Source step name.
    pub from: Arc<String>,
    /// Route key to target step name (or [`END`]). Insertion order is
    /// preserved for stable export.
    pub routes: IndexMap<String, Arc<String>>,
    router: RouterFn,
}

impl ConditionalEdge {
    /// Build a conditional edge.
    pub fn new(
        from: impl Into<String>,
        router: RouterFn,
        routes: IndexMap<String, Arc<String>>,
    ) -> Self {
        Self {
            from: Arc::new(from.into()),
            routes,
            router,
        }
    }

    /// Invoke the router against the post-merge state.
    #[must_use]
    pub fn evaluate(&self, state: &State) -> String {
        (self.router)(state)
    }

    /// Possible targets, in route declaration order.
    #[must_use]
    pub fn targets(&self) -> Vec<&str> {
        self.routes.values().map(|t| t.as_str()).collect()
    }
}

impl fmt::Debug for ConditionalEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalEdge")
            .field("from", &self.from)
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

/// Static fan-out: the source's successors all join the next frontier.
#[derive(Debug, Clone)]
pub struct ParallelEdge {
    /// Source step name.
    pub from: Arc<String>,
    /// Fan-out targets, in declaration order.
    pub to: Arc<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditional_edge_evaluates_router() {
        let mut routes = IndexMap::new();
        routes.insert("high".to_string(), Arc::new("process_high".to_string()));
        routes.insert("low".to_string(), Arc::new(END.to_string()));
        let edge = ConditionalEdge::new(
            "classify",
            Arc::new(|state: &State| {
                if state.get_i64("value").unwrap_or(0) > 10 {
                    "high".to_string()
                } else {
                    "low".to_string()
                }
            }),
            routes,
        );

        let key = edge.evaluate(&State::new().with_value("value", 20));
        assert_eq!(key, "high");
        assert_eq!(edge.routes.get(&key).unwrap().as_str(), "process_high");

        let key = edge.evaluate(&State::new().with_value("value", 3));
        assert_eq!(edge.routes.get(&key).unwrap().as_str(), END);
    }

    #[test]
    fn markers_are_distinct() {
        assert_ne!(START, END);
    }
}
