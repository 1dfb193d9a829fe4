//! Execution events for observability
//!
//! The engine emits one event per lifecycle point (invocation start/end,
//! tick start, step start/end/error, merge, edge traversal) to every
//! registered [`GraphCallback`]. Callbacks are fire-and-forget: they run
//! synchronously on the engine's path and must be cheap.

use std::time::{Duration, SystemTime};

use crate::state::{State, StateUpdate};

/// Kind of edge traversed at run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeType {
    /// Unconditional edge.
    Direct,
    /// Conditional edge; carries the route key the router produced.
    Conditional {
        /// Router output that selected the target.
        route_key: String,
    },
    /// Static fan-out edge.
    Parallel,
}

/// Event emitted during graph execution.
#[derive(Debug, Clone)]
pub enum GraphEvent {
    /// Invocation started.
    GraphStart {
        /// Wall-clock start time.
        timestamp: SystemTime,
        /// Validated initial state (defaults applied).
        initial_state: State,
    },
    /// A tick is about to dispatch its frontier.
    TickStart {
        /// Wall-clock time.
        timestamp: SystemTime,
        /// 1-based tick number.
        tick: u32,
        /// Frontier in declared (merge) order.
        frontier: Vec<String>,
    },
    /// A step was dispatched.
    NodeStart {
        /// Wall-clock time.
        timestamp: SystemTime,
        /// Tick the step belongs to.
        tick: u32,
        /// Step name.
        node: String,
    },
    /// A step returned its update.
    NodeEnd {
        /// Wall-clock time.
        timestamp: SystemTime,
        /// Tick the step belongs to.
        tick: u32,
        /// Step name.
        node: String,
        /// The partial update the step produced.
        update: StateUpdate,
        /// Step wall-clock duration.
        duration: Duration,
    },
    /// A step failed; the invocation halts after this event.
    NodeError {
        /// Wall-clock time.
        timestamp: SystemTime,
        /// Tick the step belongs to.
        tick: u32,
        /// Step name.
        node: String,
        /// Rendered error.
        error: String,
    },
    /// A tick's updates were merged into the state.
    MergeApplied {
        /// Wall-clock time.
        timestamp: SystemTime,
        /// Tick that produced the updates.
        tick: u32,
        /// Fields changed by the merge, in merge order.
        fields_changed: Vec<String>,
        /// The post-merge state.
        state: State,
    },
    /// A step's outgoing edge was resolved.
    EdgeTraversal {
        /// Wall-clock time.
        timestamp: SystemTime,
        /// Tick on which routing happened.
        tick: u32,
        /// Source step.
        from: String,
        /// Resolved target step name(s); [`END`](crate::edge::END) included.
        to: Vec<String>,
        /// Which kind of edge resolved.
        edge_type: EdgeType,
    },
    /// Invocation completed.
    GraphEnd {
        /// Wall-clock time.
        timestamp: SystemTime,
        /// Final state.
        final_state: State,
        /// Total wall-clock duration.
        duration: Duration,
        /// Step names in dispatch order across all ticks.
        execution_path: Vec<String>,
        /// Number of ticks executed.
        ticks: u32,
    },
}

/// Observer hook for [`GraphEvent`]s.
///
/// Register with
/// [`CompiledGraph::with_callback`](crate::executor::CompiledGraph::with_callback).
pub trait GraphCallback: Send + Sync {
    /// Called once per event, on the engine's execution path.
    fn on_event(&self, event: &GraphEvent);
}

impl<F> GraphCallback for F
where
    F: Fn(&GraphEvent) + Send + Sync,
{
    fn on_event(&self, event: &GraphEvent) {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn closures_are_callbacks() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        let cb = move |_event: &GraphEvent| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        };
        cb.on_event(&GraphEvent::TickStart {
            timestamp: SystemTime::now(),
            tick: 1,
            frontier: vec!["a".to_string()],
        });
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
