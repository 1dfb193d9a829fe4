//! Graph execution streaming
//!
//! Streaming allows consuming graph execution results in real time, one
//! batch of events per tick, rather than waiting for the full invocation
//! to finish. The stream is lazy and finite; it terminates after yielding
//! [`StreamEvent::Done`] or an error. It is not restartable; restarting
//! requires a fresh [`stream`](crate::executor::CompiledGraph::stream)
//! call.

use crate::state::{State, StateUpdate};

/// Stream modes control what data is yielded during execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    /// Emit the full merged state after each tick
    #[default]
    Values,
    /// Emit each step's raw partial update
    Updates,
    /// Emit tick/step lifecycle events
    Events,
}

/// Event yielded during streaming execution
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A tick began (`StreamMode::Events`)
    TickStart {
        /// 1-based tick number
        tick: u32,
        /// Frontier in declared order
        frontier: Vec<String>,
    },
    /// A step was dispatched (`StreamMode::Events`)
    NodeStart {
        /// Tick the step belongs to
        tick: u32,
        /// Step name
        node: String,
    },
    /// A step produced its partial update (`StreamMode::Updates`)
    Update {
        /// Tick the step belongs to
        tick: u32,
        /// Step that produced the update
        node: String,
        /// The raw partial update, before merging
        update: StateUpdate,
    },
    /// The tick's merge completed (`StreamMode::Values`)
    Values {
        /// Tick whose updates were merged
        tick: u32,
        /// Full state after the merge
        state: State,
    },
    /// Execution completed; always the final item
    Done {
        /// Final state
        state: State,
        /// Step names in dispatch order across all ticks
        execution_path: Vec<String>,
        /// Number of ticks executed
        ticks: u32,
    },
}
