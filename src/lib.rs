//! stategraph - Stateful Graph Execution Engine
//!
//! A tick-based execution engine for multi-step computational workflows:
//! register named steps (opaque async callables over shared state), wire
//! them with direct, conditional, and parallel edges, compile into an
//! immutable validated graph, and execute from START to END with
//! deterministic merging of concurrently produced partial updates.
//!
//! # Core concepts
//!
//! - **Step**: a named `State -> StateUpdate` callable ([`Node`])
//! - **Edge**: a direct, conditional, or parallel transition between steps
//! - **Frontier**: the set of steps scheduled for the current tick
//! - **Tick**: one synchronized round of dispatch, merge, route, advance
//! - **Merge policy**: how same-tick updates to one field are combined
//!
//! # Quick start
//!
//! ```rust
//! use stategraph::{StateGraph, StateSchema, StateUpdate, State, ValueKind, END};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> stategraph::Result<()> {
//! let schema = StateSchema::new().field("count", ValueKind::Integer);
//! let mut graph = StateGraph::new(schema);
//!
//! graph.add_node_from_fn("inc", |state| {
//!     Box::pin(async move {
//!         let count = state.get_i64("count").unwrap_or(0);
//!         Ok(StateUpdate::single("count", count + 1))
//!     })
//! });
//! graph.set_entry_point("inc");
//! graph.add_conditional_edges(
//!     "inc",
//!     |state| {
//!         if state.get_i64("count").unwrap_or(0) < 3 {
//!             "again".to_string()
//!         } else {
//!             "done".to_string()
//!         }
//!     },
//!     [
//!         ("again".to_string(), "inc".to_string()),
//!         ("done".to_string(), END.to_string()),
//!     ],
//! );
//!
//! let app = graph.compile()?;
//! let result = app.invoke(State::new().with_value("count", 0)).await?;
//! assert_eq!(result.state().get_i64("count"), Some(3));
//! # Ok(())
//! # }
//! ```
//!
//! The compiled graph is read-only and `Send + Sync`: share it across
//! tasks and run any number of invocations concurrently, each with its own
//! private execution context.

pub mod constants;
pub mod edge;
pub mod error;
pub mod event;
pub mod executor;
pub mod graph;
pub mod manifest;
pub mod merge;
pub mod metrics;
pub mod node;
pub mod schema;
pub mod state;
pub mod stream;

// Re-exports
pub use edge::{ConditionalEdge, Edge, ParallelEdge, RouterFn, END, START};
pub use error::{ActionableError, ActionableSuggestion, Error, Result};
pub use event::{GraphCallback, GraphEvent};
pub use executor::{CompiledGraph, ExecutionResult};
pub use graph::StateGraph;
pub use merge::MergePolicy;
pub use metrics::ExecutionMetrics;
pub use node::{BoxedNode, FnNode, Node};
pub use schema::{EdgeSchema, GraphSchema, NodeMetadata, NodeSchema, NodeType};
pub use state::{FieldSpec, State, StateSchema, StateUpdate, ValueKind};
pub use stream::{StreamEvent, StreamMode};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        CompiledGraph, Error, ExecutionResult, MergePolicy, Node, Result, State, StateGraph,
        StateSchema, StateUpdate, StreamEvent, StreamMode, ValueKind, END, START,
    };
}
