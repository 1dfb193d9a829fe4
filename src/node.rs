//! Steps: named units of computation over shared state
//!
//! A step is an opaque async callable from a state snapshot to a partial
//! update. The engine never inspects what a step does (an LLM call, a
//! database lookup, pure computation); it only awaits the update. Steps
//! are registered once at build time and immutable thereafter.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::Result;
use crate::state::{State, StateUpdate};

/// A named unit of computation over shared state.
///
/// Synchronous and asynchronous step logic are unified behind this one
/// async contract; a purely synchronous step simply returns without
/// awaiting.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use stategraph::{Node, State, StateUpdate, Result};
///
/// struct Increment;
///
/// #[async_trait]
/// impl Node for Increment {
///     async fn execute(&self, state: State) -> Result<StateUpdate> {
///         let count = state.get_i64("count").unwrap_or(0);
///         Ok(StateUpdate::single("count", count + 1))
///     }
/// }
/// ```
#[async_trait]
pub trait Node: Send + Sync {
    /// Run the step against a snapshot of the current state and return the
    /// fields it changed. Returning an empty update is a legal no-op.
    async fn execute(&self, state: State) -> Result<StateUpdate>;
}

/// Shared handle to a registered step.
pub type BoxedNode = Arc<dyn Node>;

/// Adapter turning an async closure into a [`Node`].
///
/// Used by
/// [`StateGraph::add_node_from_fn`](crate::graph::StateGraph::add_node_from_fn):
///
/// ```rust
/// # use stategraph::{StateGraph, StateSchema, StateUpdate, ValueKind};
/// let mut graph = StateGraph::new(StateSchema::new().field("count", ValueKind::Integer));
/// graph.add_node_from_fn("inc", |state| {
///     Box::pin(async move {
///         let count = state.get_i64("count").unwrap_or(0);
///         Ok(StateUpdate::single("count", count + 1))
///     })
/// });
/// ```
pub struct FnNode<F> {
    f: F,
}

impl<F> FnNode<F>
where
    F: Fn(State) -> BoxFuture<'static, Result<StateUpdate>> + Send + Sync,
{
    /// Wrap a closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Node for FnNode<F>
where
    F: Fn(State) -> BoxFuture<'static, Result<StateUpdate>> + Send + Sync,
{
    async fn execute(&self, state: State) -> Result<StateUpdate> {
        (self.f)(state).await
    }
}
