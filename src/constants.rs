//! Crate-wide default limits and capacities.

use std::time::Duration;

/// Default maximum number of ticks per invocation.
///
/// A tick is one dispatch/merge/route round of the frontier. Cyclic graphs
/// are legal, so the engine bounds them here instead of relying on the
/// builder to reject loops. Raise with
/// [`with_recursion_limit`](crate::executor::CompiledGraph::with_recursion_limit).
pub const DEFAULT_RECURSION_LIMIT: u32 = 25;

/// Default timeout applied to each step's callable.
pub const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default timeout applied to a whole invocation.
pub const DEFAULT_GRAPH_TIMEOUT: Duration = Duration::from_secs(300);

/// Grace window granted to in-flight steps when an invocation is cancelled.
///
/// Zero means in-flight dispatches are abandoned immediately.
pub const DEFAULT_CANCELLATION_GRACE: Duration = Duration::ZERO;
