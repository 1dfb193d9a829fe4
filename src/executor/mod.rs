//! The execution engine
//!
//! [`CompiledGraph`] is the frozen, validated graph produced by
//! [`StateGraph::compile`](crate::graph::StateGraph::compile). It is
//! read-only and `Send + Sync`: one compiled graph may serve any number of
//! concurrent invocations, each with its own private execution context
//! (state, frontier, tick counter). Configuration is builder-style and
//! per-handle; cloning the handle and reconfiguring the clone does not
//! disturb other holders.

mod execution;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::constants::{DEFAULT_CANCELLATION_GRACE, DEFAULT_RECURSION_LIMIT};
use crate::edge::{ConditionalEdge, Edge, ParallelEdge, END};
use crate::event::{GraphCallback, GraphEvent};
use crate::merge::MergePolicy;
use crate::metrics::ExecutionMetrics;
use crate::node::BoxedNode;
use crate::schema::{EdgeSchema, GraphSchema, NodeMetadata, NodeSchema};
use crate::state::{State, StateSchema};

/// Result of a completed invocation.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Final state after the last tick's merge.
    pub final_state: State,
    /// Step names in dispatch order across all ticks.
    pub nodes_executed: Vec<String>,
    /// Number of ticks executed.
    pub ticks: u32,
}

impl ExecutionResult {
    /// The final state.
    #[must_use]
    pub fn state(&self) -> &State {
        &self.final_state
    }

    /// Consume the result, keeping only the final state.
    #[must_use]
    pub fn into_state(self) -> State {
        self.final_state
    }

    /// Step names in dispatch order.
    #[must_use]
    pub fn nodes_executed(&self) -> &[String] {
        &self.nodes_executed
    }
}

/// A validated, immutable graph plus per-handle execution configuration.
///
/// # Example
///
/// ```rust,ignore
/// let app = graph.compile()?
///     .with_recursion_limit(100)
///     .with_node_timeout(Duration::from_secs(30));
/// let result = app.invoke(initial_state).await?;
/// println!("{:?}", result.state());
/// ```
#[derive(Clone)]
pub struct CompiledGraph {
    pub(crate) schema: Arc<StateSchema>,
    pub(crate) nodes: Arc<IndexMap<String, BoxedNode>>,
    pub(crate) node_metadata: Arc<HashMap<String, NodeMetadata>>,
    pub(crate) edges: Arc<Vec<Edge>>,
    pub(crate) conditional_edges: Arc<Vec<ConditionalEdge>>,
    pub(crate) parallel_edges: Arc<Vec<ParallelEdge>>,
    pub(crate) entry_points: Arc<Vec<String>>,
    pub(crate) merge_policy: MergePolicy,

    pub(crate) name: Option<String>,
    pub(crate) recursion_limit: u32,
    pub(crate) node_timeout: Option<Duration>,
    pub(crate) graph_timeout: Option<Duration>,
    pub(crate) max_parallel_tasks: Option<usize>,
    pub(crate) cancellation: Option<CancellationToken>,
    pub(crate) cancellation_grace: Duration,
    pub(crate) callbacks: Vec<Arc<dyn GraphCallback>>,
    pub(crate) metrics_enabled: bool,
    pub(crate) metrics: Arc<Mutex<ExecutionMetrics>>,
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("name", &self.name)
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("edges", &self.edges)
            .field("conditional_edges", &self.conditional_edges.len())
            .field("parallel_edges", &self.parallel_edges)
            .field("entry_points", &self.entry_points)
            .field("merge_policy", &self.merge_policy)
            .field("recursion_limit", &self.recursion_limit)
            .field("node_timeout", &self.node_timeout)
            .field("graph_timeout", &self.graph_timeout)
            .field("max_parallel_tasks", &self.max_parallel_tasks)
            .field("cancellation_grace", &self.cancellation_grace)
            .field("callbacks", &self.callbacks.len())
            .field("metrics_enabled", &self.metrics_enabled)
            .finish()
    }
}

impl CompiledGraph {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        schema: StateSchema,
        nodes: IndexMap<String, BoxedNode>,
        node_metadata: HashMap<String, NodeMetadata>,
        edges: Vec<Edge>,
        conditional_edges: Vec<ConditionalEdge>,
        parallel_edges: Vec<ParallelEdge>,
        entry_points: Vec<String>,
        merge_policy: MergePolicy,
    ) -> Self {
        Self {
            schema: Arc::new(schema),
            nodes: Arc::new(nodes),
            node_metadata: Arc::new(node_metadata),
            edges: Arc::new(edges),
            conditional_edges: Arc::new(conditional_edges),
            parallel_edges: Arc::new(parallel_edges),
            entry_points: Arc::new(entry_points),
            merge_policy,
            name: None,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            node_timeout: None,
            graph_timeout: None,
            max_parallel_tasks: None,
            cancellation: None,
            cancellation_grace: DEFAULT_CANCELLATION_GRACE,
            callbacks: Vec::new(),
            metrics_enabled: true,
            metrics: Arc::new(Mutex::new(ExecutionMetrics::new())),
        }
    }

    /// Name this graph for spans and events.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Maximum number of ticks per invocation (default:
    /// [`DEFAULT_RECURSION_LIMIT`]). Exceeding it fails the invocation with
    /// [`Error::RecursionLimit`](crate::error::Error::RecursionLimit).
    #[must_use]
    pub fn with_recursion_limit(mut self, limit: u32) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Per-step timeout (default: [`DEFAULT_NODE_TIMEOUT`]). A step that
    /// exceeds it fails exactly like a step whose callable errored.
    #[must_use]
    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = Some(timeout);
        self
    }

    /// Whole-invocation timeout (default: [`DEFAULT_GRAPH_TIMEOUT`]).
    #[must_use]
    pub fn with_graph_timeout(mut self, timeout: Duration) -> Self {
        self.graph_timeout = Some(timeout);
        self
    }

    /// Cap on concurrently executing steps within a tick. `None` (the
    /// default) dispatches the whole frontier at once.
    #[must_use]
    pub fn with_max_parallel_tasks(mut self, limit: usize) -> Self {
        self.max_parallel_tasks = Some(limit);
        self
    }

    /// Cooperative cancellation token. Observed at tick boundaries and
    /// raced against in-flight dispatches; a cancelled tick's merge is
    /// never applied.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Grace window granted to in-flight steps after cancellation before
    /// they are abandoned (default: zero).
    #[must_use]
    pub fn with_cancellation_grace(mut self, grace: Duration) -> Self {
        self.cancellation_grace = grace;
        self
    }

    /// Register an execution observer.
    #[must_use]
    pub fn with_callback(mut self, callback: impl GraphCallback + 'static) -> Self {
        self.callbacks.push(Arc::new(callback));
        self
    }

    /// Enable or disable metrics collection (default: enabled).
    #[must_use]
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    /// Metrics of the most recent invocation through this handle.
    pub async fn metrics(&self) -> ExecutionMetrics {
        self.metrics.lock().await.clone()
    }

    pub(crate) fn emit_event(&self, event: GraphEvent) {
        for callback in &self.callbacks {
            callback.on_event(&event);
        }
    }

    // ------------------------------------------------------------------
    // Inspection API (read-only export; rendering is out of scope)
    // ------------------------------------------------------------------

    /// Entry frontier: START's successors, in declared order.
    #[must_use]
    pub fn entry_points(&self) -> &[String] {
        &self.entry_points
    }

    /// Registered step names, in registration order.
    #[must_use]
    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.keys().map(String::as_str).collect()
    }

    /// Number of steps in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edge declarations (direct + conditional + parallel),
    /// entry edges included.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.entry_points.len()
            + self.edges.len()
            + self.conditional_edges.len()
            + self.parallel_edges.len()
    }

    /// The state schema this graph executes over.
    #[must_use]
    pub fn state_schema(&self) -> &StateSchema {
        &self.schema
    }

    /// Export the graph's step and edge listing for external tooling.
    ///
    /// The export is pure data: step names with their metadata, every edge
    /// with its kind and (for conditional edges) its route keys. Feeding
    /// it back through [`ManifestImporter`](crate::manifest::ManifestImporter)
    /// with the original callables rebuilds an equivalent graph.
    #[must_use]
    pub fn export_schema(&self, name: impl Into<String>) -> GraphSchema {
        let mut schema = GraphSchema::new(name, self.entry_points.as_ref().clone());
        for node_name in self.nodes.keys() {
            let node_schema = match self.node_metadata.get(node_name) {
                Some(metadata) => NodeSchema::from_metadata(node_name, metadata),
                None => NodeSchema::from_name(node_name),
            };
            schema.add_node(node_schema);
        }
        for edge in self.edges.iter() {
            schema.add_edge(EdgeSchema::direct(edge.from.as_str(), edge.to.as_str()));
        }
        for cond in self.conditional_edges.iter() {
            schema.add_edge(EdgeSchema::conditional(
                cond.from.as_str(),
                cond.routes
                    .iter()
                    .map(|(key, target)| (key.clone(), (**target).clone())),
            ));
        }
        for par in self.parallel_edges.iter() {
            schema.add_edge(EdgeSchema::parallel(
                par.from.as_str(),
                par.to.iter().cloned(),
            ));
        }
        schema
    }

    /// Whether routing out of `node` can reach END in one hop.
    ///
    /// Inspection helper for tooling; the builder has already proven that
    /// some path exists from every step.
    #[must_use]
    pub fn routes_directly_to_end(&self, node: &str) -> bool {
        self.edges
            .iter()
            .any(|e| e.from.as_str() == node && e.to.as_str() == END)
            || self.conditional_edges.iter().any(|c| {
                c.from.as_str() == node && c.routes.values().any(|t| t.as_str() == END)
            })
    }
}
