//! Graph definition and compilation
//!
//! [`StateGraph`] is the mutable builder: register steps, declare edges,
//! then [`compile`](StateGraph::compile) into an immutable
//! [`CompiledGraph`](crate::executor::CompiledGraph). Compilation runs the
//! full static validation pass (name uniqueness, endpoint validity,
//! reachability from START, and a guaranteed path to END from every step)
//! exactly once; the engine never re-checks.
//!
//! Compilation consumes the builder, so a frozen graph cannot be mutated:
//! the type system discharges the freeze invariant instead of a run-time
//! guard.
//!
//! # Example
//!
//! ```rust
//! use stategraph::{StateGraph, StateSchema, StateUpdate, ValueKind, END};
//!
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
//! let app = graph.compile().expect("valid graph");
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use futures::future::BoxFuture;
use indexmap::IndexMap;

use crate::edge::{ConditionalEdge, Edge, ParallelEdge, END, START};
use crate::error::{Error, Result};
use crate::executor::CompiledGraph;
use crate::merge::MergePolicy;
use crate::node::{BoxedNode, FnNode, Node};
use crate::schema::NodeMetadata;
use crate::state::{State, StateSchema, StateUpdate};

/// Mutable graph builder.
///
/// Holds the state schema, the registered steps, and the declared edges
/// until [`compile`](StateGraph::compile) freezes them. The builder holds
/// no long-lived state after `compile` returns.
pub struct StateGraph {
    schema: StateSchema,
    nodes: IndexMap<String, BoxedNode>,
    node_metadata: HashMap<String, NodeMetadata>,
    edges: Vec<Edge>,
    conditional_edges: Vec<ConditionalEdge>,
    parallel_edges: Vec<ParallelEdge>,
    entry_points: Vec<String>,
    merge_policy: MergePolicy,
    duplicates: Vec<String>,
}

impl std::fmt::Debug for StateGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateGraph")
            .field("schema", &self.schema)
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("node_metadata", &self.node_metadata)
            .field("edges", &self.edges)
            .field("conditional_edges", &self.conditional_edges.len())
            .field("parallel_edges", &self.parallel_edges)
            .field("entry_points", &self.entry_points)
            .field("merge_policy", &self.merge_policy)
            .field("duplicates", &self.duplicates)
            .finish()
    }
}

impl StateGraph {
    /// Create a builder over a state schema.
    #[must_use]
    pub fn new(schema: StateSchema) -> Self {
        Self {
            schema,
            nodes: IndexMap::new(),
            node_metadata: HashMap::new(),
            edges: Vec::new(),
            conditional_edges: Vec::new(),
            parallel_edges: Vec::new(),
            entry_points: Vec::new(),
            merge_policy: MergePolicy::default(),
            duplicates: Vec::new(),
        }
    }

    /// Set the global merge policy (default: last-writer-wins).
    ///
    /// Per-field overrides in the [`StateSchema`] take precedence.
    #[must_use]
    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }

    /// Register a step. Names are identities; duplicates fail the eventual
    /// `compile()` with [`Error::DuplicateNodeName`].
    pub fn add_node(&mut self, name: impl Into<String>, node: impl Node + 'static) -> &mut Self {
        let name = name.into();
        if self.nodes.contains_key(&name) {
            self.duplicates.push(name);
            return self;
        }
        self.nodes.insert(name, Arc::new(node));
        self
    }

    /// Register a step from an async closure.
    pub fn add_node_from_fn<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(State) -> BoxFuture<'static, Result<StateUpdate>> + Send + Sync + 'static,
    {
        self.add_node(name, FnNode::new(f))
    }

    /// Register a step with metadata for schema export.
    pub fn add_node_with_metadata(
        &mut self,
        name: impl Into<String>,
        metadata: NodeMetadata,
        node: impl Node + 'static,
    ) -> &mut Self {
        let name = name.into();
        self.node_metadata.insert(name.clone(), metadata);
        self.add_node(name, node)
    }

    /// Declare the entry step. Equivalent to `add_edge(START, name)`.
    pub fn set_entry_point(&mut self, name: impl Into<String>) -> &mut Self {
        self.entry_points.push(name.into());
        self
    }

    /// Declare a direct edge. `add_edge(START, x)` declares an entry edge;
    /// multiple entry edges form a multi-step initial frontier.
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        let from = from.into();
        let to = to.into();
        if from == START {
            self.entry_points.push(to);
            return self;
        }
        self.edges.push(Edge {
            from: Arc::new(from),
            to: Arc::new(to),
        });
        self
    }

    /// Declare a conditional edge: `router` maps the post-merge state to a
    /// route key, looked up in `routes`. Targets may be [`END`]. Every key
    /// the router can produce must be mapped, or execution fails with
    /// [`Error::Routing`] when the unmapped key first appears.
    pub fn add_conditional_edges<R>(
        &mut self,
        from: impl Into<String>,
        router: R,
        routes: impl IntoIterator<Item = (String, String)>,
    ) -> &mut Self
    where
        R: Fn(&State) -> String + Send + Sync + 'static,
    {
        let routes: IndexMap<String, Arc<String>> = routes
            .into_iter()
            .map(|(key, target)| (key, Arc::new(target)))
            .collect();
        self.conditional_edges
            .push(ConditionalEdge::new(from.into(), Arc::new(router), routes));
        self
    }

    /// Declare a static fan-out: all `targets` join the next frontier.
    pub fn add_parallel_edges(
        &mut self,
        from: impl Into<String>,
        targets: Vec<String>,
    ) -> &mut Self {
        self.parallel_edges.push(ParallelEdge {
            from: Arc::new(from.into()),
            to: Arc::new(targets),
        });
        self
    }

    /// Registered step names, in registration order.
    #[must_use]
    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.keys().map(String::as_str).collect()
    }

    /// Validate and freeze.
    ///
    /// Validation order: duplicate names, entry presence, endpoint
    /// validity, single outgoing declaration per source, reachability from
    /// START (all conditional routes treated as possible), then reverse
    /// reachability to END. The first violation is returned; the builder
    /// is consumed either way.
    pub fn compile(self) -> Result<CompiledGraph> {
        if let Some(name) = self.duplicates.first() {
            return Err(Error::DuplicateNodeName(name.clone()));
        }
        if self.entry_points.is_empty() {
            return Err(Error::NoEntryPoint);
        }

        let registered =
            |name: &str| -> bool { self.nodes.contains_key(name) };

        // Entry edges: targets must be registered steps (END would make an
        // empty graph; reject it as a malformed edge).
        let mut entry_frontier: Vec<String> = Vec::new();
        for target in &self.entry_points {
            if target == END {
                return Err(Error::InvalidEdge(
                    "entry edge may not target END; the graph must dispatch at least one step"
                        .to_string(),
                ));
            }
            if !registered(target) {
                return Err(Error::UnknownStep {
                    name: target.clone(),
                    referenced_by: "entry point".to_string(),
                });
            }
            if !entry_frontier.iter().any(|n| n == target) {
                entry_frontier.push(target.clone());
            }
        }

        // One outgoing declaration per source; fan-out is expressed with
        // add_parallel_edges, not duplicate declarations.
        let mut sources: HashSet<&str> = HashSet::new();
        let all_sources = self
            .edges
            .iter()
            .map(|e| e.from.as_str())
            .chain(self.conditional_edges.iter().map(|c| c.from.as_str()))
            .chain(self.parallel_edges.iter().map(|p| p.from.as_str()));
        for from in all_sources {
            if from == END {
                return Err(Error::InvalidEdge("END has no outgoing edges".to_string()));
            }
            if !sources.insert(from) {
                return Err(Error::InvalidEdge(format!(
                    "step '{from}' declares more than one outgoing edge; express fan-out with add_parallel_edges()"
                )));
            }
        }

        // Endpoint validity.
        for edge in &self.edges {
            if !registered(edge.from.as_str()) {
                return Err(Error::UnknownStep {
                    name: (*edge.from).clone(),
                    referenced_by: format!("edge to '{}'", edge.to),
                });
            }
            if edge.to.as_str() != END && !registered(edge.to.as_str()) {
                return Err(Error::UnknownStep {
                    name: (*edge.to).clone(),
                    referenced_by: format!("edge from '{}'", edge.from),
                });
            }
        }
        for cond in &self.conditional_edges {
            if !registered(cond.from.as_str()) {
                return Err(Error::UnknownStep {
                    name: (*cond.from).clone(),
                    referenced_by: "conditional edge".to_string(),
                });
            }
            for (key, target) in &cond.routes {
                if target.as_str() != END && !registered(target.as_str()) {
                    return Err(Error::UnknownStep {
                        name: (**target).clone(),
                        referenced_by: format!(
                            "route '{key}' of conditional edge from '{}'",
                            cond.from
                        ),
                    });
                }
            }
        }
        for par in &self.parallel_edges {
            if !registered(par.from.as_str()) {
                return Err(Error::UnknownStep {
                    name: (*par.from).clone(),
                    referenced_by: "parallel edge".to_string(),
                });
            }
            if par.to.is_empty() {
                return Err(Error::InvalidEdge(format!(
                    "parallel edge from '{}' has no targets",
                    par.from
                )));
            }
            for target in par.to.iter() {
                if target != END && !registered(target) {
                    return Err(Error::UnknownStep {
                        name: target.clone(),
                        referenced_by: format!("parallel edge from '{}'", par.from),
                    });
                }
            }
        }

        // Forward adjacency, all conditional routes treated as possible.
        let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.edges {
            successors
                .entry(edge.from.as_str())
                .or_default()
                .push(edge.to.as_str());
        }
        for cond in &self.conditional_edges {
            let entry = successors.entry(cond.from.as_str()).or_default();
            for target in cond.routes.values() {
                entry.push(target.as_str());
            }
        }
        for par in &self.parallel_edges {
            let entry = successors.entry(par.from.as_str()).or_default();
            for target in par.to.iter() {
                entry.push(target.as_str());
            }
        }

        // Reachability from START.
        let mut reachable: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = entry_frontier.iter().map(String::as_str).collect();
        while let Some(current) = queue.pop_front() {
            if current == END || !reachable.insert(current) {
                continue;
            }
            if let Some(nexts) = successors.get(current) {
                queue.extend(nexts.iter().copied());
            }
        }
        for name in self.nodes.keys() {
            if !reachable.contains(name.as_str()) {
                return Err(Error::UnreachableStep(name.clone()));
            }
        }

        // Reverse reachability to END: a step terminates if any successor
        // is END or itself terminates.
        let mut predecessors: HashMap<&str, Vec<&str>> = HashMap::new();
        for (from, nexts) in &successors {
            for next in nexts.iter() {
                predecessors.entry(*next).or_default().push(*from);
            }
        }
        let mut terminating: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = predecessors
            .get(END)
            .map(|preds| preds.iter().copied().collect())
            .unwrap_or_default();
        while let Some(current) = queue.pop_front() {
            if !terminating.insert(current) {
                continue;
            }
            if let Some(preds) = predecessors.get(current) {
                queue.extend(preds.iter().copied());
            }
        }
        // Prefer naming a pure sink (no outgoing declaration at all) as the
        // offender; it is the root cause of every upstream dead end.
        let mut offender: Option<&String> = None;
        for name in self.nodes.keys() {
            if terminating.contains(name.as_str()) {
                continue;
            }
            if successors.get(name.as_str()).map_or(true, Vec::is_empty) {
                offender = Some(name);
                break;
            }
            if offender.is_none() {
                offender = Some(name);
            }
        }
        if let Some(name) = offender {
            return Err(Error::DeadEnd(name.clone()));
        }

        Ok(CompiledGraph::from_parts(
            self.schema,
            self.nodes,
            self.node_metadata,
            self.edges,
            self.conditional_edges,
            self.parallel_edges,
            entry_frontier,
            self.merge_policy,
        ))
    }
}
