//! Graph reconstruction from an exported schema
//!
//! An exported [`GraphSchema`](crate::schema::GraphSchema) is pure data:
//! it names steps and edges but cannot carry the callables. This module
//! bridges the gap with registries ([`NodeRegistry`] supplies step
//! implementations by name or by step type, [`ConditionRegistry`]
//! supplies routers for conditional edges) so a listing exported with
//! [`export_schema`](crate::executor::CompiledGraph::export_schema) can be
//! imported back into an equivalent [`StateGraph`].
//!
//! # Example
//!
//! ```rust,ignore
//! use stategraph::manifest::{ManifestImporter, NodeRegistry, ConditionRegistry};
//!
//! let mut nodes = NodeRegistry::new();
//! nodes.register_fn("inc", |_schema| Ok(Arc::new(IncrementStep) as BoxedNode));
//!
//! let mut conditions = ConditionRegistry::new();
//! conditions.register("inc", |state| {
//!     if state.get_i64("count").unwrap_or(0) < 3 { "again" } else { "done" }.to_string()
//! });
//!
//! let exported = app.export_schema("counter");
//! let rebuilt = ManifestImporter::new(&nodes)
//!     .with_conditions(&conditions)
//!     .import(&exported, state_schema)?;
//! let rebuilt_app = rebuilt.compile()?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::edge::RouterFn;
use crate::graph::StateGraph;
use crate::node::BoxedNode;
use crate::schema::{EdgeType, GraphSchema, NodeMetadata, NodeSchema};
use crate::state::{State, StateSchema};

/// Errors that can occur during manifest import
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ManifestImportError {
    /// A step in the schema has no corresponding factory
    #[error("No factory registered for step '{node_name}'. Register one with NodeRegistry::register(\"{node_name}\", factory) or under its step type.")]
    MissingNodeFactory {
        /// Step name from the schema that could not be constructed.
        node_name: String,
    },
    /// Step factory failed to create the step
    #[error("Failed to create step '{node_name}': {error}")]
    NodeCreationFailed {
        /// Step name from the schema that failed to construct.
        node_name: String,
        /// Human-readable error message from the factory.
        error: String,
    },
    /// A conditional edge has no registered router
    #[error("No router registered for conditional edge from '{edge_from}'. Register one with ConditionRegistry::register(\"{edge_from}\", router).")]
    MissingCondition {
        /// Source step name of the conditional edge.
        edge_from: String,
    },
    /// An edge entry is structurally incomplete
    #[error("Malformed edge from '{from}': {message}")]
    MalformedEdge {
        /// Source step name of the edge.
        from: String,
        /// Human-readable reason the edge was rejected.
        message: String,
    },
    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Factory trait for creating steps when importing a schema
///
/// The factory receives the step's [`NodeSchema`] entry, so one factory
/// registered under a step *type* can specialize per step using the
/// schema's attributes.
pub trait NodeFactory: Send + Sync {
    /// Create the step for a schema entry.
    fn create(&self, node: &NodeSchema) -> Result<BoxedNode, ManifestImportError>;
}

impl<F> NodeFactory for F
where
    F: Fn(&NodeSchema) -> Result<BoxedNode, ManifestImportError> + Send + Sync,
{
    fn create(&self, node: &NodeSchema) -> Result<BoxedNode, ManifestImportError> {
        self(node)
    }
}

/// Registry of step factories, keyed by step name or step-type name
///
/// Lookup order during import: exact step name first, then the step
/// type's serialized name (`"transform"`, `"llm"`, `"tool"`, ...).
#[derive(Default)]
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a step name or step-type name
    pub fn register(&mut self, key: impl Into<String>, factory: impl NodeFactory + 'static) {
        self.factories.insert(key.into(), Arc::new(factory));
    }

    /// Registered keys
    #[must_use]
    pub fn list_types(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    fn resolve(&self, node: &NodeSchema) -> Option<&Arc<dyn NodeFactory>> {
        if let Some(factory) = self.factories.get(&node.name) {
            return Some(factory);
        }
        let type_key = serde_json::to_value(&node.node_type)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))?;
        self.factories.get(&type_key)
    }
}

/// Registry of routers for conditional edges, keyed by source step name
#[derive(Default)]
pub struct ConditionRegistry {
    routers: HashMap<String, RouterFn>,
}

impl ConditionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the router for the conditional edge out of `from`
    pub fn register(
        &mut self,
        from: impl Into<String>,
        router: impl Fn(&State) -> String + Send + Sync + 'static,
    ) {
        self.routers.insert(from.into(), Arc::new(router));
    }

    fn resolve(&self, from: &str) -> Option<RouterFn> {
        self.routers.get(from).cloned()
    }
}

/// Builder for constructing a [`StateGraph`] from an exported schema
pub struct ManifestImporter<'a> {
    nodes: &'a NodeRegistry,
    conditions: Option<&'a ConditionRegistry>,
}

impl<'a> ManifestImporter<'a> {
    /// Create an importer over a step registry
    #[must_use]
    pub fn new(nodes: &'a NodeRegistry) -> Self {
        Self {
            nodes,
            conditions: None,
        }
    }

    /// Supply routers for conditional edges
    #[must_use]
    pub fn with_conditions(mut self, conditions: &'a ConditionRegistry) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Rebuild a [`StateGraph`] from an exported listing.
    ///
    /// The result is an ordinary builder: compile it to re-run the full
    /// validation pass. A graph rebuilt from its own export with the
    /// original callables accepts the same initial states as the
    /// original.
    pub fn import(
        &self,
        schema: &GraphSchema,
        state_schema: StateSchema,
    ) -> Result<StateGraph, ManifestImportError> {
        let mut graph = StateGraph::new(state_schema);

        for node in &schema.nodes {
            let factory =
                self.nodes
                    .resolve(node)
                    .ok_or_else(|| ManifestImportError::MissingNodeFactory {
                        node_name: node.name.clone(),
                    })?;
            let built = factory.create(node)?;
            graph.add_node_with_metadata(
                node.name.clone(),
                NodeMetadata {
                    description: node.description.clone(),
                    node_type: node.node_type.clone(),
                    input_fields: node.input_fields.clone(),
                    output_fields: node.output_fields.clone(),
                    attributes: node.attributes.clone(),
                },
                SharedNode(built),
            );
        }

        for entry in &schema.entry_points {
            graph.set_entry_point(entry.clone());
        }

        for edge in &schema.edges {
            match edge.edge_type {
                EdgeType::Direct => {
                    graph.add_edge(edge.from.clone(), edge.to.clone());
                }
                EdgeType::Conditional => {
                    let routes =
                        edge.routes
                            .as_ref()
                            .ok_or_else(|| ManifestImportError::MalformedEdge {
                                from: edge.from.clone(),
                                message: "conditional edge without a route table".to_string(),
                            })?;
                    let router = self
                        .conditions
                        .and_then(|c| c.resolve(&edge.from))
                        .ok_or_else(|| ManifestImportError::MissingCondition {
                            edge_from: edge.from.clone(),
                        })?;
                    let route_pairs: Vec<(String, String)> = routes
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    let router_clone = Arc::clone(&router);
                    graph.add_conditional_edges(
                        edge.from.clone(),
                        move |state: &State| router_clone(state),
                        route_pairs,
                    );
                }
                EdgeType::Parallel => {
                    let targets =
                        edge.targets
                            .clone()
                            .ok_or_else(|| ManifestImportError::MalformedEdge {
                                from: edge.from.clone(),
                                message: "parallel edge without targets".to_string(),
                            })?;
                    graph.add_parallel_edges(edge.from.clone(), targets);
                }
            }
        }

        Ok(graph)
    }
}

/// Adapter so an already-built [`BoxedNode`] can be re-registered on a
/// fresh builder.
struct SharedNode(BoxedNode);

#[async_trait::async_trait]
impl crate::node::Node for SharedNode {
    async fn execute(
        &self,
        state: State,
    ) -> crate::error::Result<crate::state::StateUpdate> {
        self.0.execute(state).await
    }
}
