//! Graph Schema Export
//!
//! This module provides types for exporting graph structure and metadata
//! for visualization and introspection purposes. The export is pure data;
//! rendering is out of scope. Paired with a
//! [`NodeRegistry`](crate::manifest::NodeRegistry), an exported schema can
//! be imported back into an equivalent [`StateGraph`](crate::graph::StateGraph)
//! (see [`crate::manifest`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use stategraph::schema::{NodeMetadata, NodeType};
//!
//! graph.add_node_with_metadata(
//!     "researcher",
//!     NodeMetadata::new("Gathers research from multiple sources")
//!         .with_node_type(NodeType::Tool)
//!         .with_input_fields(vec!["topic"])
//!         .with_output_fields(vec!["findings"]),
//!     research_step,
//! );
//!
//! let app = graph.compile()?;
//! let schema = app.export_schema("my-graph");
//! println!("{}", schema.to_json_pretty()?);
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Type of step in the graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Generic transformation step
    #[default]
    Transform,
    /// Step that calls an LLM
    Llm,
    /// Step that uses external tools
    Tool,
    /// Step that makes routing decisions
    Router,
    /// Step that aggregates data from multiple sources
    Aggregator,
    /// Step that validates or filters data
    Validator,
    /// Custom step type with description
    Custom(String),
}

impl NodeType {
    /// Get a display name for the step type
    #[must_use]
    pub fn display_name(&self) -> &str {
        match self {
            NodeType::Transform => "Transform",
            NodeType::Llm => "LLM",
            NodeType::Tool => "Tool",
            NodeType::Router => "Router",
            NodeType::Aggregator => "Aggregator",
            NodeType::Validator => "Validator",
            NodeType::Custom(name) => name,
        }
    }
}

/// Metadata for a single step
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeMetadata {
    /// Human-readable description of what this step does
    pub description: Option<String>,
    /// Type of step (LLM, Tool, Transform, etc.)
    pub node_type: NodeType,
    /// Fields from state that this step reads
    pub input_fields: Vec<String>,
    /// Fields in state that this step modifies
    pub output_fields: Vec<String>,
    /// Additional custom attributes
    pub attributes: HashMap<String, String>,
}

impl NodeMetadata {
    /// Create new metadata with a description
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..Default::default()
        }
    }

    /// Create empty metadata
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Set the step type
    #[must_use]
    pub fn with_node_type(mut self, node_type: NodeType) -> Self {
        self.node_type = node_type;
        self
    }

    /// Set input fields
    #[must_use]
    pub fn with_input_fields(mut self, fields: Vec<impl Into<String>>) -> Self {
        self.input_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Set output fields
    #[must_use]
    pub fn with_output_fields(mut self, fields: Vec<impl Into<String>>) -> Self {
        self.output_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Add a custom attribute
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Schema for a single step in the graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSchema {
    /// Step name (unique identifier)
    pub name: String,
    /// Human-readable description
    pub description: Option<String>,
    /// Type of step
    pub node_type: NodeType,
    /// Fields this step reads from state
    pub input_fields: Vec<String>,
    /// Fields this step writes to state
    pub output_fields: Vec<String>,
    /// Custom attributes
    pub attributes: HashMap<String, String>,
}

impl NodeSchema {
    /// Create a basic step schema from just a name
    pub fn from_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            node_type: NodeType::Transform,
            input_fields: Vec::new(),
            output_fields: Vec::new(),
            attributes: HashMap::new(),
        }
    }

    /// Create a step schema from name and metadata
    pub fn from_metadata(name: impl Into<String>, metadata: &NodeMetadata) -> Self {
        Self {
            name: name.into(),
            description: metadata.description.clone(),
            node_type: metadata.node_type.clone(),
            input_fields: metadata.input_fields.clone(),
            output_fields: metadata.output_fields.clone(),
            attributes: metadata.attributes.clone(),
        }
    }
}

/// Type of edge in the graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    /// Simple direct edge
    Direct,
    /// Conditional edge with routing logic
    Conditional,
    /// Parallel fan-out edge
    Parallel,
}

/// Schema for an edge in the graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSchema {
    /// Source step name
    pub from: String,
    /// Target step name (or "__end__" for terminal); for conditional and
    /// parallel edges, a rendered summary of the targets
    pub to: String,
    /// Type of edge
    pub edge_type: EdgeType,
    /// For conditional edges, the route key to target table
    pub routes: Option<IndexMap<String, String>>,
    /// For parallel edges, the fan-out targets
    pub targets: Option<Vec<String>>,
}

impl EdgeSchema {
    /// Create a direct edge
    pub fn direct(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            edge_type: EdgeType::Direct,
            routes: None,
            targets: None,
        }
    }

    /// Create a conditional edge from its route table
    pub fn conditional(
        from: impl Into<String>,
        routes: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        let routes: IndexMap<String, String> = routes.into_iter().collect();
        let to = routes
            .values()
            .cloned()
            .collect::<Vec<_>>()
            .join(" | ");
        Self {
            from: from.into(),
            to,
            edge_type: EdgeType::Conditional,
            routes: Some(routes),
            targets: None,
        }
    }

    /// Create a parallel edge from its fan-out targets
    pub fn parallel(
        from: impl Into<String>,
        targets: impl IntoIterator<Item = String>,
    ) -> Self {
        let targets: Vec<String> = targets.into_iter().collect();
        Self {
            from: from.into(),
            to: format!("[{}]", targets.join(", ")),
            edge_type: EdgeType::Parallel,
            routes: None,
            targets: Some(targets),
        }
    }
}

/// Complete schema for a graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSchema {
    /// Graph name/identifier
    pub name: String,
    /// Graph version (for schema evolution)
    pub version: String,
    /// Human-readable description of the graph
    pub description: Option<String>,
    /// All steps in the graph
    pub nodes: Vec<NodeSchema>,
    /// All edges in the graph (entry edges excluded; see `entry_points`)
    pub edges: Vec<EdgeSchema>,
    /// Entry frontier: START's successors in declared order
    pub entry_points: Vec<String>,
    /// Additional metadata
    pub metadata: HashMap<String, String>,
}

impl GraphSchema {
    /// Create a new graph schema
    pub fn new(name: impl Into<String>, entry_points: Vec<String>) -> Self {
        Self {
            name: name.into(),
            version: "1.0.0".to_string(),
            description: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            entry_points,
            metadata: HashMap::new(),
        }
    }

    /// Add a description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a step schema
    pub fn add_node(&mut self, node: NodeSchema) {
        self.nodes.push(node);
    }

    /// Add an edge schema
    pub fn add_edge(&mut self, edge: EdgeSchema) {
        self.edges.push(edge);
    }

    /// Get a step by name
    #[must_use]
    pub fn get_node(&self, name: &str) -> Option<&NodeSchema> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Get all outgoing edges from a step
    #[must_use]
    pub fn get_outgoing_edges(&self, from: &str) -> Vec<&EdgeSchema> {
        self.edges.iter().filter(|e| e.from == from).collect()
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Convert to pretty JSON string
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
