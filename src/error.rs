//! Error types for stategraph
//!
//! All errors include:
//! 1. What went wrong
//! 2. Why it's a problem
//! 3. How to fix it (with code snippets when applicable)
//!
//! Build-time errors are reported synchronously from
//! [`StateGraph::compile`](crate::graph::StateGraph::compile). Run-time
//! errors halt the invocation immediately and carry the step name, tick
//! number, and a snapshot of the last fully-merged state where that helps
//! diagnosis without re-running.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::state::{State, ValueKind};

/// An actionable suggestion for fixing an error, including optional code snippets.
///
/// # Example
///
/// ```rust
/// use stategraph::error::ActionableSuggestion;
///
/// let suggestion = ActionableSuggestion::new(
///     "Give every step a path to END"
/// ).with_code_snippet(r#"
/// graph.add_edge("last_step", END);
/// "#);
///
/// println!("{}", suggestion);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionableSuggestion {
    /// Human-readable explanation of the fix
    pub description: String,
    /// Optional code snippet showing the fix
    pub code_snippet: Option<String>,
    /// Related documentation URL (if any)
    pub doc_url: Option<String>,
}

impl ActionableSuggestion {
    /// Create a new suggestion with just a description
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            code_snippet: None,
            doc_url: None,
        }
    }

    /// Add a code snippet to the suggestion
    #[must_use]
    pub fn with_code_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.code_snippet = Some(snippet.into());
        self
    }

    /// Add a documentation URL to the suggestion
    #[must_use]
    pub fn with_doc_url(mut self, url: impl Into<String>) -> Self {
        self.doc_url = Some(url.into());
        self
    }
}

impl fmt::Display for ActionableSuggestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description)?;
        if let Some(snippet) = &self.code_snippet {
            write!(f, "\n\n```rust{}\n```", snippet)?;
        }
        if let Some(url) = &self.doc_url {
            write!(f, "\n\nSee: {}", url)?;
        }
        Ok(())
    }
}

/// Trait for errors that provide actionable suggestions with code snippets.
///
/// # Example
///
/// ```rust
/// use stategraph::error::{Error, ActionableError};
///
/// fn handle_error(err: &Error) {
///     eprintln!("Error: {}", err);
///     if let Some(suggestion) = err.suggestion() {
///         eprintln!("\nHow to fix:\n{}", suggestion);
///     }
/// }
/// ```
pub trait ActionableError {
    /// Returns an actionable suggestion for fixing this error, if available.
    fn suggestion(&self) -> Option<ActionableSuggestion>;

    /// Returns true if this error has an actionable suggestion.
    fn has_suggestion(&self) -> bool {
        self.suggestion().is_some()
    }

    /// Formats the error with its suggestion for display.
    fn format_with_suggestion(&self) -> String
    where
        Self: fmt::Display,
    {
        let base = self.to_string();
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHow to fix:\n{}", base, suggestion),
            None => base,
        }
    }
}

/// stategraph error types
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    /// Duplicate step name registered on the builder
    #[error("Step '{0}' already registered in graph. Step names are the step identity and must be unique.")]
    DuplicateNodeName(String),

    /// Graph has no entry edge out of START
    #[error("Graph has no entry point defined")]
    NoEntryPoint,

    /// An edge references a step name that was never registered
    #[error("Unknown step '{name}' referenced by {referenced_by}")]
    UnknownStep {
        /// The unregistered step name.
        name: String,
        /// Where the reference came from (edge, route key, entry point).
        referenced_by: String,
    },

    /// A registered step cannot be reached from START
    #[error("Step '{0}' is unreachable from START. Every registered step must lie on some path out of the entry edge(s).")]
    UnreachableStep(String),

    /// A registered step has no path to END
    #[error("Step '{0}' has no path to END. Every step needs at least one route (direct, conditional, or parallel) that eventually reaches END.")]
    DeadEnd(String),

    /// Structurally invalid edge declaration
    #[error("Invalid edge: {0}")]
    InvalidEdge(String),

    /// Conditional router produced a route key with no mapped target
    #[error("Routing error at step '{node}' (tick {tick}): router returned '{route_key}' but no route exists for it")]
    Routing {
        /// Step whose conditional edge was evaluated.
        node: String,
        /// Tick on which routing failed.
        tick: u32,
        /// The unmapped route key the router produced.
        route_key: String,
    },

    /// A step's callable failed
    #[error("Step execution error in '{node}' (tick {tick}): {source}")]
    NodeExecution {
        /// Name of the step that failed.
        node: String,
        /// Tick on which the step was dispatched.
        tick: u32,
        /// Last fully-merged state before the failing tick. Diagnostic
        /// only; not a valid final state.
        state: Box<State>,
        /// The underlying error that occurred.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Two same-tick updates wrote different values to one field under the
    /// error-on-conflict policy
    #[error("Merge conflict on field '{field}' (tick {tick}): steps '{left_node}' and '{right_node}' wrote different values")]
    MergeConflict {
        /// Field both updates touched.
        field: String,
        /// Tick on which the conflict occurred.
        tick: u32,
        /// Earlier writer in frontier order.
        left_node: String,
        /// Later writer in frontier order.
        right_node: String,
    },

    /// Tick bound exceeded
    #[error("Recursion limit of {limit} ticks reached. Graph execution exceeded the maximum number of dispatch rounds. This may indicate a conditional loop that never routes to END. Use with_recursion_limit() to raise the bound if the loop is intentional.")]
    RecursionLimit {
        /// The tick limit that was exceeded.
        limit: u32,
    },

    /// Invocation was cancelled cooperatively
    #[error("Execution cancelled at tick {tick}; the in-flight tick's merge was not applied")]
    Cancelled {
        /// Tick that was in flight when cancellation was observed.
        tick: u32,
    },

    /// Execution timeout
    #[error("Execution timeout after {0:?}")]
    Timeout(Duration),

    /// A state value or update referenced a field the schema does not declare
    #[error("Unknown field '{field}' referenced by {referenced_by}; updates may only touch fields declared in the state schema")]
    UnknownField {
        /// The undeclared field name.
        field: String,
        /// Who referenced it (initial state, or a step name).
        referenced_by: String,
    },

    /// A state value did not match the declared field kind
    #[error("Field '{field}' expects {expected} but got {actual}")]
    FieldTypeMismatch {
        /// The offending field name.
        field: String,
        /// Kind declared in the schema.
        expected: ValueKind,
        /// Short description of the value that was supplied.
        actual: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal execution error (should not happen in normal operation)
    #[error("Internal execution error: {0}")]
    InternalExecutionError(String),
}

/// Result type for stategraph operations
pub type Result<T> = std::result::Result<T, Error>;

impl ActionableError for Error {
    fn suggestion(&self) -> Option<ActionableSuggestion> {
        match self {
            Error::NoEntryPoint => Some(
                ActionableSuggestion::new(
                    "Set an entry point for your graph using set_entry_point() or an edge out of START"
                ).with_code_snippet(r#"
let mut graph = StateGraph::new(schema);
graph.add_node_from_fn("plan", plan_step);
graph.set_entry_point("plan");  // <-- Add this
graph.add_edge("plan", END);
"#)
            ),

            Error::UnknownStep { name, referenced_by } => Some(
                ActionableSuggestion::new(
                    format!("Register the missing step '{}' before referencing it from {}", name, referenced_by)
                ).with_code_snippet(format!(r#"
// Register the step before declaring edges to it:
graph.add_node_from_fn("{}", your_step);

// Or if this is a typo, compare against the registered names:
// graph.node_names()
"#, name))
            ),

            Error::DuplicateNodeName(name) => Some(
                ActionableSuggestion::new(
                    "Use a unique name for every step"
                ).with_code_snippet(format!(r#"
// Step names are identities; pick a distinct one:
graph.add_node_from_fn("{}_v2", new_step);
"#, name))
            ),

            Error::UnreachableStep(name) => Some(
                ActionableSuggestion::new(
                    format!("Connect '{}' to the graph, or remove it", name)
                ).with_code_snippet(format!(r#"
// Give the step an incoming edge on some path from START:
graph.add_edge("earlier_step", "{}");

// Conditional routes count as reachable paths too:
graph.add_conditional_edges("router", route_fn, routes);
"#, name))
            ),

            Error::DeadEnd(name) => Some(
                ActionableSuggestion::new(
                    format!("Give '{}' an outgoing route that reaches END", name)
                ).with_code_snippet(format!(r#"
// Direct edge:
graph.add_edge("{}", END);

// Or a conditional route where at least one target reaches END:
graph.add_conditional_edges("{}", route_fn, routes);
"#, name, name))
            ),

            Error::Routing { node, route_key, .. } => Some(
                ActionableSuggestion::new(
                    format!("Map route key '{}' in the conditional edge from '{}'", route_key, node)
                ).with_code_snippet(format!(r#"
// Every key the router can return must be mapped:
let mut routes = HashMap::new();
routes.insert("{}".to_string(), "next_step".to_string());
graph.add_conditional_edges("{}", route_fn, routes);
"#, route_key, node))
            ),

            Error::RecursionLimit { limit } => Some(
                ActionableSuggestion::new(
                    format!("Recursion limit of {} ticks reached. This may indicate a loop that never routes to END.", limit)
                ).with_code_snippet(format!(r#"
// Option 1: Raise the bound if the loop is intentional
let app = graph.compile()?
    .with_recursion_limit({});  // Increase from {}

// Option 2: Add a termination condition to the conditional edge
graph.add_conditional_edges("router", |state| {{
    if state.get_u64("iterations").unwrap_or(0) > 100 {{
        "done".to_string()  // <-- Routes to END
    }} else {{
        "continue".to_string()
    }}
}}, routes);
"#, limit * 2, limit))
            ),

            Error::MergeConflict { field, left_node, right_node, .. } => Some(
                ActionableSuggestion::new(
                    format!("Steps '{}' and '{}' both write '{}' in the same tick", left_node, right_node, field)
                ).with_code_snippet(format!(r#"
// Option 1: Declare a per-field policy that tolerates the overlap
let schema = StateSchema::new()
    .field_with_policy("{}", ValueKind::List, MergePolicy::Append);

// Option 2: Keep error-on-conflict and make the writers disjoint
// (each parallel branch owns its own fields)
"#, field))
            ),

            Error::Timeout(duration) => Some(
                ActionableSuggestion::new(
                    format!("Increase the timeout (currently {:?}) or optimize your steps", duration)
                ).with_code_snippet(r#"
// Whole-invocation timeout:
let app = graph.compile()?
    .with_graph_timeout(Duration::from_secs(600));

// Per-step timeout:
let app = graph.compile()?
    .with_node_timeout(Duration::from_secs(120));
"#)
            ),

            _ => None,
        }
    }
}
