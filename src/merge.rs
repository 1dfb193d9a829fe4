//! State merge policies
//!
//! When a tick dispatches more than one step, their partial updates are
//! combined into one state before any next-tick step observes it. Merging
//! is per-field and deterministic: updates are folded in frontier declared
//! order (step-registration order), never completion order, so concurrent
//! execution cannot change the outcome.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::state::{State, StateSchema, StateUpdate};

/// Caller-supplied associative combiner for a single field.
///
/// Receives the field's working value (the base value, or the result of
/// earlier same-tick updates) and the incoming value.
pub type Reducer = Arc<dyn Fn(&mut Value, Value) + Send + Sync>;

/// Strategy for combining same-tick updates to one field.
///
/// Set globally with
/// [`StateGraph::with_merge_policy`](crate::graph::StateGraph::with_merge_policy)
/// and overridable per field in the [`StateSchema`]. A policy is total over
/// any schema-compatible update and never needs knowledge of unrelated
/// fields.
#[derive(Clone, Default)]
pub enum MergePolicy {
    /// Later frontier-order writer replaces earlier ones. The default.
    #[default]
    LastWriterWins,
    /// Concatenate in frontier order. For sequence-typed fields; a
    /// non-array incoming value is pushed as a single element.
    Append,
    /// Two same-tick writers with different values fail the invocation
    /// with [`Error::MergeConflict`]. Identical values are not a conflict.
    ErrorOnConflict,
    /// Caller-supplied reducer applied in frontier order.
    Custom(Reducer),
}

impl fmt::Debug for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergePolicy::LastWriterWins => f.write_str("LastWriterWins"),
            MergePolicy::Append => f.write_str("Append"),
            MergePolicy::ErrorOnConflict => f.write_str("ErrorOnConflict"),
            MergePolicy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl MergePolicy {
    /// Wrap a reducer closure.
    pub fn custom(reducer: impl Fn(&mut Value, Value) + Send + Sync + 'static) -> Self {
        MergePolicy::Custom(Arc::new(reducer))
    }
}

/// Fold a tick's updates into `base`, in the given (frontier) order.
///
/// `updates` pairs each producing step's name with its update; the names
/// only feed conflict diagnostics. Single-update ticks go through the same
/// path so sequential and parallel execution share one semantics.
pub(crate) fn merge_updates(
    schema: &StateSchema,
    default_policy: &MergePolicy,
    base: &State,
    updates: &[(String, StateUpdate)],
    tick: u32,
) -> Result<State> {
    let mut merged = base.clone();
    // First writer per field this tick, for conflict detection.
    let mut writers: HashMap<String, (String, Value)> = HashMap::new();

    for (node, update) in updates {
        for (field, value) in update.iter() {
            let policy = schema
                .spec(field)
                .and_then(|spec| spec.policy.as_ref())
                .unwrap_or(default_policy);

            match policy {
                MergePolicy::LastWriterWins => {
                    merged.set(field.clone(), value.clone());
                }
                MergePolicy::Append => {
                    append_value(&mut merged, field, value.clone());
                }
                MergePolicy::ErrorOnConflict => {
                    if let Some((first_node, first_value)) = writers.get(field) {
                        if first_value != value {
                            return Err(Error::MergeConflict {
                                field: field.clone(),
                                tick,
                                left_node: first_node.clone(),
                                right_node: node.clone(),
                            });
                        }
                        // Same value from both writers: nothing further to do.
                    } else {
                        writers.insert(field.clone(), (node.clone(), value.clone()));
                        merged.set(field.clone(), value.clone());
                    }
                }
                MergePolicy::Custom(reducer) => {
                    match merged.get_mut(field) {
                        Some(slot) => reducer(slot, value.clone()),
                        None => {
                            let mut slot = Value::Null;
                            reducer(&mut slot, value.clone());
                            merged.set(field.clone(), slot);
                        }
                    }
                }
            }
        }
    }

    Ok(merged)
}

/// Append semantics: the field becomes a list; incoming arrays are
/// concatenated element-wise, scalars pushed whole.
fn append_value(state: &mut State, field: &str, incoming: Value) {
    let mut elements = match incoming {
        Value::Array(items) => items,
        other => vec![other],
    };
    match state.get_mut(field) {
        Some(Value::Array(existing)) => existing.append(&mut elements),
        _ => state.set(field.to_string(), Value::Array(elements)),
    }
}
