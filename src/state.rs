//! Shared state, partial updates, and the state schema
//!
//! State is an ordered mapping from field name to [`serde_json::Value`],
//! shaped by a [`StateSchema`] that is fixed for the graph's lifetime.
//! Steps never mutate state in place: each dispatch receives a snapshot and
//! returns a [`StateUpdate`] naming only the fields it changed. The engine
//! owns the merge (see [`crate::merge`]).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{Error, Result};
use crate::merge::MergePolicy;

/// Expected kind of a state field's value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Boolean
    Bool,
    /// Integer (i64/u64 range)
    Integer,
    /// Any JSON number
    Float,
    /// UTF-8 string
    String,
    /// JSON array
    List,
    /// JSON object
    Object,
    /// No constraint
    #[default]
    Any,
}

impl ValueKind {
    /// Whether `value` is acceptable for this kind. Null is acceptable for
    /// every kind (absent-but-declared).
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ValueKind::Any => true,
            _ if value.is_null() => true,
            ValueKind::Bool => value.is_boolean(),
            ValueKind::Integer => value.as_i64().is_some() || value.as_u64().is_some(),
            ValueKind::Float => value.is_number(),
            ValueKind::String => value.is_string(),
            ValueKind::List => value.is_array(),
            ValueKind::Object => value.is_object(),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Bool => "bool",
            ValueKind::Integer => "integer",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::List => "list",
            ValueKind::Object => "object",
            ValueKind::Any => "any",
        };
        f.write_str(name)
    }
}

/// Declaration of a single state field.
#[derive(Debug, Clone, Default)]
pub struct FieldSpec {
    /// Expected value kind.
    pub kind: ValueKind,
    /// Per-field merge policy override; `None` falls back to the graph's
    /// global policy.
    pub policy: Option<MergePolicy>,
    /// Value filled into an initial state that omits this field.
    pub default: Option<Value>,
}

/// Ordered set of declared state fields.
///
/// The field set is stable across the graph's lifetime; an update may
/// reference only declared fields. Declaration order is preserved (it is
/// the iteration order of [`State`]).
///
/// # Example
///
/// ```rust
/// use stategraph::{StateSchema, ValueKind, MergePolicy};
///
/// let schema = StateSchema::new()
///     .field("question", ValueKind::String)
///     .field_with_default("count", ValueKind::Integer, 0.into())
///     .field_with_policy("findings", ValueKind::List, MergePolicy::Append);
/// ```
#[derive(Debug, Clone, Default)]
pub struct StateSchema {
    fields: IndexMap<String, FieldSpec>,
}

impl StateSchema {
    /// Create an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field. Re-declaring a name replaces the earlier spec.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.fields.insert(
            name.into(),
            FieldSpec {
                kind,
                ..FieldSpec::default()
            },
        );
        self
    }

    /// Declare a field with a per-field merge policy.
    #[must_use]
    pub fn field_with_policy(
        mut self,
        name: impl Into<String>,
        kind: ValueKind,
        policy: MergePolicy,
    ) -> Self {
        self.fields.insert(
            name.into(),
            FieldSpec {
                kind,
                policy: Some(policy),
                default: None,
            },
        );
        self
    }

    /// Declare a field with a default for initial states that omit it.
    #[must_use]
    pub fn field_with_default(
        mut self,
        name: impl Into<String>,
        kind: ValueKind,
        default: Value,
    ) -> Self {
        self.fields.insert(
            name.into(),
            FieldSpec {
                kind,
                policy: None,
                default: Some(default),
            },
        );
        self
    }

    /// Declare a field from a full [`FieldSpec`].
    #[must_use]
    pub fn field_spec(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.insert(name.into(), spec);
        self
    }

    /// Whether `name` is declared.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Spec for a declared field.
    #[must_use]
    pub fn spec(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    /// Number of declared fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no fields are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate declared fields in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldSpec)> {
        self.fields.iter()
    }

    /// Declared field names in declaration order.
    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    /// Validate a full state against the schema.
    ///
    /// Every present field must be declared and of the declared kind.
    /// Absent declared fields are legal (see [`StateSchema::apply_defaults`]).
    pub fn validate_state(&self, state: &State, referenced_by: &str) -> Result<()> {
        for (field, value) in state.iter() {
            self.validate_field(field, value, referenced_by)?;
        }
        Ok(())
    }

    /// Validate a partial update against the schema.
    pub fn validate_update(&self, update: &StateUpdate, node: &str) -> Result<()> {
        for (field, value) in update.iter() {
            self.validate_field(field, value, node)?;
        }
        Ok(())
    }

    /// Fill declared defaults into `state` for fields it omits.
    pub fn apply_defaults(&self, state: &mut State) {
        for (name, spec) in &self.fields {
            if let Some(default) = &spec.default {
                if !state.contains(name) {
                    state.values.insert(name.clone(), default.clone());
                }
            }
        }
    }

    fn validate_field(&self, field: &str, value: &Value, referenced_by: &str) -> Result<()> {
        let spec = self.fields.get(field).ok_or_else(|| Error::UnknownField {
            field: field.to_string(),
            referenced_by: referenced_by.to_string(),
        })?;
        if !spec.kind.accepts(value) {
            return Err(Error::FieldTypeMismatch {
                field: field.to_string(),
                expected: spec.kind,
                actual: kind_of(value).to_string(),
            });
        }
        Ok(())
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Shared execution state: field name to value, in schema declaration order.
///
/// Immutable by convention: the engine is the only writer, and every tick
/// produces the next state by merging step updates into a clone of the
/// current one.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct State {
    values: IndexMap<String, Value>,
}

impl State {
    /// Create an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field assignment, for initial states.
    ///
    /// ```rust
    /// use stategraph::State;
    ///
    /// let initial = State::new()
    ///     .with_value("count", 0)
    ///     .with_value("question", "why?");
    /// ```
    #[must_use]
    pub fn with_value(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    /// Value of `field`, if present.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// String value of `field`, if present and a string.
    #[must_use]
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.values.get(field).and_then(Value::as_str)
    }

    /// Signed integer value of `field`.
    #[must_use]
    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.values.get(field).and_then(Value::as_i64)
    }

    /// Unsigned integer value of `field`.
    #[must_use]
    pub fn get_u64(&self, field: &str) -> Option<u64> {
        self.values.get(field).and_then(Value::as_u64)
    }

    /// Float value of `field`.
    #[must_use]
    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.values.get(field).and_then(Value::as_f64)
    }

    /// Bool value of `field`.
    #[must_use]
    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.values.get(field).and_then(Value::as_bool)
    }

    /// Array value of `field`.
    #[must_use]
    pub fn get_list(&self, field: &str) -> Option<&Vec<Value>> {
        self.values.get(field).and_then(Value::as_array)
    }

    /// Whether `field` is present.
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    /// Number of present fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no fields are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate present fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Write a field. Crate-internal: the engine is the only writer.
    pub(crate) fn set(&mut self, field: impl Into<String>, value: Value) {
        self.values.insert(field.into(), value);
    }

    /// Mutable access for custom reducers.
    pub(crate) fn get_mut(&mut self, field: &str) -> Option<&mut Value> {
        self.values.get_mut(field)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for State {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Partial state update returned by a step.
///
/// Names only the fields the step changed; untouched fields are carried
/// forward by the engine. Shallow per-field replacement; a step that wants
/// a deep merge of a nested object declares a custom reducer on that field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct StateUpdate {
    changes: IndexMap<String, Value>,
}

impl StateUpdate {
    /// Create an empty update (a legal no-op).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field assignment.
    ///
    /// ```rust
    /// use stategraph::StateUpdate;
    ///
    /// let update = StateUpdate::new().set("count", 3).set("done", true);
    /// ```
    #[must_use]
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.changes.insert(field.into(), value.into());
        self
    }

    /// Single-field update.
    #[must_use]
    pub fn single(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new().set(field, value)
    }

    /// Value written for `field`, if any.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.changes.get(field)
    }

    /// Whether the update changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of changed fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Iterate changed fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.changes.iter()
    }

    /// Changed field names.
    #[must_use]
    pub fn fields(&self) -> Vec<String> {
        self.changes.keys().cloned().collect()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for StateUpdate {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            changes: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
