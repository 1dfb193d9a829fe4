#![allow(clippy::redundant_closure)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Property-based tests for stategraph
//!
//! These tests verify algebraic properties and invariants that should hold
//! for all valid inputs, using the proptest framework.
//!
//! ## Test Categories
//!
//! 1. **State Properties**: schema round-trips, update application
//! 2. **Merge Properties**: frontier-order determinism of every policy
//! 3. **Engine Properties**: execution determinism, exact tick bounds

use proptest::prelude::*;
use serde_json::json;
use stategraph::{
    Error, MergePolicy, State, StateGraph, StateSchema, StateUpdate, ValueKind, END,
};

/// Strategy for arbitrary step-countable tick limits
fn arb_limit() -> impl Strategy<Value = u32> {
    1u32..20
}

/// Strategy for arbitrary integer field values
fn arb_values() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(any::<i64>(), 1..6)
}

/// Build a fan-out graph: one seed step, then one parallel branch per
/// value, each writing `x` (last-writer-wins) and appending to `order`.
fn fan_out_graph(values: &[i64], jitter: &[u64]) -> stategraph::CompiledGraph {
    let schema = StateSchema::new()
        .field("go", ValueKind::Bool)
        .field("x", ValueKind::Integer)
        .field_with_policy("order", ValueKind::List, MergePolicy::Append);
    let mut graph = StateGraph::new(schema);
    graph.add_node_from_fn("seed", |_| {
        Box::pin(async move { Ok(StateUpdate::single("go", true)) })
    });

    let mut branch_names = Vec::new();
    for (i, (&value, &sleep_ms)) in values.iter().zip(jitter.iter()).enumerate() {
        let name = format!("branch_{i}");
        graph.add_node_from_fn(name.as_str(), move |_| {
            Box::pin(async move {
                if sleep_ms > 0 {
                    tokio::time::sleep(std::time::Duration::from_millis(sleep_ms)).await;
                }
                Ok(StateUpdate::new()
                    .set("x", value)
                    .set("order", json!([value])))
            })
        });
        branch_names.push(name);
    }

    graph.set_entry_point("seed");
    graph.add_parallel_edges("seed", branch_names.clone());
    for name in &branch_names {
        graph.add_edge(name.clone(), END);
    }
    graph.compile().unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: merge order follows registration order, not completion
    /// order. The last registered branch wins `x`, and `order` holds the
    /// values in registration order, for any jitter.
    #[test]
    fn prop_merge_order_is_registration_order(
        values in arb_values(),
        seed_jitter in 0u64..5,
    ) {
        let jitter: Vec<u64> = values
            .iter()
            .enumerate()
            .map(|(i, _)| (seed_jitter + i as u64 * 3) % 5)
            .collect();
        tokio::runtime::Runtime::new().unwrap().block_on(async {
            let app = fan_out_graph(&values, &jitter);
            let result = app.invoke(State::new()).await.unwrap();

            prop_assert_eq!(
                result.state().get_i64("x"),
                Some(*values.last().unwrap())
            );
            let order: Vec<i64> = result
                .state()
                .get_list("order")
                .unwrap()
                .iter()
                .map(|v| v.as_i64().unwrap())
                .collect();
            prop_assert_eq!(order, values.clone());
            Ok(())
        })?;
    }

    /// Property: repeated invocations with identical inputs produce
    /// identical final states, regardless of scheduling.
    #[test]
    fn prop_execution_is_deterministic(
        values in arb_values(),
        jitter_seed in 0u64..5,
    ) {
        tokio::runtime::Runtime::new().unwrap().block_on(async {
            let jitter: Vec<u64> = values
                .iter()
                .enumerate()
                .map(|(i, _)| (jitter_seed + i as u64) % 5)
                .collect();
            let app = fan_out_graph(&values, &jitter);
            let first = app.invoke(State::new()).await.unwrap();
            let second = app.invoke(State::new()).await.unwrap();
            prop_assert_eq!(first.state(), second.state());
            prop_assert_eq!(first.ticks, second.ticks);
            Ok(())
        })?;
    }

    /// Property: a self-loop that never routes to END fails with
    /// RecursionLimit after exactly `limit` dispatches.
    #[test]
    fn prop_tick_bound_is_exact(limit in arb_limit()) {
        tokio::runtime::Runtime::new().unwrap().block_on(async {
            use std::sync::atomic::{AtomicU32, Ordering};
            use std::sync::Arc;

            let executions = Arc::new(AtomicU32::new(0));
            let executions_clone = Arc::clone(&executions);

            let mut graph = StateGraph::new(
                StateSchema::new().field("x", ValueKind::Integer),
            );
            graph.add_node_from_fn("spin", move |_| {
                let executions = Arc::clone(&executions_clone);
                Box::pin(async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Ok(StateUpdate::new())
                })
            });
            graph.set_entry_point("spin");
            graph.add_conditional_edges(
                "spin",
                |_| "again".to_string(),
                [
                    ("again".to_string(), "spin".to_string()),
                    ("done".to_string(), END.to_string()),
                ],
            );

            let app = graph.compile().unwrap().with_recursion_limit(limit);
            let err = app.invoke(State::new()).await.unwrap_err();
            let matched = matches!(err, Error::RecursionLimit { limit: l } if l == limit);
            prop_assert!(matched);
            prop_assert_eq!(executions.load(Ordering::SeqCst), limit);
            Ok(())
        })?;
    }

    /// Property: identical sibling writes never trigger the
    /// error-on-conflict policy.
    #[test]
    fn prop_identical_writes_never_conflict(value in any::<i64>()) {
        tokio::runtime::Runtime::new().unwrap().block_on(async {
            let schema = StateSchema::new()
                .field("go", ValueKind::Bool)
                .field("x", ValueKind::Integer);
            let mut graph =
                StateGraph::new(schema).with_merge_policy(MergePolicy::ErrorOnConflict);
            graph.add_node_from_fn("seed", |_| {
                Box::pin(async move { Ok(StateUpdate::single("go", true)) })
            });
            for name in ["a", "b"] {
                graph.add_node_from_fn(name, move |_| {
                    Box::pin(async move { Ok(StateUpdate::single("x", value)) })
                });
            }
            graph.set_entry_point("seed");
            graph.add_parallel_edges("seed", vec!["a".to_string(), "b".to_string()]);
            graph.add_edge("a", END);
            graph.add_edge("b", END);

            let app = graph.compile().unwrap();
            let result = app.invoke(State::new()).await.unwrap();
            prop_assert_eq!(result.state().get_i64("x"), Some(value));
            Ok(())
        })?;
    }

    /// Property: states round-trip through JSON unchanged.
    #[test]
    fn prop_state_json_roundtrip(
        count in any::<i64>(),
        label in "[a-z0-9 ]{0,30}",
    ) {
        let state = State::new()
            .with_value("count", count)
            .with_value("label", label);
        let encoded = serde_json::to_string(&state).unwrap();
        let decoded: State = serde_json::from_str(&encoded).unwrap();
        prop_assert_eq!(state, decoded);
    }
}

/// Non-proptest sanity check kept with the properties it anchors: the
/// append policy is associative across ticks, not only within one.
#[tokio::test]
async fn append_accumulates_across_ticks() {
    let schema = StateSchema::new()
        .field("count", ValueKind::Integer)
        .field_with_policy("trail", ValueKind::List, MergePolicy::Append);
    let mut graph = StateGraph::new(schema);
    graph.add_node_from_fn("walk", |state| {
        Box::pin(async move {
            let count = state.get_i64("count").unwrap_or(0) + 1;
            Ok(StateUpdate::new()
                .set("count", count)
                .set("trail", json!([count])))
        })
    });
    graph.set_entry_point("walk");
    graph.add_conditional_edges(
        "walk",
        |state| {
            if state.get_i64("count").unwrap_or(0) < 4 {
                "again".to_string()
            } else {
                "done".to_string()
            }
        },
        [
            ("again".to_string(), "walk".to_string()),
            ("done".to_string(), END.to_string()),
        ],
    );

    let app = graph.compile().unwrap();
    let result = app.invoke(State::new().with_value("count", 0)).await.unwrap();
    assert_eq!(result.state().get("trail").unwrap(), &json!([1, 2, 3, 4]));
}
