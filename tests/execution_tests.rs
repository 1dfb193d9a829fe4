#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! End-to-end engine semantics: tick progression, parallel merge,
//! conditional routing, failure handling, cancellation, and streaming.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use stategraph::{
    Error, MergePolicy, State, StateGraph, StateSchema, StateUpdate, StreamEvent, StreamMode,
    ValueKind, END,
};
use tokio_util::sync::CancellationToken;

fn counter_schema() -> StateSchema {
    StateSchema::new().field("count", ValueKind::Integer)
}

/// The canonical loop: `inc` increments `count`, a conditional edge routes
/// back to `inc` while `count < 3`, then to END.
fn inc_to_three() -> StateGraph {
    let mut graph = StateGraph::new(counter_schema());
    graph.add_node_from_fn("inc", |state| {
        Box::pin(async move {
            let count = state.get_i64("count").unwrap_or(0);
            Ok(StateUpdate::single("count", count + 1))
        })
    });
    graph.set_entry_point("inc");
    graph.add_conditional_edges(
        "inc",
        |state| {
            if state.get_i64("count").unwrap_or(0) < 3 {
                "again".to_string()
            } else {
                "done".to_string()
            }
        },
        [
            ("again".to_string(), "inc".to_string()),
            ("done".to_string(), END.to_string()),
        ],
    );
    graph
}

#[tokio::test]
async fn conditional_loop_counts_to_three_in_three_ticks() {
    let app = inc_to_three().compile().unwrap();
    let result = app.invoke(State::new().with_value("count", 0)).await.unwrap();
    assert_eq!(result.state().get_i64("count"), Some(3));
    assert_eq!(result.ticks, 3);
    assert_eq!(result.nodes_executed(), &["inc", "inc", "inc"]);
}

#[tokio::test]
async fn last_writer_wins_resolves_sibling_conflict_by_frontier_order() {
    let schema = StateSchema::new()
        .field("x", ValueKind::Integer)
        .field("go", ValueKind::Bool);
    let mut graph = StateGraph::new(schema);
    graph.add_node_from_fn("fan", |_| {
        Box::pin(async move { Ok(StateUpdate::single("go", true)) })
    });
    graph.add_node_from_fn("a", |_| {
        Box::pin(async move { Ok(StateUpdate::single("x", 1)) })
    });
    graph.add_node_from_fn("b", |_| {
        Box::pin(async move { Ok(StateUpdate::single("x", 2)) })
    });
    graph.set_entry_point("fan");
    graph.add_parallel_edges("fan", vec!["a".to_string(), "b".to_string()]);
    graph.add_edge("a", END);
    graph.add_edge("b", END);

    let app = graph.compile().unwrap();
    let result = app.invoke(State::new()).await.unwrap();
    // Frontier order is [a, b] by registration, so b is the last writer.
    assert_eq!(result.state().get_i64("x"), Some(2));
    assert_eq!(result.ticks, 2);
}

#[tokio::test]
async fn error_on_conflict_fails_sibling_writes() {
    let schema = StateSchema::new()
        .field("x", ValueKind::Integer)
        .field("go", ValueKind::Bool);
    let mut graph = StateGraph::new(schema).with_merge_policy(MergePolicy::ErrorOnConflict);
    graph.add_node_from_fn("fan", |_| {
        Box::pin(async move { Ok(StateUpdate::single("go", true)) })
    });
    graph.add_node_from_fn("a", |_| {
        Box::pin(async move { Ok(StateUpdate::single("x", 1)) })
    });
    graph.add_node_from_fn("b", |_| {
        Box::pin(async move { Ok(StateUpdate::single("x", 2)) })
    });
    graph.set_entry_point("fan");
    graph.add_parallel_edges("fan", vec!["a".to_string(), "b".to_string()]);
    graph.add_edge("a", END);
    graph.add_edge("b", END);

    let app = graph.compile().unwrap();
    let err = app.invoke(State::new()).await.unwrap_err();
    match err {
        Error::MergeConflict {
            field,
            tick,
            left_node,
            right_node,
        } => {
            assert_eq!(field, "x");
            assert_eq!(tick, 2);
            assert_eq!(left_node, "a");
            assert_eq!(right_node, "b");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn siblings_observe_pre_tick_state_not_each_other() {
    // a and b each record what they observed in `x` while also writing to
    // it; tick isolation means both must see the pre-tick value.
    let schema = StateSchema::new()
        .field("x", ValueKind::Integer)
        .field("a_saw", ValueKind::Integer)
        .field("b_saw", ValueKind::Integer);
    let mut graph = StateGraph::new(schema);
    graph.add_node_from_fn("a", |state| {
        Box::pin(async move {
            let saw = state.get_i64("x").unwrap();
            // Give the sibling time to run first under any scheduler.
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(StateUpdate::new().set("x", 100).set("a_saw", saw))
        })
    });
    graph.add_node_from_fn("b", |state| {
        Box::pin(async move {
            let saw = state.get_i64("x").unwrap();
            Ok(StateUpdate::new().set("x", 200).set("b_saw", saw))
        })
    });
    graph.add_edge(stategraph::START, "a");
    graph.add_edge(stategraph::START, "b");
    graph.add_edge("a", END);
    graph.add_edge("b", END);

    let app = graph.compile().unwrap();
    let result = app.invoke(State::new().with_value("x", 7)).await.unwrap();
    assert_eq!(result.state().get_i64("a_saw"), Some(7));
    assert_eq!(result.state().get_i64("b_saw"), Some(7));
    // Post-merge value reflects only the merge policy outcome.
    assert_eq!(result.state().get_i64("x"), Some(200));
}

#[tokio::test]
async fn recursion_limit_halts_at_exactly_max_ticks() {
    let executions = Arc::new(AtomicU32::new(0));
    let executions_clone = Arc::clone(&executions);

    let mut graph = StateGraph::new(counter_schema());
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

    let app = graph.compile().unwrap().with_recursion_limit(7);
    let err = app.invoke(State::new()).await.unwrap_err();
    assert!(matches!(err, Error::RecursionLimit { limit: 7 }));
    assert_eq!(executions.load(Ordering::SeqCst), 7);
}

#[tokio::test]
async fn append_policy_collects_fan_out_results() {
    let schema = StateSchema::new()
        .field("go", ValueKind::Bool)
        .field_with_policy("findings", ValueKind::List, MergePolicy::Append);
    let mut graph = StateGraph::new(schema);
    graph.add_node_from_fn("fan", |_| {
        Box::pin(async move { Ok(StateUpdate::single("go", true)) })
    });
    graph.add_node_from_fn("left", |_| {
        Box::pin(async move { Ok(StateUpdate::single("findings", json!(["from left"]))) })
    });
    graph.add_node_from_fn("right", |_| {
        Box::pin(async move { Ok(StateUpdate::single("findings", json!(["from right"]))) })
    });
    graph.set_entry_point("fan");
    graph.add_parallel_edges("fan", vec!["left".to_string(), "right".to_string()]);
    graph.add_edge("left", END);
    graph.add_edge("right", END);

    let app = graph.compile().unwrap();
    let result = app.invoke(State::new()).await.unwrap();
    assert_eq!(
        result.state().get("findings").unwrap(),
        &json!(["from left", "from right"])
    );
}

#[tokio::test]
async fn step_failure_carries_node_tick_and_state() {
    let schema = StateSchema::new().field("count", ValueKind::Integer);
    let mut graph = StateGraph::new(schema);
    graph.add_node_from_fn("ok", |_| {
        Box::pin(async move { Ok(StateUpdate::single("count", 1)) })
    });
    graph.add_node_from_fn("boom", |_| {
        Box::pin(async move {
            Err(Error::InternalExecutionError("backend unavailable".to_string()))
        })
    });
    graph.set_entry_point("ok");
    graph.add_edge("ok", "boom");
    graph.add_edge("boom", END);

    let app = graph.compile().unwrap();
    let err = app.invoke(State::new().with_value("count", 0)).await.unwrap_err();
    match err {
        Error::NodeExecution {
            node, tick, state, ..
        } => {
            assert_eq!(node, "boom");
            assert_eq!(tick, 2);
            // Prior ticks' merges are preserved for diagnostics.
            assert_eq!(state.get_i64("count"), Some(1));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn per_step_timeout_is_a_step_failure() {
    let schema = StateSchema::new().field("count", ValueKind::Integer);
    let mut graph = StateGraph::new(schema);
    graph.add_node_from_fn("slow", |_| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(StateUpdate::new())
        })
    });
    graph.set_entry_point("slow");
    graph.add_edge("slow", END);

    let app = graph
        .compile()
        .unwrap()
        .with_node_timeout(Duration::from_millis(20));
    let err = app.invoke(State::new()).await.unwrap_err();
    match err {
        Error::NodeExecution { node, source, .. } => {
            assert_eq!(node, "slow");
            assert!(source.to_string().contains("timeout"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn whole_invocation_timeout() {
    let schema = StateSchema::new().field("count", ValueKind::Integer);
    let mut graph = StateGraph::new(schema);
    graph.add_node_from_fn("slow", |_| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(StateUpdate::new())
        })
    });
    graph.set_entry_point("slow");
    graph.add_edge("slow", END);

    let app = graph
        .compile()
        .unwrap()
        .with_graph_timeout(Duration::from_millis(20));
    let err = app.invoke(State::new()).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
}

#[tokio::test]
async fn cancellation_abandons_in_flight_tick() {
    let schema = StateSchema::new().field("count", ValueKind::Integer);
    let mut graph = StateGraph::new(schema);
    graph.add_node_from_fn("slow", |_| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(StateUpdate::single("count", 99))
        })
    });
    graph.set_entry_point("slow");
    graph.add_edge("slow", END);

    let token = CancellationToken::new();
    let app = graph.compile().unwrap().with_cancellation(token.clone());

    let cancel = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
    });
    let err = app.invoke(State::new()).await.unwrap_err();
    cancel.await.unwrap();
    assert!(matches!(err, Error::Cancelled { tick: 1 }));
}

#[tokio::test]
async fn streaming_yields_per_tick_values_then_done() {
    let app = inc_to_three().compile().unwrap();
    let events: Vec<_> = app
        .stream(State::new().with_value("count", 0), StreamMode::Values)
        .collect()
        .await;

    let mut counts = Vec::new();
    let mut done_state = None;
    for event in events {
        match event.unwrap() {
            StreamEvent::Values { state, .. } => {
                counts.push(state.get_i64("count").unwrap());
            }
            StreamEvent::Done { state, ticks, .. } => {
                assert_eq!(ticks, 3);
                done_state = Some(state);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(counts, vec![1, 2, 3]);
    assert_eq!(done_state.unwrap().get_i64("count"), Some(3));
}

#[tokio::test]
async fn streaming_updates_mode_exposes_raw_partial_updates() {
    let app = inc_to_three().compile().unwrap();
    let events: Vec<_> = app
        .stream(State::new().with_value("count", 0), StreamMode::Updates)
        .collect()
        .await;

    let updates: Vec<i64> = events
        .into_iter()
        .filter_map(|event| match event.unwrap() {
            StreamEvent::Update { update, .. } => {
                update.get("count").and_then(|v| v.as_i64())
            }
            _ => None,
        })
        .collect();
    assert_eq!(updates, vec![1, 2, 3]);
}

#[tokio::test]
async fn repeated_runs_are_deterministic() {
    for _ in 0..10 {
        let schema = StateSchema::new()
            .field("go", ValueKind::Bool)
            .field("x", ValueKind::Integer)
            .field_with_policy("log", ValueKind::List, MergePolicy::Append);
        let mut graph = StateGraph::new(schema);
        graph.add_node_from_fn("fan", |_| {
            Box::pin(async move { Ok(StateUpdate::single("go", true)) })
        });
        // Jittered sleeps: completion order varies, merge order must not.
        for (name, sleep_ms, value) in
            [("p1", 15u64, 1i64), ("p2", 1, 2), ("p3", 8, 3)]
        {
            graph.add_node_from_fn(name, move |_| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
                    Ok(StateUpdate::new()
                        .set("x", value)
                        .set("log", json!([value])))
                })
            });
        }
        graph.set_entry_point("fan");
        graph.add_parallel_edges(
            "fan",
            vec!["p1".to_string(), "p2".to_string(), "p3".to_string()],
        );
        graph.add_edge("p1", END);
        graph.add_edge("p2", END);
        graph.add_edge("p3", END);

        let app = graph.compile().unwrap();
        let result = app.invoke(State::new()).await.unwrap();
        assert_eq!(result.state().get_i64("x"), Some(3));
        assert_eq!(result.state().get("log").unwrap(), &json!([1, 2, 3]));
    }
}

#[tokio::test]
async fn metrics_reflect_the_invocation() {
    let app = inc_to_three().compile().unwrap();
    app.invoke(State::new().with_value("count", 0)).await.unwrap();

    let metrics = app.metrics().await;
    assert_eq!(metrics.ticks, 3);
    assert_eq!(metrics.node_execution_counts["inc"], 3);
    assert_eq!(metrics.conditional_branches, 3);
    assert_eq!(metrics.parallel_dispatches, 0);
}

#[tokio::test]
async fn multiple_entry_edges_run_in_the_first_tick() {
    let schema = StateSchema::new()
        .field("a_ran", ValueKind::Bool)
        .field("b_ran", ValueKind::Bool);
    let mut graph = StateGraph::new(schema);
    graph.add_node_from_fn("a", |_| {
        Box::pin(async move { Ok(StateUpdate::single("a_ran", true)) })
    });
    graph.add_node_from_fn("b", |_| {
        Box::pin(async move { Ok(StateUpdate::single("b_ran", true)) })
    });
    graph.add_edge(stategraph::START, "a");
    graph.add_edge(stategraph::START, "b");
    graph.add_edge("a", END);
    graph.add_edge("b", END);

    let app = graph.compile().unwrap();
    let result = app.invoke(State::new()).await.unwrap();
    assert_eq!(result.ticks, 1);
    assert_eq!(result.state().get_bool("a_ran"), Some(true));
    assert_eq!(result.state().get_bool("b_ran"), Some(true));
}

#[tokio::test]
async fn initial_state_defaults_are_applied() {
    let schema =
        StateSchema::new().field_with_default("count", ValueKind::Integer, json!(0));
    let mut graph = StateGraph::new(schema);
    graph.add_node_from_fn("read", |state| {
        Box::pin(async move {
            let count = state.get_i64("count").unwrap();
            Ok(StateUpdate::single("count", count + 10))
        })
    });
    graph.set_entry_point("read");
    graph.add_edge("read", END);

    let app = graph.compile().unwrap();
    let result = app.invoke(State::new()).await.unwrap();
    assert_eq!(result.state().get_i64("count"), Some(10));
}

#[tokio::test]
async fn invalid_initial_state_is_rejected_before_any_dispatch() {
    let app = inc_to_three().compile().unwrap();
    let err = app
        .invoke(State::new().with_value("count", "zero"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FieldTypeMismatch { field, .. } if field == "count"));
}

#[tokio::test]
async fn compiled_graph_is_shareable_across_concurrent_invocations() {
    let app = Arc::new(inc_to_three().compile().unwrap());
    let mut handles = Vec::new();
    for start in 0..3i64 {
        let app = Arc::clone(&app);
        handles.push(tokio::spawn(async move {
            app.invoke(State::new().with_value("count", start))
                .await
                .unwrap()
                .into_state()
        }));
    }
    for handle in handles {
        let state = handle.await.unwrap();
        assert_eq!(state.get_i64("count"), Some(3));
    }
}
