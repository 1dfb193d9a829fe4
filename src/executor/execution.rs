//! Execution methods for CompiledGraph.
//!
//! The engine's execution state is the frontier: the set of steps
//! scheduled for the current tick. Each tick dispatches every frontier
//! step concurrently against the same state snapshot, merges their
//! updates in frontier declared order, routes each step's outgoing edge
//! against the post-merge state, and advances to the union of the
//! resolved targets. No step ever observes a same-tick sibling's update
//! before the merge completes, and cross-tick ordering is strict.

use std::pin::pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_stream::stream;
use futures::stream::Stream;
use tokio::sync::Semaphore;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use super::{CompiledGraph, ExecutionResult};
use crate::constants::{DEFAULT_GRAPH_TIMEOUT, DEFAULT_NODE_TIMEOUT};
use crate::edge::END;
use crate::error::{Error, Result};
use crate::event::{EdgeType, GraphEvent};
use crate::merge::merge_updates;
use crate::metrics::{ExecutionMetrics, LocalMetricsBatch};
use crate::state::{State, StateUpdate};
use crate::stream::{StreamEvent, StreamMode};

/// Everything one tick produced: per-step updates (frontier order), the
/// post-merge state, and the next frontier.
pub(super) struct TickOutcome {
    /// (step name, update, duration), in frontier declared order.
    pub(super) results: Vec<(String, StateUpdate, Duration)>,
    /// State after merging the tick's updates.
    pub(super) merged: State,
    /// Next frontier in step-registration order; empty means every active
    /// branch routed to END.
    pub(super) next_frontier: Vec<String>,
}

impl CompiledGraph {
    /// Invoke the graph with an initial state.
    ///
    /// Executes from the entry frontier until every active branch routes
    /// to END, then returns the final state. This is the main execution
    /// method.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownField`] / [`Error::FieldTypeMismatch`] - the
    ///   initial state or a step's update violated the state schema
    /// - [`Error::NodeExecution`] - a step's callable failed (or timed
    ///   out); carries the step name, tick, and last merged state
    /// - [`Error::Routing`] - a conditional router produced an unmapped
    ///   route key
    /// - [`Error::MergeConflict`] - the error-on-conflict policy fired
    /// - [`Error::RecursionLimit`] - the tick bound was exceeded
    /// - [`Error::Cancelled`] - the cancellation token fired
    /// - [`Error::Timeout`] - the whole-invocation timeout elapsed
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let result = app.invoke(State::new().with_value("count", 0)).await?;
    /// println!("Final state: {:?}", result.state());
    /// println!("Steps executed: {:?}", result.nodes_executed());
    /// ```
    ///
    /// # See Also
    ///
    /// - [`CompiledGraph::stream`] - consume events tick by tick
    pub async fn invoke(&self, initial_state: State) -> Result<ExecutionResult> {
        let timeout = self.graph_timeout.unwrap_or(DEFAULT_GRAPH_TIMEOUT);
        match tokio::time::timeout(timeout, self.invoke_internal(initial_state)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }

    async fn invoke_internal(&self, initial_state: State) -> Result<ExecutionResult> {
        let graph_name = self.name.as_deref().unwrap_or("graph");
        // Unique id for this invocation; propagates to node spans for
        // end-to-end correlation.
        let request_id = Uuid::new_v4();
        let span = info_span!(
            "graph.invoke",
            request_id = %request_id,
            graph.name = graph_name,
            graph.duration_ms = tracing::field::Empty,
            graph.ticks = tracing::field::Empty
        );

        async move {
            let start_time = SystemTime::now();

            let mut state = self.prepare_initial_state(initial_state)?;

            // Reset metrics for this execution (if enabled)
            if self.metrics_enabled {
                let mut metrics = self.metrics.lock().await;
                *metrics = ExecutionMetrics::new();
            }

            if !self.callbacks.is_empty() {
                self.emit_event(GraphEvent::GraphStart {
                    timestamp: start_time,
                    initial_state: state.clone(),
                });
            }

            let mut frontier = self.ordered_frontier(self.entry_points.iter().cloned());
            let mut nodes_executed: Vec<String> = Vec::with_capacity(16);
            let mut tick: u32 = 0;

            // Batch metrics locally; apply under one lock at the end.
            let mut metrics_batch = LocalMetricsBatch::new();

            let outcome = loop {
                tick += 1;
                if tick > self.recursion_limit {
                    break Err(Error::RecursionLimit {
                        limit: self.recursion_limit,
                    });
                }
                if let Some(token) = &self.cancellation {
                    if token.is_cancelled() {
                        break Err(Error::Cancelled { tick });
                    }
                }

                match self
                    .run_tick(tick, &frontier, &state, &mut metrics_batch)
                    .await
                {
                    Ok(outcome) => {
                        state = outcome.merged;
                        nodes_executed.extend(outcome.results.iter().map(|(n, _, _)| n.clone()));
                        frontier = outcome.next_frontier;
                        if frontier.is_empty() {
                            break Ok(());
                        }
                    }
                    Err(e) => break Err(e),
                }
            };

            let total_duration = start_time.elapsed().unwrap_or(Duration::ZERO);
            metrics_batch.set_total_duration(total_duration);
            if self.metrics_enabled {
                let mut metrics = self.metrics.lock().await;
                metrics_batch.apply_to(&mut metrics);
            }

            outcome?;

            tracing::Span::current().record(
                "graph.duration_ms",
                i64::try_from(total_duration.as_millis()).unwrap_or(i64::MAX),
            );
            tracing::Span::current().record("graph.ticks", i64::from(tick));

            if !self.callbacks.is_empty() {
                self.emit_event(GraphEvent::GraphEnd {
                    timestamp: SystemTime::now(),
                    final_state: state.clone(),
                    duration: total_duration,
                    execution_path: nodes_executed.clone(),
                    ticks: tick,
                });
            }

            Ok(ExecutionResult {
                final_state: state,
                nodes_executed,
                ticks: tick,
            })
        }
        .instrument(span)
        .await
    }

    /// Stream graph execution, yielding events tick by tick.
    ///
    /// The stream is lazy and finite: it terminates after
    /// [`StreamEvent::Done`] or the first error. It cannot be restarted;
    /// call `stream` again for a fresh invocation.
    ///
    /// # Arguments
    ///
    /// * `initial_state` - Starting state for the graph
    /// * `mode` - Controls what data is yielded:
    ///   - [`StreamMode::Values`] - merged state after each tick
    ///   - [`StreamMode::Updates`] - each step's raw partial update
    ///   - [`StreamMode::Events`] - tick/step lifecycle events
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use futures::StreamExt;
    /// use stategraph::StreamMode;
    ///
    /// let mut stream = app.stream(initial_state, StreamMode::Values);
    /// while let Some(event) = stream.next().await {
    ///     match event? {
    ///         StreamEvent::Values { tick, state } => {
    ///             println!("tick {tick}: {state:?}");
    ///         }
    ///         StreamEvent::Done { state, .. } => break,
    ///         _ => {}
    ///     }
    /// }
    /// ```
    ///
    /// # See Also
    ///
    /// - [`CompiledGraph::invoke`] - execute without streaming
    /// - [`CompiledGraph::stream_multi`] - combine several modes
    pub fn stream(
        &self,
        initial_state: State,
        mode: StreamMode,
    ) -> impl Stream<Item = Result<StreamEvent>> + '_ {
        self.stream_multi(initial_state, vec![mode])
    }

    /// Stream graph execution with several modes at once.
    pub fn stream_multi(
        &self,
        initial_state: State,
        modes: Vec<StreamMode>,
    ) -> impl Stream<Item = Result<StreamEvent>> + '_ {
        let graph_name = self.name.clone().unwrap_or_else(|| "graph".to_string());
        let request_id = Uuid::new_v4();
        let span = info_span!(
            "graph.stream",
            request_id = %request_id,
            graph.name = graph_name.as_str(),
            stream.modes = ?modes
        );

        stream! {
            let mut state = match self.prepare_initial_state(initial_state) {
                Ok(state) => state,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut frontier = self.ordered_frontier(self.entry_points.iter().cloned());
            let mut nodes_executed: Vec<String> = Vec::with_capacity(16);
            let mut tick: u32 = 0;
            let mut metrics_batch = LocalMetricsBatch::new();

            loop {
                tick += 1;
                if tick > self.recursion_limit {
                    yield Err(Error::RecursionLimit {
                        limit: self.recursion_limit,
                    });
                    return;
                }
                if let Some(token) = &self.cancellation {
                    if token.is_cancelled() {
                        yield Err(Error::Cancelled { tick });
                        return;
                    }
                }

                if modes.contains(&StreamMode::Events) {
                    yield Ok(StreamEvent::TickStart {
                        tick,
                        frontier: frontier.clone(),
                    });
                    for node in &frontier {
                        yield Ok(StreamEvent::NodeStart {
                            tick,
                            node: node.clone(),
                        });
                    }
                }

                let outcome = match self
                    .run_tick(tick, &frontier, &state, &mut metrics_batch)
                    .instrument(span.clone())
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                state = outcome.merged;
                for (node, update, _) in &outcome.results {
                    nodes_executed.push(node.clone());
                    if modes.contains(&StreamMode::Updates) {
                        yield Ok(StreamEvent::Update {
                            tick,
                            node: node.clone(),
                            update: update.clone(),
                        });
                    }
                }
                if modes.contains(&StreamMode::Values) {
                    yield Ok(StreamEvent::Values {
                        tick,
                        state: state.clone(),
                    });
                }

                frontier = outcome.next_frontier;
                if frontier.is_empty() {
                    break;
                }
            }

            if self.metrics_enabled {
                let mut metrics = self.metrics.lock().await;
                *metrics = ExecutionMetrics::new();
                metrics_batch.apply_to(&mut metrics);
            }

            yield Ok(StreamEvent::Done {
                state,
                execution_path: nodes_executed,
                ticks: tick,
            });
        }
    }

    /// Validate the initial state against the schema and fill declared
    /// defaults for absent fields.
    fn prepare_initial_state(&self, initial_state: State) -> Result<State> {
        self.schema
            .validate_state(&initial_state, "initial state")?;
        let mut state = initial_state;
        self.schema.apply_defaults(&mut state);
        Ok(state)
    }

    /// Deduplicate and order a frontier by step-registration order.
    ///
    /// Registration order, not wall-clock completion order, defines merge
    /// order; sorting here is what makes concurrent execution observably
    /// deterministic.
    fn ordered_frontier(&self, names: impl Iterator<Item = String>) -> Vec<String> {
        let mut frontier: Vec<String> = Vec::new();
        for name in names {
            if !frontier.contains(&name) {
                frontier.push(name);
            }
        }
        frontier.sort_by_key(|name| self.nodes.get_index_of(name.as_str()).unwrap_or(usize::MAX));
        frontier
    }

    /// One tick: dispatch, apply, route, advance.
    pub(super) async fn run_tick(
        &self,
        tick: u32,
        frontier: &[String],
        state: &State,
        metrics_batch: &mut LocalMetricsBatch,
    ) -> Result<TickOutcome> {
        metrics_batch.record_tick(frontier.len());

        if !self.callbacks.is_empty() {
            self.emit_event(GraphEvent::TickStart {
                timestamp: SystemTime::now(),
                tick,
                frontier: frontier.to_vec(),
            });
        }

        // -- Dispatch ---------------------------------------------------
        // Every frontier step runs against the same pre-tick snapshot.
        let node_timeout = self.node_timeout.unwrap_or(DEFAULT_NODE_TIMEOUT);
        let semaphore = self
            .max_parallel_tasks
            .map(|limit| Arc::new(Semaphore::new(limit)));

        let mut tasks = Vec::with_capacity(frontier.len());
        for node_name in frontier {
            let node = self
                .nodes
                .get(node_name)
                .ok_or_else(|| Error::InternalExecutionError(format!(
                    "frontier step '{node_name}' missing from validated graph"
                )))?
                .clone();

            if !self.callbacks.is_empty() {
                self.emit_event(GraphEvent::NodeStart {
                    timestamp: SystemTime::now(),
                    tick,
                    node: node_name.clone(),
                });
            }

            let node_name_clone = node_name.clone();
            let state_clone = state.clone();
            let sem_clone = semaphore.clone();
            let node_span = info_span!("node.execute", node.name = node_name.as_str(), tick);

            tasks.push(tokio::spawn(
                async move {
                    // Permit released when dropped at task end.
                    let _permit = match sem_clone {
                        Some(sem) => sem.acquire_owned().await.ok(),
                        None => None,
                    };

                    let started = SystemTime::now();
                    let execution = node.execute(state_clone);
                    let result = match tokio::time::timeout(node_timeout, execution).await {
                        Ok(result) => result,
                        Err(_) => Err(Error::Timeout(node_timeout)),
                    };
                    let duration = started.elapsed().unwrap_or(Duration::ZERO);
                    (node_name_clone, result, duration)
                }
                .instrument(node_span),
            ));
        }

        // Join in spawn order (= frontier order), racing cancellation.
        let abort_handles: Vec<_> = tasks.iter().map(|t| t.abort_handle()).collect();
        let join_all = async {
            let mut results = Vec::with_capacity(tasks.len());
            for task in tasks {
                results.push(task.await.map_err(|e| {
                    Error::InternalExecutionError(format!("task join error: {e}"))
                })?);
            }
            Ok::<_, Error>(results)
        };

        let raw_results = match &self.cancellation {
            Some(token) => {
                let mut join_all = pin!(join_all);
                tokio::select! {
                    res = &mut join_all => res?,
                    () = token.cancelled() => {
                        // Grace window: let in-flight steps finish, but the
                        // tick's merge is never applied either way.
                        if self.cancellation_grace > Duration::ZERO {
                            let _ = tokio::time::timeout(
                                self.cancellation_grace,
                                &mut join_all,
                            )
                            .await;
                        }
                        for handle in &abort_handles {
                            handle.abort();
                        }
                        return Err(Error::Cancelled { tick });
                    }
                }
            }
            None => join_all.await?,
        };

        // -- Apply ------------------------------------------------------
        let mut results: Vec<(String, StateUpdate, Duration)> =
            Vec::with_capacity(raw_results.len());
        for (node_name, result, duration) in raw_results {
            match result {
                Ok(update) => {
                    self.schema.validate_update(&update, &node_name)?;
                    metrics_batch.record_node_execution(&node_name, duration);
                    if !self.callbacks.is_empty() {
                        self.emit_event(GraphEvent::NodeEnd {
                            timestamp: SystemTime::now(),
                            tick,
                            node: node_name.clone(),
                            update: update.clone(),
                            duration,
                        });
                    }
                    results.push((node_name, update, duration));
                }
                Err(e) => {
                    if !self.callbacks.is_empty() {
                        self.emit_event(GraphEvent::NodeError {
                            timestamp: SystemTime::now(),
                            tick,
                            node: node_name.clone(),
                            error: e.to_string(),
                        });
                    }
                    return Err(Error::NodeExecution {
                        node: node_name,
                        tick,
                        state: Box::new(state.clone()),
                        source: Box::new(e),
                    });
                }
            }
        }

        let update_pairs: Vec<(String, StateUpdate)> = results
            .iter()
            .map(|(n, u, _)| (n.clone(), u.clone()))
            .collect();
        let merged = merge_updates(&self.schema, &self.merge_policy, state, &update_pairs, tick)?;

        if !self.callbacks.is_empty() {
            let mut fields_changed: Vec<String> = Vec::new();
            for (_, update) in &update_pairs {
                for (field, _) in update.iter() {
                    if !fields_changed.contains(field) {
                        fields_changed.push(field.clone());
                    }
                }
            }
            self.emit_event(GraphEvent::MergeApplied {
                timestamp: SystemTime::now(),
                tick,
                fields_changed,
                state: merged.clone(),
            });
        }

        // -- Route ------------------------------------------------------
        // Outgoing edges resolve against the post-merge state.
        let mut resolved_targets: Vec<String> = Vec::with_capacity(frontier.len());
        for node_name in frontier {
            let (targets, edge_type) = self.resolve_next(node_name, &merged, tick)?;
            metrics_batch.record_edge_traversal();
            if matches!(edge_type, EdgeType::Conditional { .. }) {
                metrics_batch.record_conditional_branch();
            }
            if !self.callbacks.is_empty() {
                self.emit_event(GraphEvent::EdgeTraversal {
                    timestamp: SystemTime::now(),
                    tick,
                    from: node_name.clone(),
                    to: targets.clone(),
                    edge_type,
                });
            }
            resolved_targets.extend(targets);
        }

        // -- Advance ----------------------------------------------------
        // Union of targets, END dropped, one scheduled invocation per
        // target, ordered by registration for the next tick's merge.
        let next_frontier = self.ordered_frontier(
            resolved_targets
                .into_iter()
                .filter(|t| t.as_str() != END),
        );

        debug!(
            tick,
            frontier = ?frontier,
            next = ?next_frontier,
            "tick complete"
        );

        Ok(TickOutcome {
            results,
            merged,
            next_frontier,
        })
    }

    /// Resolve one step's outgoing edge against the post-merge state.
    fn resolve_next(
        &self,
        current: &str,
        state: &State,
        tick: u32,
    ) -> Result<(Vec<String>, EdgeType)> {
        for cond_edge in self.conditional_edges.iter() {
            if cond_edge.from.as_str() == current {
                let route_key = cond_edge.evaluate(state);
                let target = cond_edge.routes.get(&route_key).ok_or_else(|| {
                    Error::Routing {
                        node: current.to_string(),
                        tick,
                        route_key: route_key.clone(),
                    }
                })?;
                return Ok((
                    vec![(**target).clone()],
                    EdgeType::Conditional { route_key },
                ));
            }
        }

        for edge in self.parallel_edges.iter() {
            if edge.from.as_str() == current {
                return Ok(((*edge.to).clone(), EdgeType::Parallel));
            }
        }

        for edge in self.edges.iter() {
            if edge.from.as_str() == current {
                return Ok((vec![(*edge.to).clone()], EdgeType::Direct));
            }
        }

        // The builder proved every step has an outgoing declaration.
        Err(Error::InternalExecutionError(format!(
            "step '{current}' has no outgoing edge in a validated graph"
        )))
    }
}
