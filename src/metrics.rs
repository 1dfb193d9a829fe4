//! Execution metrics for graph performance tracking
//!
//! Metrics are collected per invocation: step durations and counts, ticks,
//! edge traversals, and fan-out widths. The hot path accumulates into a
//! [`LocalMetricsBatch`] and applies it under a single lock acquisition at
//! the end of the invocation (or at the error return).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Local metrics batch for collecting updates without mutex contention.
///
/// Accumulate locally during the tick loop, then apply once with
/// [`LocalMetricsBatch::apply_to`]. This keeps lock acquisitions at O(1)
/// per invocation instead of O(steps).
#[derive(Debug, Default)]
pub struct LocalMetricsBatch {
    /// Step executions: (step name, duration)
    node_executions: Vec<(String, Duration)>,
    /// Number of edges traversed
    edges_traversed: usize,
    /// Number of conditional branches evaluated
    conditional_branches: usize,
    /// Frontier widths of multi-step ticks
    parallel_dispatches: Vec<usize>,
    /// Number of ticks executed
    ticks: u32,
    /// Total duration (if set)
    total_duration: Option<Duration>,
}

impl LocalMetricsBatch {
    /// Create a new empty batch
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a step execution
    #[inline]
    pub fn record_node_execution(&mut self, node_name: impl Into<String>, duration: Duration) {
        self.node_executions.push((node_name.into(), duration));
    }

    /// Record edge traversal
    #[inline]
    pub fn record_edge_traversal(&mut self) {
        self.edges_traversed += 1;
    }

    /// Record conditional branch evaluation
    #[inline]
    pub fn record_conditional_branch(&mut self) {
        self.conditional_branches += 1;
    }

    /// Record a tick; frontier widths above one count as parallel dispatch
    #[inline]
    pub fn record_tick(&mut self, frontier_width: usize) {
        self.ticks += 1;
        if frontier_width > 1 {
            self.parallel_dispatches.push(frontier_width);
        }
    }

    /// Set total duration
    #[inline]
    pub fn set_total_duration(&mut self, duration: Duration) {
        self.total_duration = Some(duration);
    }

    /// Check if batch has any updates to apply
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.node_executions.is_empty()
            && self.edges_traversed == 0
            && self.conditional_branches == 0
            && self.parallel_dispatches.is_empty()
            && self.ticks == 0
            && self.total_duration.is_none()
    }

    /// Apply all batched updates to [`ExecutionMetrics`] (single lock acquisition)
    pub fn apply_to(self, metrics: &mut ExecutionMetrics) {
        for (node_name, duration) in self.node_executions {
            metrics.record_node_execution(&node_name, duration);
        }
        metrics.edges_traversed += self.edges_traversed;
        metrics.conditional_branches += self.conditional_branches;
        metrics.ticks += self.ticks;
        for width in self.parallel_dispatches {
            metrics.parallel_dispatches += 1;
            metrics.max_frontier_width = metrics.max_frontier_width.max(width);
        }
        if let Some(duration) = self.total_duration {
            metrics.set_total_duration(duration);
        }
    }
}

/// Execution metrics captured during graph execution
///
/// # Example
///
/// ```rust,ignore
/// let app = graph.compile()?;
/// let result = app.invoke(state).await?;
/// let metrics = app.metrics().await;
///
/// println!("Total time: {:?}", metrics.total_duration);
/// for (node, duration) in &metrics.node_durations {
///     println!("  {}: {:?}", node, duration);
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    /// Cumulative duration per step (`step_name` -> duration)
    pub node_durations: HashMap<String, Duration>,

    /// Number of times each step was dispatched
    pub node_execution_counts: HashMap<String, usize>,

    /// Total execution duration (wall clock time)
    pub total_duration: Duration,

    /// Number of ticks executed
    pub ticks: u32,

    /// Number of edges traversed
    pub edges_traversed: usize,

    /// Number of conditional branches evaluated
    pub conditional_branches: usize,

    /// Number of ticks that dispatched more than one step
    pub parallel_dispatches: usize,

    /// Widest frontier seen
    pub max_frontier_width: usize,
}

impl ExecutionMetrics {
    /// Create fresh metrics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one step execution
    pub fn record_node_execution(&mut self, node_name: &str, duration: Duration) {
        *self
            .node_durations
            .entry(node_name.to_string())
            .or_insert(Duration::ZERO) += duration;
        *self
            .node_execution_counts
            .entry(node_name.to_string())
            .or_insert(0) += 1;
    }

    /// Set the invocation's total duration
    pub fn set_total_duration(&mut self, duration: Duration) {
        self.total_duration = duration;
    }

    /// Total number of step dispatches across all ticks
    #[must_use]
    pub fn total_node_executions(&self) -> usize {
        self.node_execution_counts.values().sum()
    }
}
