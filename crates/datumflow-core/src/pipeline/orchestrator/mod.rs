//! Pipeline orchestrator: fail-fast execution of a resolved plan.
//!
//! # Execution flow
//!
//! 1. Reject an empty pipeline.
//! 2. Resolve the order via `topology::plan` and apply the cycle policy.
//! 3. Dispatch nodes, sequentially or across independent branches, marking
//!    each `running` then `completed` or `error`.
//! 4. Register successful outputs in the run's `OutputTable` and apply any
//!    configuration mutation the dispatcher requested.
//! 5. Stop at the first failure; nodes not yet attempted keep their status.
//!
//! Dispatch is guarded: panics and timeouts become failed results instead of
//! unwinding through the run. Cancellation is checked before each dispatch.

mod parallel;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use datumflow_types::config::{CyclePolicy, ExecutionModeSetting, OrchestratorSettings};
use datumflow_types::event::RunEvent;
use datumflow_types::pipeline::{Edge, Node, NodeStatus, Pipeline};
use datumflow_types::run::{ExecutionResult, RunReport};
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;
use crate::pipeline::binding::{BindingContext, OutputTable};
use crate::pipeline::capability::Capabilities;
use crate::pipeline::dispatch::{DispatchError, DispatchOutcome, NodeDispatcher};
use crate::pipeline::topology::{self, TopologyError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One node at a time, in resolved order.
    #[default]
    Sequential,
    /// Any node whose predecessors all succeeded may run, up to the bound.
    Parallel { max_concurrency: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub mode: ExecutionMode,
    pub cycle_policy: CyclePolicy,
    /// Per-node dispatch timeout. `None` waits indefinitely.
    pub node_timeout: Option<Duration>,
}

impl From<&OrchestratorSettings> for OrchestratorConfig {
    fn from(settings: &OrchestratorSettings) -> Self {
        let mode = match settings.mode {
            ExecutionModeSetting::Sequential => ExecutionMode::Sequential,
            ExecutionModeSetting::Parallel => ExecutionMode::Parallel {
                max_concurrency: settings.max_concurrency.max(1),
            },
        };
        Self {
            mode,
            cycle_policy: settings.cycle_policy,
            node_timeout: settings.node_timeout_secs.map(Duration::from_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors and outcome
// ---------------------------------------------------------------------------

/// Run-level failures. Node failures never surface here; they are recorded
/// in the run report.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("pipeline has no nodes")]
    GraphEmpty,

    #[error(transparent)]
    CycleDetected(#[from] TopologyError),
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    /// Per-node results. A prefix of the resolved order when sequential,
    /// completion order when parallel.
    pub report: RunReport,
    /// Outputs of every node that succeeded.
    pub outputs: OutputTable,
    /// Nodes left out because of a dependency cycle.
    pub omitted: Vec<String>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunOutcome {
    /// True when the run was not cancelled and no node failed.
    pub fn succeeded(&self) -> bool {
        !self.cancelled && self.report.all_succeeded()
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

struct RunState {
    run_id: Uuid,
    report: RunReport,
    outputs: OutputTable,
    cancelled: bool,
}

// ---------------------------------------------------------------------------
// PipelineOrchestrator
// ---------------------------------------------------------------------------

/// Drives a pipeline run on top of a `NodeDispatcher`.
///
/// The orchestrator is the only writer of node status, the output table and
/// the run report. In parallel mode workers receive a snapshot of the node
/// and of the upstream outputs they need.
#[derive(Debug, Clone)]
pub struct PipelineOrchestrator {
    dispatcher: Arc<NodeDispatcher>,
    config: OrchestratorConfig,
    event_bus: Option<EventBus>,
}

impl PipelineOrchestrator {
    pub fn new(dispatcher: NodeDispatcher, config: OrchestratorConfig) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            config,
            event_bus: None,
        }
    }

    /// Build from the `[orchestrator]` settings, with an event bus of the
    /// configured capacity.
    pub fn from_settings(capabilities: Capabilities, settings: &OrchestratorSettings) -> Self {
        Self::new(NodeDispatcher::new(capabilities), settings.into())
            .with_event_bus(EventBus::new(settings.event_capacity))
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn event_bus(&self) -> Option<&EventBus> {
        self.event_bus.as_ref()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run the pipeline to completion or first failure.
    pub async fn run(&self, pipeline: &mut Pipeline) -> Result<RunOutcome, OrchestratorError> {
        self.run_with_cancel(pipeline, CancellationToken::new()).await
    }

    /// Run the pipeline, stopping before the next dispatch once `cancel`
    /// fires. Nodes already in flight finish and are reported.
    pub async fn run_with_cancel(
        &self,
        pipeline: &mut Pipeline,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, OrchestratorError> {
        if pipeline.nodes.is_empty() {
            return Err(OrchestratorError::GraphEmpty);
        }

        let plan = topology::plan(&pipeline.nodes, &pipeline.edges, self.config.cycle_policy)?;
        let edges = topology::known_edges(&pipeline.nodes, &pipeline.edges);

        let started_at = Utc::now();
        let mut run = RunState {
            run_id: Uuid::now_v7(),
            report: RunReport::new(),
            outputs: OutputTable::new(),
            cancelled: false,
        };

        tracing::info!(
            run_id = %run.run_id,
            pipeline = pipeline.name.as_str(),
            planned = plan.order.len(),
            omitted = plan.omitted.len(),
            mode = ?self.config.mode,
            "starting pipeline run"
        );
        self.publish(RunEvent::RunStarted {
            run_id: run.run_id,
            pipeline: pipeline.name.clone(),
            planned: plan.order.len(),
            omitted: plan.omitted.clone(),
        });

        match self.config.mode {
            ExecutionMode::Sequential => {
                self.run_sequential(pipeline, &edges, &plan.order, &mut run, &cancel)
                    .await
            }
            ExecutionMode::Parallel { max_concurrency } => {
                self.run_parallel(
                    pipeline,
                    edges,
                    &plan.order,
                    max_concurrency.max(1),
                    &mut run,
                    &cancel,
                )
                .await
            }
        }

        let outcome = RunOutcome {
            run_id: run.run_id,
            report: run.report,
            outputs: run.outputs,
            omitted: plan.omitted,
            cancelled: run.cancelled,
            started_at,
            finished_at: Utc::now(),
        };

        tracing::info!(
            run_id = %outcome.run_id,
            attempted = outcome.report.len(),
            succeeded = outcome.succeeded(),
            cancelled = outcome.cancelled,
            duration_ms = outcome.duration_ms(),
            "pipeline run finished"
        );
        self.publish(RunEvent::RunFinished {
            run_id: outcome.run_id,
            attempted: outcome.report.len(),
            succeeded: outcome.succeeded(),
            cancelled: outcome.cancelled,
            duration_ms: outcome.duration_ms(),
        });

        Ok(outcome)
    }

    // -- Sequential --

    async fn run_sequential(
        &self,
        pipeline: &mut Pipeline,
        edges: &[Edge],
        order: &[String],
        run: &mut RunState,
        cancel: &CancellationToken,
    ) {
        for node_id in order {
            if cancel.is_cancelled() {
                tracing::info!(run_id = %run.run_id, next = node_id.as_str(), "run cancelled");
                run.cancelled = true;
                break;
            }

            let Some(idx) = node_index(&pipeline.nodes, node_id) else {
                continue;
            };
            self.set_status(run.run_id, &mut pipeline.nodes[idx], NodeStatus::Running, None);

            let outcome = guarded_dispatch(
                &self.dispatcher,
                &pipeline.nodes[idx],
                edges,
                &run.outputs,
                self.config.node_timeout,
            )
            .await;

            if !self.record(run, &mut pipeline.nodes[idx], outcome) {
                break;
            }
        }
    }

    // -- Bookkeeping --

    /// Append the result, register output, update status. Returns success.
    fn record(&self, run: &mut RunState, node: &mut Node, outcome: DispatchOutcome) -> bool {
        let output = outcome.node_output();
        let DispatchOutcome {
            success,
            message,
            output_path,
            named_outputs,
            error,
            logs,
            mutation,
        } = outcome;

        if logs.is_some() {
            node.execution_logs = logs;
        }

        run.report.push(ExecutionResult {
            node_id: node.id.clone(),
            node_label: node.display_label().to_string(),
            node_type: node.kind.clone(),
            success,
            message: message.clone(),
            output_path,
            output_paths: named_outputs,
            error: error.clone(),
        });

        match output {
            Some(output) => {
                run.outputs.insert(node.id.clone(), output);
                self.set_status(run.run_id, node, NodeStatus::Completed, Some(message));

                if let Some(mutation) = mutation {
                    mutation.apply(node);
                    tracing::info!(
                        run_id = %run.run_id,
                        node_id = node.id.as_str(),
                        ?mutation,
                        "applied node configuration change"
                    );
                    self.publish(RunEvent::NodeConfigUpdated {
                        run_id: run.run_id,
                        node_id: node.id.clone(),
                    });
                }
            }
            None => {
                let reason = error.unwrap_or(message);
                tracing::warn!(
                    run_id = %run.run_id,
                    node_id = node.id.as_str(),
                    node_type = node.kind.as_str(),
                    error = reason.as_str(),
                    "node failed, halting run"
                );
                self.set_status(run.run_id, node, NodeStatus::Error, Some(reason));
            }
        }

        success
    }

    fn set_status(&self, run_id: Uuid, node: &mut Node, status: NodeStatus, message: Option<String>) {
        if status == NodeStatus::Running {
            node.execution_logs = None;
        }
        node.status = status;
        node.status_message = message.clone();

        tracing::debug!(
            run_id = %run_id,
            node_id = node.id.as_str(),
            node_type = node.kind.as_str(),
            status = %status,
            "node status changed"
        );
        self.publish(RunEvent::NodeStatusChanged {
            run_id,
            node_id: node.id.clone(),
            node_type: node.kind.clone(),
            status,
            message,
        });
    }

    fn publish(&self, event: RunEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Dispatch with panics and timeouts converted into failed outcomes.
async fn guarded_dispatch(
    dispatcher: &NodeDispatcher,
    node: &Node,
    edges: &[Edge],
    outputs: &OutputTable,
    timeout: Option<Duration>,
) -> DispatchOutcome {
    let ctx = BindingContext::new(&node.id, edges, outputs);
    let guarded = AssertUnwindSafe(dispatcher.dispatch(node, &ctx)).catch_unwind();

    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(result) => result,
            Err(_elapsed) => {
                return DispatchOutcome::failed(DispatchError::Timeout { limit });
            }
        },
        None => guarded.await,
    };

    result.unwrap_or_else(|panic| {
        let detail = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "node dispatch panicked".to_string());
        tracing::error!(node_id = node.id.as_str(), panic = detail.as_str(), "dispatch panicked");
        DispatchOutcome::failed(DispatchError::UnexpectedFault(detail))
    })
}

/// First node carrying `id`; later duplicates are never dispatched.
fn node_index(nodes: &[Node], id: &str) -> Option<usize> {
    nodes.iter().position(|n| n.id == id)
}

/// Outputs of every node feeding `node_id`.
fn upstream_snapshot(outputs: &OutputTable, edges: &[Edge], node_id: &str) -> OutputTable {
    let mut snapshot = OutputTable::new();
    for edge in edges.iter().filter(|e| e.target == node_id) {
        if let Some(output) = outputs.get(&edge.source) {
            snapshot.insert(edge.source.clone(), output.clone());
        }
    }
    snapshot
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
