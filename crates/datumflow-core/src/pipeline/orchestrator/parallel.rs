//! Parallel coordinator: dispatches every ready node up to the concurrency
//! bound and aborts in-flight siblings on the first failure.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use datumflow_types::pipeline::{Edge, NodeStatus, Pipeline};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::pipeline::dispatch::DispatchOutcome;

use super::{PipelineOrchestrator, RunState, guarded_dispatch, node_index, upstream_snapshot};

impl PipelineOrchestrator {
    pub(super) async fn run_parallel(
        &self,
        pipeline: &mut Pipeline,
        edges: Vec<Edge>,
        order: &[String],
        max_concurrency: usize,
        run: &mut RunState,
        cancel: &CancellationToken,
    ) {
        let planned: HashSet<&str> = order.iter().map(String::as_str).collect();
        let mut remaining: HashMap<String, usize> =
            order.iter().map(|id| (id.clone(), 0)).collect();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for edge in &edges {
            if planned.contains(edge.source.as_str()) && planned.contains(edge.target.as_str()) {
                *remaining.entry(edge.target.clone()).or_default() += 1;
                dependents
                    .entry(edge.source.clone())
                    .or_default()
                    .push(edge.target.clone());
            }
        }

        let mut ready: VecDeque<String> = order
            .iter()
            .filter(|id| remaining.get(id.as_str()) == Some(&0))
            .cloned()
            .collect();

        let edges: Arc<[Edge]> = edges.into();
        let failed = Arc::new(AtomicBool::new(false));
        let mut tasks: JoinSet<(String, Option<DispatchOutcome>)> = JoinSet::new();
        let mut in_flight: HashSet<String> = HashSet::new();

        loop {
            while tasks.len() < max_concurrency && !failed.load(Ordering::Acquire) {
                if cancel.is_cancelled() {
                    if !run.cancelled {
                        tracing::info!(run_id = %run.run_id, "run cancelled");
                        run.cancelled = true;
                    }
                    break;
                }
                let Some(node_id) = ready.pop_front() else {
                    break;
                };
                let Some(idx) = node_index(&pipeline.nodes, &node_id) else {
                    continue;
                };

                self.set_status(run.run_id, &mut pipeline.nodes[idx], NodeStatus::Running, None);

                let node = pipeline.nodes[idx].clone();
                let outputs = upstream_snapshot(&run.outputs, &edges, &node_id);
                let dispatcher = Arc::clone(&self.dispatcher);
                let edges = Arc::clone(&edges);
                let failed = Arc::clone(&failed);
                let timeout = self.config.node_timeout;

                in_flight.insert(node_id);
                tasks.spawn(async move {
                    if failed.load(Ordering::Acquire) {
                        return (node.id, None);
                    }
                    let outcome =
                        guarded_dispatch(&dispatcher, &node, &edges, &outputs, timeout).await;
                    (node.id, Some(outcome))
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };

            match joined {
                Ok((node_id, Some(outcome))) if !failed.load(Ordering::Acquire) => {
                    in_flight.remove(&node_id);
                    let Some(idx) = node_index(&pipeline.nodes, &node_id) else {
                        continue;
                    };
                    if self.record(run, &mut pipeline.nodes[idx], outcome) {
                        for next in dependents.get(&node_id).into_iter().flatten() {
                            if let Some(count) = remaining.get_mut(next) {
                                *count -= 1;
                                if *count == 0 {
                                    ready.push_back(next.clone());
                                }
                            }
                        }
                    } else {
                        failed.store(true, Ordering::Release);
                        tasks.abort_all();
                    }
                }
                // Finished or skipped after a sibling failed; reset below.
                Ok(_) => {}
                Err(err) if err.is_cancelled() => {}
                Err(err) => {
                    tracing::error!(run_id = %run.run_id, error = %err, "node task failed to join");
                    failed.store(true, Ordering::Release);
                    tasks.abort_all();
                }
            }
        }

        for node_id in in_flight {
            if let Some(idx) = node_index(&pipeline.nodes, &node_id) {
                tracing::debug!(run_id = %run.run_id, node_id = node_id.as_str(), "aborted");
                self.set_status(run.run_id, &mut pipeline.nodes[idx], NodeStatus::Idle, None);
            }
        }
    }
}
