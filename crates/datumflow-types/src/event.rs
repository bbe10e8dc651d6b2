//! Run events published while a pipeline executes.
//!
//! Observers (typically the editor UI) subscribe to these to render status
//! transitions as they happen instead of polling the graph.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::{NodeKind, NodeStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// A run resolved its order and is about to dispatch the first node.
    RunStarted {
        run_id: Uuid,
        pipeline: String,
        planned: usize,
        omitted: Vec<String>,
    },
    /// A node changed status.
    NodeStatusChanged {
        run_id: Uuid,
        node_id: String,
        node_type: NodeKind,
        status: NodeStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// The orchestrator rewrote a node's configuration after it succeeded.
    NodeConfigUpdated { run_id: Uuid, node_id: String },
    /// The run finished (successfully, at a failure, or cancelled).
    RunFinished {
        run_id: Uuid,
        attempted: usize,
        succeeded: bool,
        cancelled: bool,
        duration_ms: u64,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            RunEvent::RunStarted { run_id, .. }
            | RunEvent::NodeStatusChanged { run_id, .. }
            | RunEvent::NodeConfigUpdated { run_id, .. }
            | RunEvent::RunFinished { run_id, .. } => *run_id,
        }
    }
}
