//! Pipeline graph model.
//!
//! A `Pipeline` is the document the visual editor saves: an ordered list of
//! typed nodes and an ordered list of edges. Insertion order is significant --
//! the topology resolver uses it to break ties between ready nodes, and the
//! binding resolver uses edge order to pick "the" upstream producer.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// A node/edge graph as owned by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    /// Human-readable pipeline name.
    #[serde(default)]
    pub name: String,
    /// Nodes in insertion order.
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Edges in insertion order.
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Pipeline {
    /// Create an empty pipeline with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Look up a node by ID.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Look up a node by ID for in-place mutation.
    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Incoming edges of a node, in edge insertion order.
    pub fn incoming<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.target == node_id)
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A typed unit of work in the pipeline graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique node ID within the pipeline.
    pub id: String,
    /// Display label (falls back to the ID when empty).
    #[serde(default)]
    pub label: String,
    /// The kind of node.
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Kind-specific configuration, decoded by the dispatcher.
    #[serde(default)]
    pub config: serde_json::Value,
    /// Current execution status.
    #[serde(default)]
    pub status: NodeStatus,
    /// Short human-readable status detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    /// Captured output of the last execution, if the kind produces any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_logs: Option<ExecutionLogs>,
}

impl Node {
    /// Create an idle node.
    pub fn new(id: impl Into<String>, kind: NodeKind, config: serde_json::Value) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            kind,
            config,
            status: NodeStatus::Idle,
            status_message: None,
            execution_logs: None,
        }
    }

    /// Builder-style label override.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// The label to show in reports.
    pub fn display_label(&self) -> &str {
        if self.label.is_empty() {
            &self.id
        } else {
            &self.label
        }
    }
}

/// The kind of a node.
///
/// Kinds the editor offers map to named variants; any other `type` string is
/// kept verbatim in `Other` and runs as a pass-through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    Dataset,
    Execute,
    Versioning,
    Training,
    Experiment,
    Report,
    Other(String),
}

impl NodeKind {
    pub fn as_str(&self) -> &str {
        match self {
            NodeKind::Dataset => "dataset",
            NodeKind::Execute => "execute",
            NodeKind::Versioning => "versioning",
            NodeKind::Training => "training",
            NodeKind::Experiment => "experiment",
            NodeKind::Report => "report",
            NodeKind::Other(name) => name,
        }
    }

    /// True for kinds with a dedicated executor.
    pub fn is_known(&self) -> bool {
        !matches!(self, NodeKind::Other(_))
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for NodeKind {
    fn from(s: &str) -> Self {
        match s {
            "dataset" => NodeKind::Dataset,
            "execute" => NodeKind::Execute,
            "versioning" => NodeKind::Versioning,
            "training" => NodeKind::Training,
            "experiment" => NodeKind::Experiment,
            "report" => NodeKind::Report,
            other => NodeKind::Other(other.to_string()),
        }
    }
}

impl From<String> for NodeKind {
    fn from(s: String) -> Self {
        match NodeKind::from(s.as_str()) {
            NodeKind::Other(_) => NodeKind::Other(s),
            known => known,
        }
    }
}

impl From<NodeKind> for String {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl FromStr for NodeKind {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(NodeKind::from(s))
    }
}

/// Execution status of a node.
///
/// Transitions during a run: `Idle -> Running -> {Completed | Error}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Error,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Idle => "idle",
            NodeStatus::Running => "running",
            NodeStatus::Completed => "completed",
            NodeStatus::Error => "error",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// A directed dependency from one node's output to another node's input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution logs
// ---------------------------------------------------------------------------

/// Which stream a captured log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
    System,
}

/// One timestamped line of captured output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub text: String,
}

/// Captured output of a node execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLogs {
    pub lines: Vec<LogLine>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl ExecutionLogs {
    /// Start an empty log at the given instant.
    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            lines: Vec::new(),
            started_at: at,
            ended_at: None,
            exit_code: None,
        }
    }

    /// Append one line per non-empty line of `text`, all tagged with `stream`.
    pub fn push_text(&mut self, stream: LogStream, text: &str) {
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            self.lines.push(LogLine {
                timestamp: Utc::now(),
                stream,
                text: line.to_string(),
            });
        }
    }

    /// Close the log with an exit code.
    pub fn finish(&mut self, exit_code: i32) {
        self.ended_at = Some(Utc::now());
        self.exit_code = Some(exit_code);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
