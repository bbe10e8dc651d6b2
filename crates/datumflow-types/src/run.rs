//! Run-scoped results: node outputs, per-node execution results and the
//! ordered run report.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::pipeline::NodeKind;

/// Data a successful node hands downstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOutput {
    /// Primary output path.
    pub path: String,
    /// Named values published for downstream templates.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub named_outputs: HashMap<String, String>,
}

impl NodeOutput {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            named_outputs: HashMap::new(),
        }
    }

    /// Builder-style named output.
    pub fn with_named(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.named_outputs.insert(key.into(), value.into());
        self
    }

    /// Named output keys, sorted for stable display.
    pub fn available_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.named_outputs.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Outcome of one attempted node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub node_id: String,
    pub node_label: String,
    pub node_type: NodeKind,
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_paths: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Ordered list of per-node outcomes produced by one run.
///
/// Append-only while the run is in flight. The first failing entry, if any,
/// is always the last entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunReport {
    results: Vec<ExecutionResult>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: ExecutionResult) {
        self.results.push(result);
    }

    pub fn results(&self) -> &[ExecutionResult] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Whether every attempted node succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }

    /// The failing entry that halted the run.
    pub fn first_failure(&self) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| !r.success)
    }

    /// Node IDs in report order.
    pub fn node_ids(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.node_id.as_str()).collect()
    }
}

impl IntoIterator for RunReport {
    type Item = ExecutionResult;
    type IntoIter = std::vec::IntoIter<ExecutionResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}
