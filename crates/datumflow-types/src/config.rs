//! Global configuration types for Datumflow.
//!
//! `GlobalConfig` represents the top-level `config.toml` that controls how
//! the orchestrator schedules nodes and how logging is set up.

use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// Loaded from `~/.datumflow/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Scheduling and failure policy for pipeline runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Sequential (one node at a time) or parallel across independent branches.
    #[serde(default)]
    pub mode: ExecutionModeSetting,
    /// Upper bound on in-flight nodes in parallel mode.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// What to do with nodes that sit on or behind a dependency cycle.
    #[serde(default)]
    pub cycle_policy: CyclePolicy,
    /// Per-node dispatch timeout. `None` waits indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_timeout_secs: Option<u64>,
    /// Capacity of the run event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_event_capacity() -> usize {
    256
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            mode: ExecutionModeSetting::default(),
            max_concurrency: default_max_concurrency(),
            cycle_policy: CyclePolicy::default(),
            node_timeout_secs: None,
            event_capacity: default_event_capacity(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionModeSetting {
    #[default]
    Sequential,
    Parallel,
}

/// Handling of nodes that can never become ready because of a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePolicy {
    /// Leave them out of the run and report their IDs as omitted.
    #[default]
    Omit,
    /// Refuse to start the run.
    Reject,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Bridge tracing spans to OpenTelemetry (stdout exporter).
    #[serde(default)]
    pub otel: bool,
}
