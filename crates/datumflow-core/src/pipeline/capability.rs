//! Contracts for the external collaborators a run depends on.
//!
//! The orchestrator never talks to storage, interpreters or versioning tools
//! itself. Each is a trait defined here and implemented elsewhere (the editor
//! backend, or an in-memory fake in tests). The traits return boxed futures so
//! they stay object-safe and can be held as `Arc<dyn …>`.
//!
//! An `Err(CapabilityError)` means the call itself blew up; a response with
//! `success: false` means the collaborator ran and reported failure. The
//! dispatcher treats the two differently in the run report.

use std::collections::HashMap;
use std::sync::Arc;

use datumflow_types::node_config::{DatasetConfig, ScriptStep, VersioningConfig};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Fault raised by a capability call.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    /// The collaborator could not be reached.
    #[error("capability unavailable: {0}")]
    Unavailable(String),

    /// Any other failure while making the call.
    #[error("{0}")]
    Fault(String),
}

pub type CapabilityResult<'a, T> = BoxFuture<'a, Result<T, CapabilityError>>;

// ---------------------------------------------------------------------------
// Dataset connectivity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetCheck {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Checks that a dataset source is reachable and lists it.
pub trait DatasetProbe: Send + Sync {
    fn check<'a>(&'a self, config: &'a DatasetConfig) -> CapabilityResult<'a, DatasetCheck>;
}

// ---------------------------------------------------------------------------
// Script execution
// ---------------------------------------------------------------------------

/// A step with its input mappings already resolved to concrete values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedStep {
    pub step: ScriptStep,
    /// Mapping variable -> concrete value.
    pub variables: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptRunRequest {
    pub node_id: String,
    /// Enabled steps in execution order.
    pub steps: Vec<ResolvedStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: String,
    /// Values of the step's declared output variables.
    #[serde(default)]
    pub output_paths: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptRunResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default)]
    pub step_results: Vec<StepResult>,
}

/// Runs the script steps of an execute node, sequentially.
pub trait ScriptRunner: Send + Sync {
    fn run(&self, request: ScriptRunRequest) -> CapabilityResult<'_, ScriptRunResponse>;
}

// ---------------------------------------------------------------------------
// Dataset versioning
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersioningRequest {
    pub node_id: String,
    /// Configuration with templates resolved and input paths filled in.
    pub config: VersioningConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersioningResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_name: Option<String>,
    /// Set after a create so later runs add versions instead.
    #[serde(default)]
    pub should_switch_to_version: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_dataset: Option<DatasetRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Lists, downloads, creates or versions datasets in a versioning tool.
pub trait VersioningService: Send + Sync {
    fn execute(&self, request: VersioningRequest) -> CapabilityResult<'_, VersioningResponse>;
}

// ---------------------------------------------------------------------------
// Capabilities bundle
// ---------------------------------------------------------------------------

/// The full set of collaborators a dispatcher needs.
#[derive(Clone)]
pub struct Capabilities {
    pub datasets: Arc<dyn DatasetProbe>,
    pub scripts: Arc<dyn ScriptRunner>,
    pub versioning: Arc<dyn VersioningService>,
}

impl Capabilities {
    pub fn new(
        datasets: Arc<dyn DatasetProbe>,
        scripts: Arc<dyn ScriptRunner>,
        versioning: Arc<dyn VersioningService>,
    ) -> Self {
        Self {
            datasets,
            scripts,
            versioning,
        }
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities").finish_non_exhaustive()
    }
}
