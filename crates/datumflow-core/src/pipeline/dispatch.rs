//! Node dispatch: per-kind executors over the capability contracts.
//!
//! `NodeDispatcher::dispatch` decodes a node's configuration for its kind,
//! resolves template references against the run's outputs, invokes the
//! matching capability and normalizes the answer into a `DispatchOutcome`.
//! It never returns an error: every failure is folded into an outcome with
//! `success: false` so the orchestrator can record it verbatim.
//!
//! Kinds without an executor (training, experiment, report) pass their
//! upstream output through unchanged and succeed.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use datumflow_types::node_config::{
    DatasetConfig, ExecuteConfig, ScriptStep, VersioningAction, VersioningConfig,
};
use datumflow_types::pipeline::{ExecutionLogs, LogStream, Node, NodeKind};
use datumflow_types::run::NodeOutput;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::binding::{BindingContext, BindingError};
use super::capability::{
    Capabilities, CapabilityError, ResolvedStep, ScriptRunRequest, ScriptRunResponse,
    VersioningRequest, VersioningResponse,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Shown when an execute step needs the upstream path and there is none.
pub const NO_INPUT_PATH_MESSAGE: &str =
    "No input data path available. Please connect a Dataset node.";

/// Shown when a versioning upload has nothing to upload.
pub const NO_VERSIONING_INPUT_MESSAGE: &str =
    "No input path available for versioning. Connect an upstream node or set an input path.";

/// Named output holding a node's primary output path.
pub const OUTPUT_PATH_KEY: &str = "outputPath";

// ---------------------------------------------------------------------------
// DispatchError
// ---------------------------------------------------------------------------

/// Why a node failed. Converted into a failed `DispatchOutcome`.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A template reference could not be resolved.
    #[error(transparent)]
    Binding(#[from] BindingError),

    /// Steps need the upstream input path but none was resolved.
    #[error("{0}")]
    MissingRequiredInput(String),

    /// The capability ran and reported failure.
    #[error("{error}")]
    CapabilityFailure { message: String, error: String },

    /// The capability call faulted, or dispatch panicked.
    #[error("unexpected error: {0}")]
    UnexpectedFault(String),

    /// The node's configuration does not decode for its kind.
    #[error("invalid {kind} configuration: {reason}")]
    InvalidConfig { kind: NodeKind, reason: String },

    /// Dispatch did not finish within the configured timeout.
    #[error("node timed out after {limit:?}")]
    Timeout { limit: Duration },
}

impl From<CapabilityError> for DispatchError {
    fn from(err: CapabilityError) -> Self {
        DispatchError::UnexpectedFault(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// NodeMutation
// ---------------------------------------------------------------------------

/// A configuration change dispatch asks the orchestrator to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeMutation {
    /// Turn a "create dataset" versioning node into "add version" for the
    /// dataset it just created.
    SwitchToAddVersion {
        dataset_id: Option<String>,
        dataset_name: Option<String>,
    },
}

impl NodeMutation {
    /// Patch the node's configuration in place. Unknown keys are kept.
    pub fn apply(&self, node: &mut Node) {
        match self {
            NodeMutation::SwitchToAddVersion {
                dataset_id,
                dataset_name,
            } => {
                if !node.config.is_object() {
                    node.config = Value::Object(serde_json::Map::new());
                }
                if let Value::Object(map) = &mut node.config {
                    map.insert("action".to_string(), Value::from("add_version"));
                    if let Some(id) = dataset_id {
                        map.insert("datasetId".to_string(), Value::from(id.as_str()));
                    }
                    if let Some(name) = dataset_name {
                        map.insert("datasetName".to_string(), Value::from(name.as_str()));
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// DispatchOutcome
// ---------------------------------------------------------------------------

/// Normalized result of dispatching one node.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub success: bool,
    pub message: String,
    pub output_path: Option<String>,
    pub named_outputs: Option<HashMap<String, String>>,
    pub error: Option<String>,
    pub logs: Option<ExecutionLogs>,
    pub mutation: Option<NodeMutation>,
}

impl DispatchOutcome {
    pub fn succeeded(message: impl Into<String>, output_path: Option<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            output_path,
            named_outputs: None,
            error: None,
            logs: None,
            mutation: None,
        }
    }

    pub fn failed(err: DispatchError) -> Self {
        let (message, error) = match err {
            DispatchError::CapabilityFailure { message, error } => (message, error),
            other => {
                let text = other.to_string();
                (text.clone(), text)
            }
        };
        Self {
            success: false,
            message,
            output_path: None,
            named_outputs: None,
            error: Some(error),
            logs: None,
            mutation: None,
        }
    }

    pub fn with_named_outputs(mut self, named: HashMap<String, String>) -> Self {
        self.named_outputs = Some(named);
        self
    }

    pub fn with_logs(mut self, logs: ExecutionLogs) -> Self {
        self.logs = Some(logs);
        self
    }

    pub fn with_mutation(mut self, mutation: NodeMutation) -> Self {
        self.mutation = Some(mutation);
        self
    }

    /// The output to register for downstream nodes, if the node succeeded.
    pub fn node_output(&self) -> Option<NodeOutput> {
        self.success.then(|| NodeOutput {
            path: self.output_path.clone().unwrap_or_default(),
            named_outputs: self.named_outputs.clone().unwrap_or_default(),
        })
    }
}

// ---------------------------------------------------------------------------
// NodeDispatcher
// ---------------------------------------------------------------------------

/// Executes individual nodes by dispatching to kind-specific handlers.
#[derive(Debug, Clone)]
pub struct NodeDispatcher {
    capabilities: Capabilities,
}

impl NodeDispatcher {
    pub fn new(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }

    /// Run a node and return its normalized outcome.
    pub async fn dispatch(&self, node: &Node, ctx: &BindingContext<'_>) -> DispatchOutcome {
        let result = match node.kind {
            NodeKind::Dataset => self.run_dataset(node, ctx).await,
            NodeKind::Execute => self.run_execute(node, ctx).await,
            NodeKind::Versioning => self.run_versioning(node, ctx).await,
            NodeKind::Training
            | NodeKind::Experiment
            | NodeKind::Report
            | NodeKind::Other(_) => {
                Ok(self.pass_through(node, ctx))
            }
        };

        result.unwrap_or_else(|err| {
            tracing::debug!(node_id = node.id.as_str(), error = %err, "node dispatch failed");
            DispatchOutcome::failed(err)
        })
    }

    // -- Dataset: connectivity check against the configured source --

    async fn run_dataset(
        &self,
        node: &Node,
        ctx: &BindingContext<'_>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let mut config: DatasetConfig = decode_config(node)?;
        config.path = ctx.resolve(&config.path)?;

        tracing::debug!(
            node_id = node.id.as_str(),
            source_kind = config.source_kind.as_str(),
            path = config.path.as_str(),
            "checking dataset"
        );

        let check = self.capabilities.datasets.check(&config).await?;
        if !check.success {
            return Err(DispatchError::CapabilityFailure {
                message: format!("Dataset check failed for '{}'", config.path),
                error: check
                    .error
                    .unwrap_or_else(|| "dataset check failed".to_string()),
            });
        }

        let file_count = check.file_count.unwrap_or(0);
        Ok(DispatchOutcome::succeeded(
            format!("Connected to dataset: {file_count} files found"),
            Some(config.path),
        ))
    }

    // -- Execute: resolve step inputs, run steps, merge outputs and logs --

    async fn run_execute(
        &self,
        node: &Node,
        ctx: &BindingContext<'_>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let config: ExecuteConfig = decode_config(node)?;
        let steps: Vec<&ScriptStep> = config.enabled_steps().collect();
        let input_path = ctx.input_path();

        if steps.is_empty() {
            return Ok(DispatchOutcome::succeeded(
                "No enabled steps to run",
                input_path,
            ));
        }

        if steps.iter().any(|s| s.requires_input_path()) && input_path.is_none() {
            return Err(DispatchError::MissingRequiredInput(
                NO_INPUT_PATH_MESSAGE.to_string(),
            ));
        }

        let mut resolved = Vec::with_capacity(steps.len());
        for step in &steps {
            let mut variables = HashMap::with_capacity(step.input_mappings.len());
            for mapping in &step.input_mappings {
                let value = match (&input_path, mapping.is_input_path()) {
                    (Some(path), true) => path.clone(),
                    _ => ctx.resolve(&mapping.source)?,
                };
                variables.insert(mapping.variable.clone(), value);
            }
            resolved.push(ResolvedStep {
                step: (*step).clone(),
                variables,
            });
        }

        tracing::debug!(
            node_id = node.id.as_str(),
            steps = resolved.len(),
            input_path = input_path.as_deref().unwrap_or(""),
            "running script steps"
        );

        let started_at = Utc::now();
        let response = self
            .capabilities
            .scripts
            .run(ScriptRunRequest {
                node_id: node.id.clone(),
                steps: resolved,
                input_path,
            })
            .await?;

        let logs = flatten_step_logs(&steps, &response, started_at);

        if !response.success {
            let error = response
                .step_results
                .iter()
                .find_map(|r| r.error.clone())
                .unwrap_or_else(|| response.message.clone());
            return Ok(DispatchOutcome::failed(DispatchError::CapabilityFailure {
                message: response.message,
                error,
            })
            .with_logs(logs));
        }

        let mut named = HashMap::new();
        for result in &response.step_results {
            named.extend(result.output_paths.clone());
        }
        if let Some(path) = &response.output_path {
            named.insert(OUTPUT_PATH_KEY.to_string(), path.clone());
        }

        Ok(
            DispatchOutcome::succeeded(response.message, response.output_path)
                .with_named_outputs(named)
                .with_logs(logs),
        )
    }

    // -- Versioning: list/download/create/add-version --

    async fn run_versioning(
        &self,
        node: &Node,
        ctx: &BindingContext<'_>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let mut config: VersioningConfig = decode_config(node)?;

        let input_path = match config.input_path.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(ctx.resolve(raw)?),
            _ => ctx.input_path(),
        };
        let extra_inputs = config
            .input_paths
            .iter()
            .map(|p| ctx.resolve(p))
            .collect::<Result<Vec<_>, _>>()?;

        if config.action.requires_input() && input_path.is_none() && extra_inputs.is_empty() {
            return Err(DispatchError::MissingRequiredInput(
                NO_VERSIONING_INPUT_MESSAGE.to_string(),
            ));
        }

        if let Some(out) = config.output_path.take() {
            config.output_path = Some(ctx.resolve(&out)?);
        }
        config.input_path = input_path.clone();
        config.input_paths = extra_inputs.clone();

        let action = config.action;
        tracing::debug!(
            node_id = node.id.as_str(),
            tool = config.tool.as_str(),
            action = ?action,
            "running versioning action"
        );

        let response = self
            .capabilities
            .versioning
            .execute(VersioningRequest {
                node_id: node.id.clone(),
                config,
            })
            .await?;

        if !response.success {
            return Err(DispatchError::CapabilityFailure {
                error: response
                    .error
                    .clone()
                    .unwrap_or_else(|| response.message.clone()),
                message: response.message,
            });
        }

        let mut inputs: Vec<String> = input_path.iter().cloned().chain(extra_inputs).collect();
        if !response.input_paths.is_empty() {
            inputs = response.input_paths.clone();
        }

        let named = versioning_named_outputs(&response, input_path.as_deref(), &inputs);
        let output_path = named.get(OUTPUT_PATH_KEY).cloned();
        let mutation = switch_mutation(action, &response);

        let mut outcome = DispatchOutcome::succeeded(response.message, output_path)
            .with_named_outputs(named);
        if let Some(mutation) = mutation {
            outcome = outcome.with_mutation(mutation);
        }
        Ok(outcome)
    }

    // -- Default: hand the upstream output through --

    fn pass_through(&self, node: &Node, ctx: &BindingContext<'_>) -> DispatchOutcome {
        let message = format!("{} execution not implemented yet", capitalize(node.kind.as_str()));
        let Ok(upstream) = ctx.source_output() else {
            return DispatchOutcome::succeeded(message, None);
        };
        let outcome = DispatchOutcome::succeeded(message, Some(upstream.path.clone()));
        if upstream.named_outputs.is_empty() {
            outcome
        } else {
            outcome.with_named_outputs(upstream.named_outputs.clone())
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn decode_config<T: DeserializeOwned>(node: &Node) -> Result<T, DispatchError> {
    serde_json::from_value(node.config.clone()).map_err(|e| DispatchError::InvalidConfig {
        kind: node.kind.clone(),
        reason: e.to_string(),
    })
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Flatten per-step stdout/stderr into one timestamped log.
fn flatten_step_logs(
    steps: &[&ScriptStep],
    response: &ScriptRunResponse,
    started_at: chrono::DateTime<Utc>,
) -> ExecutionLogs {
    let mut logs = ExecutionLogs::started(started_at);

    for (i, result) in response.step_results.iter().enumerate() {
        let name = steps
            .iter()
            .find(|s| s.id == result.step_id)
            .or_else(|| steps.get(i))
            .map(|s| s.display_name())
            .unwrap_or(result.step_id.as_str());

        logs.push_text(LogStream::System, &format!("Running step: {name}"));
        if let Some(stdout) = &result.stdout {
            logs.push_text(LogStream::Stdout, stdout);
        }
        if let Some(stderr) = &result.stderr {
            logs.push_text(LogStream::Stderr, stderr);
        }
        if let Some(error) = &result.error {
            logs.push_text(LogStream::Stderr, error);
        }
    }

    logs.push_text(LogStream::System, &response.message);
    logs.finish(if response.success { 0 } else { 1 });
    logs
}

fn versioning_named_outputs(
    response: &VersioningResponse,
    input_path: Option<&str>,
    inputs: &[String],
) -> HashMap<String, String> {
    let mut named = HashMap::new();

    let primary_input = response
        .input_path
        .clone()
        .or_else(|| input_path.map(str::to_string))
        .or_else(|| inputs.first().cloned());
    let output = response
        .output_path
        .clone()
        .or_else(|| primary_input.clone())
        .unwrap_or_default();

    named.insert(OUTPUT_PATH_KEY.to_string(), output);
    if let Some(input) = primary_input {
        named.insert("inputPath".to_string(), input);
    }
    if inputs.len() > 1 {
        for (i, path) in inputs.iter().enumerate() {
            named.insert(format!("inputPaths[{i}]"), path.clone());
        }
        named.insert("inputPaths".to_string(), inputs.join(","));
    }
    if let Some(id) = &response.dataset_id {
        named.insert("datasetId".to_string(), id.clone());
    }
    if let Some(name) = &response.dataset_name {
        named.insert("datasetName".to_string(), name.clone());
    }

    named
}

fn switch_mutation(action: VersioningAction, response: &VersioningResponse) -> Option<NodeMutation> {
    if action != VersioningAction::Create || !response.should_switch_to_version {
        return None;
    }
    let created = response.created_dataset.as_ref();
    Some(NodeMutation::SwitchToAddVersion {
        dataset_id: created
            .map(|d| d.id.clone())
            .or_else(|| response.dataset_id.clone()),
        dataset_name: created
            .and_then(|d| d.name.clone())
            .or_else(|| response.dataset_name.clone()),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
