//! Kind-specific node configurations.
//!
//! The graph model stores `Node::config` as opaque JSON; the dispatcher
//! decodes it into one of these structs according to the node's kind. Field
//! values may contain `{{sourceNode.<NAME>}}` template references which are
//! resolved at dispatch time.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Dataset
// ---------------------------------------------------------------------------

/// Configuration of a dataset node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetConfig {
    /// Storage backend identifier (e.g. "local", "s3", "gcs").
    #[serde(default = "default_source_kind")]
    pub source_kind: String,
    /// Path or URI of the dataset within the source.
    pub path: String,
    /// Name of a stored credential; never the credential itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_ref: Option<String>,
}

fn default_source_kind() -> String {
    "local".to_string()
}

// ---------------------------------------------------------------------------
// Execute
// ---------------------------------------------------------------------------

/// The mapping source that binds a variable to the resolved upstream path.
pub const INPUT_PATH_SOURCE: &str = "inputPath";

/// Configuration of a script-execution node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteConfig {
    /// Ordered script steps.
    #[serde(default)]
    pub steps: Vec<ScriptStep>,
}

impl ExecuteConfig {
    /// Steps that will actually run, in order.
    pub fn enabled_steps(&self) -> impl Iterator<Item = &ScriptStep> {
        self.steps.iter().filter(|s| s.enabled)
    }
}

/// One script invocation inside an execute node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptStep {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub script: ScriptSource,
    /// Interpreter environment selection (e.g. a venv or conda env name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Variables passed to the script and where their values come from.
    #[serde(default)]
    pub input_mappings: Vec<InputMapping>,
    /// Names of the variables the script publishes.
    #[serde(default)]
    pub output_variables: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl ScriptStep {
    /// Whether any mapping binds to the upstream input path.
    pub fn requires_input_path(&self) -> bool {
        self.input_mappings.iter().any(InputMapping::is_input_path)
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Where a step's script comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptSource {
    /// A script file on disk.
    File { path: String },
    /// An inline script body.
    Inline {
        body: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
}

/// `variable <- source` binding for a script step.
///
/// `source` is either [`INPUT_PATH_SOURCE`] or a string that may contain
/// template references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputMapping {
    pub variable: String,
    pub source: String,
}

impl InputMapping {
    pub fn is_input_path(&self) -> bool {
        self.source == INPUT_PATH_SOURCE
    }
}

// ---------------------------------------------------------------------------
// Versioning
// ---------------------------------------------------------------------------

/// Configuration of a dataset-versioning node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersioningConfig {
    /// Versioning tool (e.g. "dvc", "lakefs").
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub action: VersioningAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Primary input path; may be a template. Defaults to the upstream path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    /// Additional input paths; each may be a template.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_paths: Vec<String>,
    /// Destination for downloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// What a versioning node does when run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersioningAction {
    List,
    Download,
    Create,
    AddVersion,
}

impl VersioningAction {
    /// Actions that upload data and therefore need an input path.
    pub fn requires_input(&self) -> bool {
        matches!(self, VersioningAction::Create | VersioningAction::AddVersion)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
