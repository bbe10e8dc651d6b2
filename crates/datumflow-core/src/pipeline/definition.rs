//! Pipeline definition parsing, validation and file loading.
//!
//! Pipelines are exchanged as JSON (the editor's native format) or YAML.
//! Parsing only deserializes; `validation_issues` reports every structural
//! problem it finds so callers can show them all at once.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use datumflow_types::node_config::{DatasetConfig, ExecuteConfig, VersioningConfig};
use datumflow_types::pipeline::{Node, NodeKind, Pipeline};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use super::binding::template_references;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DefinitionError {
    /// JSON/YAML parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// The file extension is neither JSON nor YAML.
    #[error("unsupported pipeline file format: {0}")]
    UnsupportedFormat(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

pub fn parse_pipeline_json(json: &str) -> Result<Pipeline, DefinitionError> {
    serde_json::from_str(json).map_err(|e| DefinitionError::ParseError(e.to_string()))
}

pub fn parse_pipeline_yaml(yaml: &str) -> Result<Pipeline, DefinitionError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::ParseError(e.to_string()))
}

pub fn serialize_pipeline_json(pipeline: &Pipeline) -> Result<String, DefinitionError> {
    serde_json::to_string_pretty(pipeline).map_err(|e| DefinitionError::ParseError(e.to_string()))
}

/// Load a pipeline file, choosing the format by extension
/// (`.json`, `.yaml`, `.yml`).
pub async fn load_pipeline_file(path: &Path) -> Result<Pipeline, DefinitionError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let parse: fn(&str) -> Result<Pipeline, DefinitionError> = match ext.as_str() {
        "json" => parse_pipeline_json,
        "yaml" | "yml" => parse_pipeline_yaml,
        _ => return Err(DefinitionError::UnsupportedFormat(path.display().to_string())),
    };

    let content = tokio::fs::read_to_string(path).await?;
    let pipeline = parse(&content)?;

    tracing::debug!(
        path = %path.display(),
        nodes = pipeline.nodes.len(),
        edges = pipeline.edges.len(),
        "loaded pipeline definition"
    );
    Ok(pipeline)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// One structural problem in a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// The node the problem belongs to, if any.
    pub node_id: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    fn pipeline(message: impl Into<String>) -> Self {
        Self {
            node_id: None,
            message: message.into(),
        }
    }

    fn node(node_id: &str, message: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.to_string()),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node_id {
            Some(id) => write!(f, "node '{id}': {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Collect every structural problem.
///
/// Checks:
/// - Node IDs are non-empty and unique
/// - Edges reference existing nodes and are not self-loops
/// - Each node's configuration decodes for its kind
/// - Execute step IDs are unique within their node
/// - `{{sourceNode.<NAME>}}` references are well formed
/// - Nodes using templates have an incoming edge
///
/// Cycles are not an error here; the run's cycle policy decides.
pub fn validation_issues(pipeline: &Pipeline) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    let mut ids = HashSet::new();
    for node in &pipeline.nodes {
        if node.id.trim().is_empty() {
            issues.push(ValidationIssue::pipeline("node with an empty ID"));
        } else if !ids.insert(node.id.as_str()) {
            issues.push(ValidationIssue::pipeline(format!(
                "duplicate node ID: '{}'",
                node.id
            )));
        }
    }

    for edge in &pipeline.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !ids.contains(endpoint.as_str()) {
                issues.push(ValidationIssue::pipeline(format!(
                    "edge {} -> {} references unknown node '{endpoint}'",
                    edge.source, edge.target
                )));
            }
        }
        if edge.source == edge.target {
            issues.push(ValidationIssue::node(&edge.source, "edge points to itself"));
        }
    }

    for node in &pipeline.nodes {
        check_config(node, &mut issues);

        let mut strings = Vec::new();
        collect_strings(&node.config, &mut strings);
        let mut uses_templates = false;
        for raw in strings {
            match template_references(raw) {
                Ok(refs) => uses_templates |= !refs.is_empty(),
                Err(e) => issues.push(ValidationIssue::node(&node.id, e.to_string())),
            }
        }
        if uses_templates && pipeline.incoming(&node.id).next().is_none() {
            issues.push(ValidationIssue::node(
                &node.id,
                "uses source templates but has no incoming edge",
            ));
        }
    }

    issues
}

/// `validation_issues`, folded into a single error.
pub fn validate_pipeline(pipeline: &Pipeline) -> Result<(), DefinitionError> {
    let issues = validation_issues(pipeline);
    if issues.is_empty() {
        return Ok(());
    }
    Err(DefinitionError::ValidationError(
        issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; "),
    ))
}

fn check_config(node: &Node, issues: &mut Vec<ValidationIssue>) {
    let decoded = match node.kind {
        NodeKind::Dataset => decode::<DatasetConfig>(&node.config).map(|_| ()),
        NodeKind::Versioning => decode::<VersioningConfig>(&node.config).map(|_| ()),
        NodeKind::Execute => decode::<ExecuteConfig>(&node.config).map(|config| {
            let mut step_ids = HashSet::new();
            for step in &config.steps {
                if !step_ids.insert(step.id.as_str()) {
                    issues.push(ValidationIssue::node(
                        &node.id,
                        format!("duplicate step ID: '{}'", step.id),
                    ));
                }
            }
        }),
        NodeKind::Training | NodeKind::Experiment | NodeKind::Report | NodeKind::Other(_) => {
            Ok(())
        }
    };

    if let Err(reason) = decoded {
        issues.push(ValidationIssue::node(
            &node.id,
            format!("invalid {} configuration: {reason}", node.kind),
        ));
    }
}

fn decode<T: DeserializeOwned>(config: &Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(config.clone())
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use datumflow_types::pipeline::Edge;
    use serde_json::json;

    const CHAIN_JSON: &str = r#"{
        "name": "churn",
        "nodes": [
            { "id": "d", "type": "dataset", "label": "Raw", "config": { "path": "/data/a.csv" } },
            { "id": "e", "type": "execute", "config": { "steps": [{
                "id": "clean",
                "script": { "kind": "file", "path": "clean.py" },
                "inputMappings": [{ "variable": "DATA_SOURCE", "source": "inputPath" }],
                "outputVariables": ["OUTPUT_PATH"]
            }] } },
            { "id": "v", "type": "versioning", "config": {
                "tool": "dvc", "action": "add_version",
                "inputPath": "{{ sourceNode.OUTPUT_PATH }}"
            } }
        ],
        "edges": [
            { "id": "e1", "source": "d", "target": "e" },
            { "source": "e", "target": "v" }
        ]
    }"#;

    #[test]
    fn test_parse_json_chain() {
        let p = parse_pipeline_json(CHAIN_JSON).unwrap();
        assert_eq!(p.name, "churn");
        assert_eq!(p.nodes.len(), 3);
        assert_eq!(p.nodes[0].display_label(), "Raw");
        assert_eq!(p.nodes[1].kind, NodeKind::Execute);
        assert_eq!(p.edges[0].id.as_deref(), Some("e1"));
        assert!(validation_issues(&p).is_empty(), "{:?}", validation_issues(&p));
        assert!(validate_pipeline(&p).is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
name: yaml-pipe
nodes:
  - id: d
    type: dataset
    config:
      path: /data/a.csv
  - id: r
    type: report
edges:
  - source: d
    target: r
"#;
        let p = parse_pipeline_yaml(yaml).unwrap();
        assert_eq!(p.nodes[1].kind, NodeKind::Report);
        assert!(validation_issues(&p).is_empty());
    }

    #[test]
    fn test_parse_keeps_unlisted_kind() {
        let p = parse_pipeline_json(
            r#"{ "nodes": [{ "id": "x", "type": "deploy", "config": { "target": "prod" } }] }"#,
        )
        .unwrap();
        assert_eq!(p.nodes[0].kind, NodeKind::Other("deploy".into()));
        assert!(validation_issues(&p).is_empty());

        let json = serialize_pipeline_json(&p).unwrap();
        assert!(json.contains(r#""type": "deploy""#));
    }

    #[test]
    fn test_json_serialize_round_trip() {
        let p = parse_pipeline_json(CHAIN_JSON).unwrap();
        let json = serialize_pipeline_json(&p).unwrap();
        let back = parse_pipeline_json(&json).unwrap();
        assert_eq!(back.nodes.len(), 3);
        assert_eq!(back.edges, p.edges);
    }

    #[test]
    fn test_duplicate_and_unknown_references() {
        let mut p = Pipeline::new("bad");
        p.nodes = vec![
            Node::new("a", NodeKind::Report, json!({})),
            Node::new("a", NodeKind::Report, json!({})),
        ];
        p.edges = vec![Edge::new("a", "ghost"), Edge::new("a", "a")];

        let messages: Vec<String> = validation_issues(&p).iter().map(ToString::to_string).collect();
        assert!(messages.iter().any(|m| m.contains("duplicate node ID: 'a'")));
        assert!(messages.iter().any(|m| m.contains("unknown node 'ghost'")));
        assert!(messages.iter().any(|m| m == "node 'a': edge points to itself"));
    }

    #[test]
    fn test_invalid_config_reported() {
        let mut p = Pipeline::new("bad");
        p.nodes = vec![Node::new("v", NodeKind::Versioning, json!({ "tool": "dvc" }))];

        let issues = validation_issues(&p);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].node_id.as_deref(), Some("v"));
        assert!(issues[0].message.starts_with("invalid versioning configuration"));
    }

    #[test]
    fn test_duplicate_step_ids() {
        let step = json!({ "id": "s", "script": { "kind": "inline", "body": "x" } });
        let mut p = Pipeline::new("bad");
        p.nodes = vec![Node::new(
            "e",
            NodeKind::Execute,
            json!({ "steps": [step.clone(), step] }),
        )];

        let issues = validation_issues(&p);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("duplicate step ID: 's'"));
    }

    #[test]
    fn test_malformed_template_and_missing_source() {
        let mut p = Pipeline::new("bad");
        p.nodes = vec![
            Node::new("d", NodeKind::Dataset, json!({ "path": "{{sourceNode.}}" })),
            Node::new("r", NodeKind::Report, json!({ "title": "{{sourceNode.OUT}}" })),
        ];

        let messages: Vec<String> = validation_issues(&p).iter().map(ToString::to_string).collect();
        assert!(messages.iter().any(|m| m.contains("malformed template reference")));
        assert!(
            messages
                .iter()
                .any(|m| m == "node 'r': uses source templates but has no incoming edge")
        );
    }

    #[test]
    fn test_validate_pipeline_joins_issues() {
        let mut p = Pipeline::new("bad");
        p.edges = vec![Edge::new("x", "y")];
        let err = validate_pipeline(&p).unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("validation error:"));
        assert!(text.contains("'x'") && text.contains("'y'"));
    }

    #[tokio::test]
    async fn test_load_pipeline_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let json_path = dir.path().join("p.json");
        tokio::fs::write(&json_path, CHAIN_JSON).await.unwrap();
        assert_eq!(load_pipeline_file(&json_path).await.unwrap().nodes.len(), 3);

        let yaml_path = dir.path().join("p.YML");
        tokio::fs::write(&yaml_path, "name: y\nnodes: []\n").await.unwrap();
        assert_eq!(load_pipeline_file(&yaml_path).await.unwrap().name, "y");

        let txt_path = dir.path().join("p.txt");
        let err = load_pipeline_file(&txt_path).await.unwrap_err();
        assert!(matches!(err, DefinitionError::UnsupportedFormat(_)));

        let missing = dir.path().join("missing.json");
        let err = load_pipeline_file(&missing).await.unwrap_err();
        assert!(matches!(err, DefinitionError::IoError(_)));
    }
}
