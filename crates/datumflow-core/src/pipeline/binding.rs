//! Run-scoped output table and `{{sourceNode.<NAME>}}` resolution.
//!
//! A node reads data from "its" upstream producer: the source of the first
//! incoming edge, in edge insertion order. Templates name either one of the
//! producer's named outputs or, case-insensitively, the generic aliases
//! `outputPath` / `path` for its primary path.
//!
//! Resolution is lazy: a template is resolved when its owning node is
//! dispatched, against the outputs recorded so far in the same run.

use std::collections::HashMap;

use datumflow_types::pipeline::Edge;
use datumflow_types::run::NodeOutput;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Logical alias for "this node's direct predecessor".
pub const SOURCE_ALIAS: &str = "sourceNode";

/// Variable names that fall back to the producer's primary path.
const PRIMARY_PATH_ALIASES: [&str; 2] = ["outputpath", "path"];

// ---------------------------------------------------------------------------
// BindingError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    /// The node has no incoming edge.
    #[error("no source node connected to '{node_id}'")]
    NoSourceConnected { node_id: String },

    /// The upstream node has not produced an output in this run.
    #[error("source node '{source_id}' has no output")]
    NoSourceOutput { source_id: String },

    /// The template names a variable the producer did not publish.
    #[error(
        "variable '{variable}' not found in source node outputs (available: {})",
        format_keys(.available)
    )]
    UnresolvedVariable {
        variable: String,
        available: Vec<String>,
    },

    /// A `{{sourceNode.…}}` token with an empty or invalid variable name.
    #[error("malformed template reference '{0}'")]
    MalformedTemplate(String),
}

fn format_keys(keys: &[String]) -> String {
    if keys.is_empty() {
        "none".to_string()
    } else {
        keys.join(", ")
    }
}

// ---------------------------------------------------------------------------
// OutputTable
// ---------------------------------------------------------------------------

/// Outputs of the nodes that succeeded in the current run, keyed by node ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct OutputTable {
    outputs: HashMap<String, NodeOutput>,
}

impl OutputTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node_id: impl Into<String>, output: NodeOutput) {
        self.outputs.insert(node_id.into(), output);
    }

    pub fn get(&self, node_id: &str) -> Option<&NodeOutput> {
        self.outputs.get(node_id)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.outputs.contains_key(node_id)
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &NodeOutput)> {
        self.outputs.iter()
    }

    pub fn into_inner(self) -> HashMap<String, NodeOutput> {
        self.outputs
    }
}

// ---------------------------------------------------------------------------
// Predecessor
// ---------------------------------------------------------------------------

/// The upstream producer a node reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predecessor<'a> {
    None,
    One(&'a str),
    /// Several incoming edges; only the first is consulted.
    Many { first: &'a str, ignored: usize },
}

impl<'a> Predecessor<'a> {
    pub fn of(node_id: &str, edges: &'a [Edge]) -> Self {
        let mut incoming = edges.iter().filter(|e| e.target == node_id);
        match incoming.next() {
            None => Predecessor::None,
            Some(first) => match incoming.count() {
                0 => Predecessor::One(first.source.as_str()),
                ignored => Predecessor::Many {
                    first: first.source.as_str(),
                    ignored,
                },
            },
        }
    }

    pub fn source(&self) -> Option<&'a str> {
        match *self {
            Predecessor::None => None,
            Predecessor::One(id) | Predecessor::Many { first: id, .. } => Some(id),
        }
    }
}

// ---------------------------------------------------------------------------
// BindingContext
// ---------------------------------------------------------------------------

/// Resolves template references for one node against the run's outputs.
#[derive(Debug, Clone, Copy)]
pub struct BindingContext<'a> {
    node_id: &'a str,
    edges: &'a [Edge],
    outputs: &'a OutputTable,
}

impl<'a> BindingContext<'a> {
    pub fn new(node_id: &'a str, edges: &'a [Edge], outputs: &'a OutputTable) -> Self {
        Self {
            node_id,
            edges,
            outputs,
        }
    }

    pub fn node_id(&self) -> &'a str {
        self.node_id
    }

    pub fn predecessor(&self) -> Predecessor<'a> {
        Predecessor::of(self.node_id, self.edges)
    }

    /// The output recorded for this node's upstream producer.
    pub fn source_output(&self) -> Result<&'a NodeOutput, BindingError> {
        let predecessor = self.predecessor();
        if let Predecessor::Many { first, ignored } = predecessor {
            tracing::debug!(
                node_id = self.node_id,
                source = first,
                ignored,
                "multiple incoming edges, reading from the first"
            );
        }
        let source_id = predecessor
            .source()
            .ok_or_else(|| BindingError::NoSourceConnected {
                node_id: self.node_id.to_string(),
            })?;
        self.outputs
            .get(source_id)
            .ok_or_else(|| BindingError::NoSourceOutput {
                source_id: source_id.to_string(),
            })
    }

    /// The upstream primary path, if one is available.
    pub fn input_path(&self) -> Option<String> {
        self.source_output().ok().map(|o| o.path.clone())
    }

    /// Resolve one variable name against the upstream output.
    pub fn resolve_variable(&self, variable: &str) -> Result<String, BindingError> {
        let output = self.source_output()?;

        if let Some(value) = output.named_outputs.get(variable) {
            return Ok(value.clone());
        }

        let lowered = variable.to_ascii_lowercase();
        if PRIMARY_PATH_ALIASES.contains(&lowered.as_str()) {
            return Ok(output.path.clone());
        }

        Err(BindingError::UnresolvedVariable {
            variable: variable.to_string(),
            available: output.available_keys(),
        })
    }

    /// Substitute every `{{sourceNode.<NAME>}}` token in `raw`.
    ///
    /// Text without tokens is returned unchanged and never consults the
    /// graph. `{{…}}` tokens that do not start with the source alias are
    /// left as literal text.
    pub fn resolve(&self, raw: &str) -> Result<String, BindingError> {
        let mut result = String::with_capacity(raw.len());
        let mut rest = raw;

        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start..].find("}}") else {
                break;
            };
            let token = &rest[start..start + len + 2];
            result.push_str(&rest[..start]);

            match parse_reference(token)? {
                Some(variable) => result.push_str(&self.resolve_variable(variable)?),
                None => result.push_str(token),
            }

            rest = &rest[start + len + 2..];
        }

        result.push_str(rest);
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Template parsing
// ---------------------------------------------------------------------------

/// Parse one `{{…}}` token.
///
/// Returns `Ok(None)` when the token does not reference the source alias.
pub fn parse_reference(token: &str) -> Result<Option<&str>, BindingError> {
    let inner = token
        .strip_prefix("{{")
        .and_then(|t| t.strip_suffix("}}"))
        .map(str::trim)
        .ok_or_else(|| BindingError::MalformedTemplate(token.to_string()))?;

    let Some(variable) = inner
        .strip_prefix(SOURCE_ALIAS)
        .and_then(|rest| rest.strip_prefix('.'))
    else {
        return Ok(None);
    };

    let valid = !variable.is_empty()
        && variable
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '[' | ']'));
    if !valid {
        return Err(BindingError::MalformedTemplate(token.to_string()));
    }

    Ok(Some(variable))
}

/// All variable names referenced by `raw`, in order of appearance.
pub fn template_references(raw: &str) -> Result<Vec<&str>, BindingError> {
    let mut names = Vec::new();
    let mut rest = raw;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start..].find("}}") else {
            break;
        };
        if let Some(variable) = parse_reference(&rest[start..start + len + 2])? {
            names.push(variable);
        }
        rest = &rest[start + len + 2..];
    }

    Ok(names)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
