//! End-to-end runs against an in-memory backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use datumflow_core::pipeline::capability::{
    Capabilities, CapabilityResult, DatasetCheck, DatasetProbe, ScriptRunRequest,
    ScriptRunResponse, ScriptRunner, StepResult, VersioningRequest, VersioningResponse,
    VersioningService,
};
use datumflow_core::pipeline::dispatch::{NO_INPUT_PATH_MESSAGE, NodeDispatcher};
use datumflow_core::pipeline::orchestrator::{
    ExecutionMode, OrchestratorConfig, PipelineOrchestrator,
};
use datumflow_core::pipeline::topology::resolve_order;
use datumflow_types::node_config::DatasetConfig;
use datumflow_types::pipeline::{Edge, Node, NodeKind, NodeStatus, Pipeline};
use serde_json::json;

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Backend {
    /// Dataset paths that fail their connectivity check, with the error.
    broken_datasets: HashMap<String, String>,
    /// Named outputs each execute node publishes.
    script_outputs: HashMap<String, HashMap<String, String>>,
    dataset_calls: Mutex<Vec<String>>,
    script_calls: Mutex<Vec<ScriptRunRequest>>,
    versioning_calls: Mutex<Vec<VersioningRequest>>,
}

impl Backend {
    fn with_broken_dataset(mut self, path: &str, error: &str) -> Self {
        self.broken_datasets.insert(path.to_string(), error.to_string());
        self
    }

    fn with_script_output(mut self, node_id: &str, var: &str, value: &str) -> Self {
        self.script_outputs
            .entry(node_id.to_string())
            .or_default()
            .insert(var.to_string(), value.to_string());
        self
    }

    fn total_calls(&self) -> usize {
        self.dataset_calls.lock().unwrap().len()
            + self.script_calls.lock().unwrap().len()
            + self.versioning_calls.lock().unwrap().len()
    }
}

impl DatasetProbe for Backend {
    fn check<'a>(&'a self, config: &'a DatasetConfig) -> CapabilityResult<'a, DatasetCheck> {
        Box::pin(async move {
            self.dataset_calls.lock().unwrap().push(config.path.clone());
            Ok(match self.broken_datasets.get(&config.path) {
                Some(error) => DatasetCheck {
                    success: false,
                    file_count: None,
                    error: Some(error.clone()),
                },
                None => DatasetCheck {
                    success: true,
                    file_count: Some(1),
                    error: None,
                },
            })
        })
    }
}

impl ScriptRunner for Backend {
    fn run(&self, request: ScriptRunRequest) -> CapabilityResult<'_, ScriptRunResponse> {
        Box::pin(async move {
            let outputs = self
                .script_outputs
                .get(&request.node_id)
                .cloned()
                .unwrap_or_default();
            let step_results = request
                .steps
                .iter()
                .map(|s| StepResult {
                    step_id: s.step.id.clone(),
                    output_paths: outputs.clone(),
                    stdout: Some("done".to_string()),
                    ..Default::default()
                })
                .collect();
            self.script_calls.lock().unwrap().push(request);
            Ok(ScriptRunResponse {
                success: true,
                message: "steps finished".to_string(),
                output_path: None,
                step_results,
            })
        })
    }
}

impl VersioningService for Backend {
    fn execute(&self, request: VersioningRequest) -> CapabilityResult<'_, VersioningResponse> {
        Box::pin(async move {
            let output_path = request.config.input_path.clone();
            self.versioning_calls.lock().unwrap().push(request);
            Ok(VersioningResponse {
                success: true,
                message: "version added".to_string(),
                output_path,
                ..Default::default()
            })
        })
    }
}

fn orchestrator(backend: &Arc<Backend>, mode: ExecutionMode) -> PipelineOrchestrator {
    let capabilities = Capabilities::new(backend.clone(), backend.clone(), backend.clone());
    PipelineOrchestrator::new(
        NodeDispatcher::new(capabilities),
        OrchestratorConfig {
            mode,
            ..Default::default()
        },
    )
}

// ---------------------------------------------------------------------------
// Graph builders
// ---------------------------------------------------------------------------

fn dataset(id: &str, path: &str) -> Node {
    Node::new(id, NodeKind::Dataset, json!({ "path": path }))
}

fn execute(id: &str) -> Node {
    Node::new(
        id,
        NodeKind::Execute,
        json!({
            "steps": [{
                "id": "s1",
                "name": "Transform",
                "script": { "kind": "file", "path": "transform.py" },
                "inputMappings": [{ "variable": "DATA_SOURCE", "source": "inputPath" }],
                "outputVariables": ["OUTPUT_PATH"],
            }]
        }),
    )
}

fn versioning(id: &str, input: &str) -> Node {
    Node::new(
        id,
        NodeKind::Versioning,
        json!({ "tool": "dvc", "action": "add_version", "inputPath": input }),
    )
}

fn graph(nodes: Vec<Node>, edges: &[(&str, &str)]) -> Pipeline {
    let mut p = Pipeline::new("scenario");
    p.nodes = nodes;
    p.edges = edges.iter().map(|(s, t)| Edge::new(*s, *t)).collect();
    p
}

fn chain() -> Pipeline {
    graph(
        vec![
            dataset("D", "/data/a.csv"),
            execute("E"),
            versioning("V", "{{sourceNode.OUTPUT_PATH}}"),
        ],
        &[("D", "E"), ("E", "V")],
    )
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn linear_chain_succeeds_and_threads_outputs() {
    let backend = Arc::new(Backend::default().with_script_output("E", "OUTPUT_PATH", "/out/b.csv"));
    let mut p = chain();

    let outcome = orchestrator(&backend, ExecutionMode::Sequential)
        .run(&mut p)
        .await
        .unwrap();

    assert!(outcome.succeeded());
    assert_eq!(outcome.report.node_ids(), vec!["D", "E", "V"]);

    let script = backend.script_calls.lock().unwrap()[0].clone();
    assert_eq!(script.steps[0].variables["DATA_SOURCE"], "/data/a.csv");

    let version = backend.versioning_calls.lock().unwrap()[0].clone();
    assert_eq!(version.config.input_path.as_deref(), Some("/out/b.csv"));

    for id in ["D", "E", "V"] {
        assert_eq!(p.node(id).unwrap().status, NodeStatus::Completed);
    }
}

#[tokio::test]
async fn dataset_failure_halts_the_run() {
    let backend = Arc::new(Backend::default().with_broken_dataset("/data/a.csv", "connection failed"));
    let mut p = chain();

    let outcome = orchestrator(&backend, ExecutionMode::Sequential)
        .run(&mut p)
        .await
        .unwrap();

    assert_eq!(outcome.report.len(), 1);
    let d = &outcome.report.results()[0];
    assert_eq!(d.node_id, "D");
    assert!(!d.success);
    assert_eq!(d.error.as_deref(), Some("connection failed"));
    assert_eq!(p.node("E").unwrap().status, NodeStatus::Idle);
    assert_eq!(p.node("V").unwrap().status, NodeStatus::Idle);
    assert!(backend.script_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn missing_required_input_fails_before_capability() {
    let backend = Arc::new(Backend::default());
    let mut p = graph(vec![execute("E")], &[]);

    let outcome = orchestrator(&backend, ExecutionMode::Sequential)
        .run(&mut p)
        .await
        .unwrap();

    let e = outcome.report.first_failure().unwrap();
    assert_eq!(e.node_id, "E");
    assert_eq!(e.error.as_deref(), Some(NO_INPUT_PATH_MESSAGE));
    assert_eq!(
        NO_INPUT_PATH_MESSAGE,
        "No input data path available. Please connect a Dataset node."
    );
    assert_eq!(backend.total_calls(), 0);
}

#[tokio::test]
async fn unresolved_variable_lists_available_keys() {
    let backend = Arc::new(Backend::default().with_script_output("E", "OUTPUT_PATH", "/x"));
    let mut p = graph(
        vec![
            dataset("D", "/data/a.csv"),
            execute("E"),
            versioning("V", "{{sourceNode.MISSING}}"),
        ],
        &[("D", "E"), ("E", "V")],
    );

    let outcome = orchestrator(&backend, ExecutionMode::Sequential)
        .run(&mut p)
        .await
        .unwrap();

    let v = outcome.report.first_failure().unwrap();
    assert_eq!(v.node_id, "V");
    let error = v.error.as_deref().unwrap();
    assert!(error.contains("'MISSING'"), "got: {error}");
    assert!(error.ends_with("(available: OUTPUT_PATH)"), "got: {error}");
    assert!(backend.versioning_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn three_cycle_runs_nothing() {
    let backend = Arc::new(Backend::default());
    let mut p = graph(
        vec![
            dataset("A", "/a"),
            dataset("B", "/b"),
            dataset("C", "/c"),
        ],
        &[("A", "B"), ("B", "C"), ("C", "A")],
    );

    let outcome = orchestrator(&backend, ExecutionMode::Sequential)
        .run(&mut p)
        .await
        .unwrap();

    assert!(outcome.report.is_empty());
    assert_eq!(outcome.omitted, vec!["A", "B", "C"]);
    assert!(p.nodes.iter().all(|n| n.status == NodeStatus::Idle));
    assert_eq!(backend.total_calls(), 0);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn report_is_prefix_of_order_with_failure_last() {
    // d1 -> e1 -> v1 ; d2 (broken) ; d3 -> e3
    let nodes = || {
        vec![
            dataset("d1", "/ok/1"),
            execute("e1"),
            versioning("v1", "{{sourceNode.outputPath}}"),
            dataset("d2", "/broken"),
            dataset("d3", "/ok/3"),
            execute("e3"),
        ]
    };
    let edges = [("d1", "e1"), ("e1", "v1"), ("d3", "e3")];

    let backend = Arc::new(Backend::default().with_broken_dataset("/broken", "boom"));
    let mut p = graph(nodes(), &edges);
    let order = resolve_order(&p.nodes, &p.edges).order;

    let outcome = orchestrator(&backend, ExecutionMode::Sequential)
        .run(&mut p)
        .await
        .unwrap();

    let ran = outcome.report.node_ids();
    assert_eq!(ran.as_slice(), &order[..ran.len()]);
    let last = outcome.report.results().last().unwrap();
    assert!(!last.success);
    assert_eq!(last.node_id, "d2");
    assert_eq!(
        outcome.report.results().iter().filter(|r| !r.success).count(),
        1
    );

    for result in outcome.report.results() {
        assert_eq!(outcome.outputs.contains(&result.node_id), result.success);
    }
    for id in &order[ran.len()..] {
        assert!(!outcome.outputs.contains(id));
        assert_eq!(p.node(id).unwrap().status, NodeStatus::Idle);
    }
}

#[tokio::test]
async fn primary_path_aliases_resolve() {
    let backend = Arc::new(Backend::default());
    let mut p = graph(
        vec![
            dataset("D", "/y"),
            versioning("V1", "{{sourceNode.outputPath}}"),
            versioning("V2", "{{ sourceNode.PATH }}"),
        ],
        &[("D", "V1"), ("D", "V2")],
    );

    let outcome = orchestrator(&backend, ExecutionMode::Sequential)
        .run(&mut p)
        .await
        .unwrap();

    assert!(outcome.succeeded(), "{:?}", outcome.report);
    let calls = backend.versioning_calls.lock().unwrap();
    assert!(calls.iter().all(|c| c.config.input_path.as_deref() == Some("/y")));
}

#[tokio::test]
async fn parallel_mode_matches_sequential_results() {
    let build = || {
        graph(
            vec![
                dataset("D1", "/a"),
                dataset("D2", "/b"),
                execute("E1"),
                execute("E2"),
            ],
            &[("D1", "E1"), ("D2", "E2")],
        )
    };

    let backend = Arc::new(
        Backend::default()
            .with_script_output("E1", "OUTPUT_PATH", "/out/1")
            .with_script_output("E2", "OUTPUT_PATH", "/out/2"),
    );

    let mut seq = build();
    let sequential = orchestrator(&backend, ExecutionMode::Sequential)
        .run(&mut seq)
        .await
        .unwrap();
    let mut par = build();
    let parallel = orchestrator(&backend, ExecutionMode::Parallel { max_concurrency: 3 })
        .run(&mut par)
        .await
        .unwrap();

    assert!(sequential.succeeded() && parallel.succeeded());
    let mut seq_ids = sequential.report.node_ids();
    let mut par_ids = parallel.report.node_ids();
    seq_ids.sort_unstable();
    par_ids.sort_unstable();
    assert_eq!(seq_ids, par_ids);
    assert_eq!(
        parallel.outputs.get("E2").unwrap().named_outputs["OUTPUT_PATH"],
        "/out/2"
    );
}

#[tokio::test]
async fn dangling_edge_does_not_shadow_real_source() {
    for mode in [ExecutionMode::Sequential, ExecutionMode::Parallel { max_concurrency: 2 }] {
        let backend = Arc::new(Backend::default());
        let mut p = graph(
            vec![
                dataset("A", "/data/a.csv"),
                Node::new("B", NodeKind::Report, json!({})),
                versioning("C", "{{sourceNode.outputPath}}"),
            ],
            &[("ghost", "C"), ("A", "B"), ("B", "C")],
        );

        let outcome = orchestrator(&backend, mode).run(&mut p).await.unwrap();

        assert!(outcome.succeeded(), "{:?}", outcome.report.first_failure());
        assert_eq!(outcome.report.node_ids(), vec!["A", "B", "C"]);
        let version = backend.versioning_calls.lock().unwrap()[0].clone();
        assert_eq!(version.config.input_path.as_deref(), Some("/data/a.csv"));
    }
}

#[tokio::test]
async fn unlisted_node_kind_does_not_block_the_pipeline() {
    let backend = Arc::new(Backend::default());
    let mut p: Pipeline = serde_json::from_value(json!({
        "name": "with-deploy",
        "nodes": [
            { "id": "A", "type": "dataset", "config": { "path": "/data/a.csv" } },
            { "id": "X", "type": "deploy", "config": { "target": "prod" } },
            {
                "id": "V",
                "type": "versioning",
                "config": { "tool": "dvc", "action": "add_version", "inputPath": "{{sourceNode.path}}" },
            },
        ],
        "edges": [
            { "source": "A", "target": "X" },
            { "source": "X", "target": "V" },
        ],
    }))
    .unwrap();

    let outcome = orchestrator(&backend, ExecutionMode::Sequential)
        .run(&mut p)
        .await
        .unwrap();

    assert!(outcome.succeeded());
    let x = &outcome.report.results()[1];
    assert_eq!(x.node_type, NodeKind::Other("deploy".into()));
    assert_eq!(x.message, "Deploy execution not implemented yet");
    assert_eq!(p.node("X").unwrap().status, NodeStatus::Completed);
    let version = backend.versioning_calls.lock().unwrap()[0].clone();
    assert_eq!(version.config.input_path.as_deref(), Some("/data/a.csv"));
}
