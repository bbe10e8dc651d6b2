//! In-memory capability fakes shared by the unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use datumflow_types::node_config::DatasetConfig;

use super::capability::{
    Capabilities, CapabilityError, CapabilityResult, DatasetCheck, DatasetProbe,
    ScriptRunRequest, ScriptRunResponse, ScriptRunner, StepResult, VersioningRequest,
    VersioningResponse, VersioningService,
};

/// Canned behavior for one key.
#[derive(Clone)]
pub(crate) enum Scripted<T> {
    Reply(T),
    Delayed(Duration, T),
    Fault(String),
    Panic,
    Hang,
}

/// Records every request and answers from a script, falling back to a
/// default reply derived from the request.
pub(crate) struct Fake<Req, Resp> {
    scripted: Mutex<HashMap<String, Scripted<Resp>>>,
    requests: Mutex<Vec<Req>>,
    default_reply: fn(&Req) -> Resp,
}

impl<Req: Clone + Send, Resp: Clone + Send> Fake<Req, Resp> {
    fn new(default_reply: fn(&Req) -> Resp) -> Self {
        Self {
            scripted: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            default_reply,
        }
    }

    pub(crate) fn script(&self, key: &str, behavior: Scripted<Resp>) {
        self.scripted
            .lock()
            .unwrap()
            .insert(key.to_string(), behavior);
    }

    pub(crate) fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub(crate) fn last_request(&self) -> Option<Req> {
        self.requests.lock().unwrap().last().cloned()
    }

    async fn respond(&self, key: String, request: Req) -> Result<Resp, CapabilityError> {
        let scripted = self.scripted.lock().unwrap().get(&key).cloned();
        let fallback = (self.default_reply)(&request);
        self.requests.lock().unwrap().push(request);

        match scripted {
            None => Ok(fallback),
            Some(Scripted::Reply(reply)) => Ok(reply),
            Some(Scripted::Delayed(delay, reply)) => {
                tokio::time::sleep(delay).await;
                Ok(reply)
            }
            Some(Scripted::Fault(message)) => Err(CapabilityError::Fault(message)),
            Some(Scripted::Panic) => panic!("scripted panic for {key}"),
            Some(Scripted::Hang) => std::future::pending().await,
        }
    }
}

pub(crate) type FakeDatasets = Fake<DatasetConfig, DatasetCheck>;
pub(crate) type FakeScripts = Fake<ScriptRunRequest, ScriptRunResponse>;
pub(crate) type FakeVersioning = Fake<VersioningRequest, VersioningResponse>;

impl DatasetProbe for FakeDatasets {
    fn check<'a>(&'a self, config: &'a DatasetConfig) -> CapabilityResult<'a, DatasetCheck> {
        Box::pin(self.respond(config.path.clone(), config.clone()))
    }
}

impl ScriptRunner for FakeScripts {
    fn run(&self, request: ScriptRunRequest) -> CapabilityResult<'_, ScriptRunResponse> {
        Box::pin(self.respond(request.node_id.clone(), request))
    }
}

impl VersioningService for FakeVersioning {
    fn execute(&self, request: VersioningRequest) -> CapabilityResult<'_, VersioningResponse> {
        Box::pin(self.respond(request.node_id.clone(), request))
    }
}

fn dataset_ok(_: &DatasetConfig) -> DatasetCheck {
    DatasetCheck {
        success: true,
        file_count: Some(3),
        error: None,
    }
}

/// Every step publishes `/out/<node>/<VAR>` for each declared output.
fn scripts_ok(request: &ScriptRunRequest) -> ScriptRunResponse {
    let step_results = request
        .steps
        .iter()
        .map(|resolved| StepResult {
            step_id: resolved.step.id.clone(),
            output_paths: resolved
                .step
                .output_variables
                .iter()
                .map(|var| (var.clone(), format!("/out/{}/{var}", request.node_id)))
                .collect(),
            stdout: Some(format!("ran {}", resolved.step.id)),
            ..Default::default()
        })
        .collect();
    ScriptRunResponse {
        success: true,
        message: format!("Executed {} steps", request.steps.len()),
        output_path: Some(format!("/out/{}", request.node_id)),
        step_results,
    }
}

fn versioning_ok(_: &VersioningRequest) -> VersioningResponse {
    VersioningResponse {
        success: true,
        message: "Versioning action completed".to_string(),
        ..Default::default()
    }
}

/// All three fakes, individually scriptable.
pub(crate) struct FakeCapabilities {
    pub(crate) datasets: Arc<FakeDatasets>,
    pub(crate) scripts: Arc<FakeScripts>,
    pub(crate) versioning: Arc<FakeVersioning>,
}

impl Default for FakeCapabilities {
    fn default() -> Self {
        Self {
            datasets: Arc::new(Fake::new(dataset_ok)),
            scripts: Arc::new(Fake::new(scripts_ok)),
            versioning: Arc::new(Fake::new(versioning_ok)),
        }
    }
}

impl FakeCapabilities {
    pub(crate) fn capabilities(&self) -> Capabilities {
        Capabilities::new(
            self.datasets.clone(),
            self.scripts.clone(),
            self.versioning.clone(),
        )
    }
}
