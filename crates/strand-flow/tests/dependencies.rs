use std::sync::Arc;

use serde_json::json;
use strand_core::config::EngineConfig;
use strand_core::error::StrandError;
use strand_core::registry::{ModelRegistry, ToolRegistry};
use strand_flow::{DependencySource, Flow, FlowBuilder, FlowRegistry, FlowState, Registries};
use strand_test_utils::{EchoTool, MockModel};
use tokio_util::sync::CancellationToken;

fn flow(name: &str, deps: &[&str]) -> Flow {
    deps.iter()
        .fold(FlowBuilder::new(name), |b, dep| b.depends_on(*dep))
        .step("s1")
        .tool(Arc::new(EchoTool), "in")
        .done()
        .build()
        .unwrap()
}

struct Fixture {
    flows: Arc<FlowRegistry>,
    models: Arc<ModelRegistry>,
    tools: Arc<ToolRegistry>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            flows: Arc::new(FlowRegistry::new("flow")),
            models: Arc::new(ModelRegistry::default()),
            tools: Arc::new(ToolRegistry::default()),
        }
    }

    fn registries(&self) -> Registries {
        Registries::new(self.flows.clone(), self.models.clone(), self.tools.clone())
    }
}

#[tokio::test]
async fn missing_dependency_fails_the_run() {
    let fixture = Fixture::new();
    let flow = flow("needs-x", &["x"]);
    flow.initialize(EngineConfig::default(), fixture.registries())
        .unwrap();

    let err = flow
        .execute(&CancellationToken::new(), json!({"in": "hi"}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StrandError::DependencyMissing { ref flow, ref dependency } if flow == "needs-x" && dependency == "x"
    ));
    assert_eq!(flow.state(), FlowState::Failed);
}

#[tokio::test]
async fn registering_the_dependency_fixes_the_run() {
    let fixture = Fixture::new();
    let flow = flow("needs-x", &["x"]);
    flow.initialize(EngineConfig::default(), fixture.registries())
        .unwrap();
    assert!(flow.execute(&CancellationToken::new(), json!({"in": "hi"})).await.is_err());

    fixture.models.register_model(MockModel::new("x")).unwrap();
    let ctx = flow
        .execute(&CancellationToken::new(), json!({"in": "hi"}))
        .await
        .unwrap();
    assert_eq!(ctx.get_string("s1").unwrap(), "echo: hi");
}

#[test]
fn validate_reports_sources() {
    let fixture = Fixture::new();
    fixture
        .flows
        .register("prep", Arc::new(flow("prep", &[])))
        .unwrap();
    fixture.tools.register_tool(EchoTool).unwrap();

    let flow = flow("main", &["prep", "echo"]);
    flow.initialize(EngineConfig::default(), fixture.registries())
        .unwrap();
    let resolved = flow.validate().unwrap();
    let sources: Vec<_> = resolved.iter().map(|r| r.source).collect();
    assert_eq!(sources, vec![DependencySource::Flow, DependencySource::Tool]);
}

#[test]
fn strict_mode_rejects_ambiguous_names() {
    let fixture = Fixture::new();
    fixture.models.register_model(MockModel::new("echo")).unwrap();
    fixture.tools.register_tool(EchoTool).unwrap();

    let flow = flow("main", &["echo"]);
    let config = EngineConfig {
        strict_dependencies: true,
        ..EngineConfig::default()
    };
    flow.initialize(config, fixture.registries()).unwrap();
    let err = flow.validate().unwrap_err();
    assert!(matches!(err, StrandError::DependencyAmbiguous { .. }));
}

#[test]
fn cyclic_flows_are_rejected() {
    let fixture = Fixture::new();
    fixture
        .flows
        .register("a", Arc::new(flow("a", &["b"])))
        .unwrap();
    fixture
        .flows
        .register("b", Arc::new(flow("b", &["c"])))
        .unwrap();
    fixture
        .flows
        .register("c", Arc::new(flow("c", &["a"])))
        .unwrap();

    let top = flow("a", &["b"]);
    top.initialize(EngineConfig::default(), fixture.registries())
        .unwrap();
    match top.validate().unwrap_err() {
        StrandError::DependencyCycle { path } => assert_eq!(path, vec!["a", "b", "c", "a"]),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn validate_requires_initialization() {
    let err = flow("f", &[]).validate().unwrap_err();
    assert!(matches!(err, StrandError::NotInitialized(_)));
}
