//! End-to-end flow lifecycle against the in-memory cluster.
//!
//! Covers deploy, kick-only redeploys, pruning of removed steps, teardown,
//! and single-step unit tests through the public orchestrator API.

use std::sync::Arc;

use flowmesh_engine::cluster::memory::{InMemoryCluster, JobScript};
use flowmesh_engine::config::types::PollConfig;
use flowmesh_engine::{DeleteRequest, DeployRequest, FlowmeshConfig, Orchestrator, ProgressReporter, ResourceKind, UnitTestRequest};
use flowmesh_store::SqliteObjectStore;
use flowmesh_types::ids::ObjectId;
use flowmesh_types::progress::{Operation, StreamEvent, StreamEventKind};
use flowmesh_types::step::StepObject;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

const NS: &str = "user-alice";

fn config() -> FlowmeshConfig {
    let mut config = FlowmeshConfig::default();
    config.poll = PollConfig::uniform(5);
    config.timeouts.preflight_seconds = 2;
    config.timeouts.verify_seconds = 2;
    config
}

fn store() -> Arc<SqliteObjectStore> {
    let store = SqliteObjectStore::in_memory().expect("in-memory store");
    store.insert_flow(42, "orders").unwrap();
    for (id, label, code) in [
        (1_i64, "Ingest", "def handle(evt):\n    return {'n': 1}"),
        (2, "Transform", "def handle(evt):\n    return {'n': evt['n'] + 1}"),
        (3, "Sink", "def handle(evt):\n    print(evt)"),
        (4, "Empty", "def handle(evt):\n    return None"),
    ] {
        let params = serde_json::json!({ "code": code }).to_string();
        store
            .insert_object(&StepObject::new(id, label).with_params(params), Some(42))
            .unwrap();
    }
    Arc::new(store)
}

/// Cluster whose jobs succeed and whose step pods log the expected traffic.
fn healthy_cluster() -> Arc<InMemoryCluster> {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.script_job("preflight-", JobScript::succeed("OK\n"));
    cluster.script_job("kick-flow-", JobScript::succeed("[KICK] sent\n"));
    cluster.add_pod(NS, "transform-1", &[("app", "flow42-transform")], "in=flow42.s1 out=flow42.s2 items=1\n");
    cluster.add_pod(NS, "sink-1", &[("app", "flow42-sink")], "in=flow42.s2 out=- items=1\n");
    cluster
}

fn deploy(steps: &[i64], op: Option<&str>) -> DeployRequest {
    DeployRequest {
        user: "alice".into(),
        flow_id: "42".into(),
        steps: steps.iter().copied().map(ObjectId).collect(),
        op: op.map(str::to_string),
        create_namespace_if_missing: true,
        verify_timeout_seconds: None,
    }
}

fn drain(rx: &mut UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn phases(events: &[StreamEvent]) -> Vec<&str> {
    events.iter().map(|e| e.payload.phase.as_str()).collect()
}

async fn run(orch: &Orchestrator, request: &DeployRequest) -> Vec<StreamEvent> {
    let plan = orch.plan(request).await.expect("plan");
    let (reporter, mut rx) = ProgressReporter::channel(plan.options.op, "op-test");
    orch.execute(&plan, &reporter, &CancellationToken::new()).await;
    drain(&mut rx)
}

#[tokio::test]
async fn test_deploy_three_steps_end_to_end() {
    let cluster = healthy_cluster();
    let store = store();
    let orch = Orchestrator::new(cluster.clone(), store.clone(), Arc::new(config()));

    let events = run(&orch, &deploy(&[1, 2, 3], None)).await;
    assert_eq!(
        phases(&events),
        vec!["hello", "apply.start", "apply.ok", "verify.ok", "done"]
    );
    assert_eq!(events[2].payload.message, "flow 42 applied (3 steps)");
    assert_eq!(events[3].payload.message, "OK: deployed & verified");
    assert!(events.last().unwrap().kind.is_terminal());

    assert!(cluster.has_namespace(NS));
    assert_eq!(cluster.objects(ResourceKind::KnativeService, NS).len(), 3);
    assert_eq!(cluster.objects(ResourceKind::KafkaSource, NS).len(), 3);
    assert_eq!(cluster.objects(ResourceKind::ConfigMap, NS).len(), 3);
    assert!(cluster.object(ResourceKind::KafkaSink, NS, "sink-42").is_some());
    assert!(cluster.object(ResourceKind::KafkaTopic, "kafka", "42").is_some());
    assert!(store.latest_run(42).unwrap().is_some());
}

#[tokio::test]
async fn test_unchanged_redeploy_only_kicks() {
    let cluster = healthy_cluster();
    let orch = Orchestrator::new(cluster.clone(), store(), Arc::new(config()));
    run(&orch, &deploy(&[1, 2, 3], None)).await;

    let creates_before = cluster
        .calls()
        .iter()
        .filter(|c| c.starts_with("create KnativeService"))
        .count();
    let events = run(&orch, &deploy(&[1, 2, 3], None)).await;
    assert_eq!(phases(&events), vec!["hello", "apply.skip", "verify.ok", "done"]);
    assert_eq!(events[1].payload.message, "no changes; kick only");
    assert_eq!(events[2].payload.message, "OK: run");

    let creates_after = cluster
        .calls()
        .iter()
        .filter(|c| c.starts_with("create KnativeService"))
        .count();
    assert_eq!(creates_before, creates_after);
}

#[tokio::test]
async fn test_kick_op_skips_apply() {
    let cluster = healthy_cluster();
    let orch = Orchestrator::new(cluster.clone(), store(), Arc::new(config()));
    run(&orch, &deploy(&[1, 2, 3], None)).await;

    let events = run(&orch, &deploy(&[1, 2, 3], Some("kick"))).await;
    assert_eq!(phases(&events), vec!["hello", "verify.start", "verify.ok", "done"]);
    assert_eq!(events[1].payload.data["op"], "kick");
    assert_eq!(events[1].payload.data["timeoutSeconds"], 2);
}

#[tokio::test]
async fn test_removed_step_is_pruned() {
    let cluster = healthy_cluster();
    let orch = Orchestrator::new(cluster.clone(), store(), Arc::new(config()));
    run(&orch, &deploy(&[1, 2, 3], None)).await;

    let plan = orch.plan(&deploy(&[1, 3], None)).await.unwrap();
    assert!(orch.flow_changed(&plan).await);
    orch.apply(&plan, &CancellationToken::new()).await.unwrap();

    let services: Vec<String> = cluster
        .objects(ResourceKind::KnativeService, NS)
        .iter()
        .map(kube::ResourceExt::name_any)
        .collect();
    assert_eq!(services, vec!["flow42-ingest", "flow42-sink"]);
    assert_eq!(cluster.objects(ResourceKind::KafkaSource, NS).len(), 2);
}

#[tokio::test]
async fn test_preflight_empty_output_blocks_deploy() {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.script_job(
        "preflight-",
        JobScript::fail("STEP empty EMPTY_OUTPUT: downstream step would receive nothing\n"),
    );
    let orch = Orchestrator::new(cluster.clone(), store(), Arc::new(config()));

    let events = run(&orch, &deploy(&[4, 3], None)).await;
    assert_eq!(phases(&events), vec!["hello", "apply.start", "verify.ng", "done"]);
    let verdict = &events[2];
    assert_eq!(verdict.kind, StreamEventKind::Error);
    assert_eq!(verdict.payload.data["stage"], "apply");
    assert!(verdict.payload.message.contains("EMPTY_OUTPUT"));
    assert!(cluster.objects(ResourceKind::KnativeService, NS).is_empty());
}

#[tokio::test]
async fn test_teardown_after_deploy_and_of_empty_state() {
    let cluster = healthy_cluster();
    let orch = Orchestrator::new(cluster.clone(), store(), Arc::new(config()));
    run(&orch, &deploy(&[1, 2, 3], None)).await;

    let request = DeleteRequest {
        user: "alice".into(),
        flow_id: "42".into(),
    };
    let report = orch.delete_flow(&request).await.unwrap();
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(report.deleted["KnativeService"], 3);
    assert_eq!(report.deleted["KafkaSource"], 3);
    assert!(report.topic_deleted);
    assert!(cluster.objects(ResourceKind::ConfigMap, NS).is_empty());

    let again = orch.delete_flow(&request).await.unwrap();
    assert_eq!(again.total_deleted(), 0);
    assert!(!again.topic_deleted);
    assert_eq!(again.summary(), "deleted namespaced resources flow_id=42");
}

#[tokio::test]
async fn test_unit_test_reports_syntax_error() {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.script_job(
        "ut1-",
        JobScript::fail(
            "RESULT_JSON:{\"ok\": false, \"step\": \"transform\", \"error\": \"SYNTAX_ERROR: expected ':' at line 1 col 16\"}\n",
        ),
    );
    let orch = Orchestrator::new(cluster.clone(), store(), Arc::new(config()));
    let request = UnitTestRequest {
        user: "alice".into(),
        flow_id: "42".into(),
        test: Some(ObjectId(2)),
        test_input: None,
    };

    let report = orch
        .unit_test(&request, Some(3), &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.finished);
    assert!(!report.ok);
    assert!(report.error.as_deref().unwrap().starts_with("SYNTAX_ERROR"));
    assert!(report.job.starts_with("ut1-42-"));
    assert!(cluster.has_namespace(NS));
}

#[tokio::test]
async fn test_unit_test_unknown_object() {
    let orch = Orchestrator::new(Arc::new(InMemoryCluster::new()), store(), Arc::new(config()));
    let request = UnitTestRequest {
        user: "alice".into(),
        flow_id: "42".into(),
        test: Some(ObjectId(99)),
        test_input: Some("{}".into()),
    };
    let err = orch
        .unit_test(&request, None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_client_error());
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn test_spawned_operation_streams_to_completion() {
    let cluster = healthy_cluster();
    let orch = Orchestrator::new(cluster, store(), Arc::new(config()));
    let plan = orch.plan(&deploy(&[1, 2, 3], None)).await.unwrap();
    let (reporter, mut rx) = ProgressReporter::channel(Operation::Deploy, "op-spawn");

    orch.spawn_execute(plan, reporter, CancellationToken::new())
        .await
        .unwrap();
    let events = drain(&mut rx);
    assert_eq!(events.first().unwrap().kind, StreamEventKind::Hello);
    assert_eq!(events.last().unwrap().kind, StreamEventKind::Done);
    assert!(events.iter().all(|e| e.payload.data.get("opId").is_some()));
}
