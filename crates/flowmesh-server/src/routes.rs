//! Axum handlers for the flow API.

use std::convert::Infallible;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use flowmesh_engine::{DeleteRequest, DeployRequest, ProgressReporter, UnitTestRequest};
use flowmesh_types::outcome::UnitTestReport;
use futures_util::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::api_errors::ApiError;
use crate::sse::event_stream;
use crate::state::{AppState, OperationInfo};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/k8s/deploy/stream", post(deploy_stream))
        .route("/api/k8s/delete", delete(delete_flow))
        .route("/api/k8s/test", post(unit_test))
        .route("/api/k8s/operations", get(list_operations))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

fn reject_when_draining(state: &AppState) -> Result<(), ApiError> {
    if state.shutdown.is_cancelled() {
        return Err(ApiError::unavailable("server is shutting down"));
    }
    Ok(())
}

/// Validate and plan synchronously, then stream the run.
async fn deploy_stream(
    State(state): State<AppState>,
    body: Result<Json<DeployRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Json(request) = body?;
    reject_when_draining(&state)?;
    let plan = state.orchestrator.plan(&request).await.map_err(|e| {
        warn!(flow_id = %request.flow_id, kind = e.kind(), error = %e, "Deploy request rejected");
        ApiError::from(e)
    })?;

    let handle = state
        .operations
        .register(plan.options.op.as_str(), plan.user.as_str(), plan.flow.as_str());
    let (reporter, rx) = ProgressReporter::channel(plan.options.op, handle.op_id());
    let guard = handle.cancel_token().drop_guard();
    info!(
        op_id = handle.op_id(),
        op = plan.options.op.as_str(),
        flow_id = %plan.flow,
        namespace = %plan.namespace,
        steps = plan.steps.len(),
        "Flow operation accepted"
    );

    let task = state
        .orchestrator
        .spawn_execute(plan, reporter, handle.cancel_token());
    tokio::spawn(async move {
        if let Err(e) = task.await {
            error!(op_id = handle.op_id(), error = %e, "Flow operation task failed");
        }
        drop(handle);
    });

    Ok(Sse::new(event_stream(rx, guard)).keep_alive(KeepAlive::default()))
}

/// Tear a flow down; answers with one status line.
async fn delete_flow(
    State(state): State<AppState>,
    query: Result<Query<DeleteRequest>, QueryRejection>,
) -> Result<String, ApiError> {
    let Query(request) = query?;
    let report = state.orchestrator.delete_flow(&request).await?;
    Ok(report.summary())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnitTestParams {
    #[serde(default)]
    total_timeout_seconds: Option<u64>,
}

async fn unit_test(
    State(state): State<AppState>,
    params: Result<Query<UnitTestParams>, QueryRejection>,
    body: Result<Json<UnitTestRequest>, JsonRejection>,
) -> Result<Json<UnitTestReport>, ApiError> {
    let Query(params) = params?;
    let Json(request) = body?;
    reject_when_draining(&state)?;

    // Dropped with this future, so a disconnect cancels the sandbox wait.
    let handle = state
        .operations
        .register("test", request.user.trim(), request.flow_id.trim());
    let report = state
        .orchestrator
        .unit_test(&request, params.total_timeout_seconds, &handle.cancel_token())
        .await?;
    Ok(Json(report))
}

async fn list_operations(State(state): State<AppState>) -> Json<Value> {
    let operations: Vec<OperationInfo> = state.operations.list();
    Json(json!({ "operations": operations }))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    reject_when_draining(&state)?;
    Ok(Json(json!({
        "status": "ready",
        "activeOperations": state.operations.len(),
    })))
}
