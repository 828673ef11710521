use std::path::Path;

use anyhow::{Context, Result};
use flowmesh_engine::{DeployRequest, ProgressReporter};
use flowmesh_types::progress::StreamEvent;
use tokio_util::sync::CancellationToken;

/// Execute the `deploy` and `kick` commands: plan, run, and print progress.
pub async fn execute(config_path: Option<&Path>, request: DeployRequest) -> Result<()> {
    let config = super::config(config_path)?;
    let orchestrator = super::orchestrator(config).await?;

    // 1. Validate and resolve steps before touching the cluster
    let plan = orchestrator
        .plan(&request)
        .await
        .with_context(|| format!("Flow '{}' rejected", request.flow_id))?;
    tracing::info!(
        flow_id = %plan.flow,
        namespace = %plan.namespace,
        op = plan.options.op.as_str(),
        steps = plan.steps.len(),
        "Flow planned"
    );

    // 2. Run with Ctrl-C mapped to cancellation
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });
    let (reporter, mut rx) = ProgressReporter::channel(plan.options.op, uuid::Uuid::new_v4().to_string());
    let task = orchestrator.spawn_execute(plan, reporter, cancel);

    // 3. Print every event until the stream closes
    let mut failed = false;
    while let Some(event) = rx.recv().await {
        failed |= !event.payload.ok;
        print_event(&event);
    }
    task.await.context("Flow operation task failed")?;

    if failed {
        anyhow::bail!("Flow '{}' did not verify", request.flow_id)
    }
    Ok(())
}

fn print_event(event: &StreamEvent) {
    let elapsed = event
        .payload
        .data
        .get("elapsedMs")
        .and_then(serde_json::Value::as_u64)
        .map_or_else(String::new, |ms| format!("{:>7.1}s ", ms as f64 / 1000.0));
    println!("{elapsed}{:<13} {}", event.payload.phase, event.payload.message);
}
