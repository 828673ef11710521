use std::path::Path;

use anyhow::{Context, Result};
use flowmesh_engine::UnitTestRequest;
use flowmesh_types::ids::ObjectId;
use tokio_util::sync::CancellationToken;

use super::FlowTarget;

/// Execute the `test` command: run one step object and print the report.
pub async fn execute(
    config_path: Option<&Path>,
    target: &FlowTarget,
    object: i64,
    input: Option<&str>,
    timeout: Option<u64>,
) -> Result<()> {
    let test_input = super::sample_input(input)?;
    let config = super::config(config_path)?;
    let orchestrator = super::orchestrator(config).await?;

    let request = UnitTestRequest {
        user: target.user.clone(),
        flow_id: target.flow_id.clone(),
        test: Some(ObjectId(object)),
        test_input,
    };
    let cancel = CancellationToken::new();
    let report = tokio::select! {
        report = orchestrator.unit_test(&request, timeout, &cancel) => report?,
        _ = tokio::signal::ctrl_c() => anyhow::bail!("Interrupted"),
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to render unit test report")?
    );
    if !report.ok {
        anyhow::bail!("Unit test of object {object} failed");
    }
    Ok(())
}
