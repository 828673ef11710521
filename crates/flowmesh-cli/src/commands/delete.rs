use std::path::Path;

use anyhow::Result;
use flowmesh_engine::DeleteRequest;

use super::FlowTarget;

/// Execute the `delete` command: tear the flow down and print the summary.
pub async fn execute(config_path: Option<&Path>, target: &FlowTarget) -> Result<()> {
    let config = super::config(config_path)?;
    let orchestrator = super::orchestrator(config).await?;

    let report = orchestrator
        .delete_flow(&DeleteRequest {
            user: target.user.clone(),
            flow_id: target.flow_id.clone(),
        })
        .await?;
    println!("{}", report.summary());
    Ok(())
}
