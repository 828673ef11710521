pub mod check_config;
pub mod delete;
pub mod deploy;
pub mod serve;
pub mod test;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use flowmesh_engine::config::load_config;
use flowmesh_engine::resolve::{connect_cluster, create_object_store};
use flowmesh_engine::{DeployRequest, FlowmeshConfig, Orchestrator};
use flowmesh_types::ids::ObjectId;

/// The user and flow a command acts on.
#[derive(Debug, Clone, Args)]
pub struct FlowTarget {
    /// Owning user; resources live in `user-<user>`
    #[arg(long)]
    pub user: String,
    /// Flow identifier
    #[arg(long)]
    pub flow_id: String,
}

impl FlowTarget {
    pub fn deploy_request(
        &self,
        op: &str,
        steps: Vec<i64>,
        create_namespace_if_missing: bool,
        verify_timeout_seconds: Option<u64>,
    ) -> DeployRequest {
        DeployRequest {
            user: self.user.clone(),
            flow_id: self.flow_id.clone(),
            steps: steps.into_iter().map(ObjectId).collect(),
            op: Some(op.to_string()),
            create_namespace_if_missing,
            verify_timeout_seconds,
        }
    }
}

/// Load and validate configuration.
pub fn config(path: Option<&Path>) -> Result<FlowmeshConfig> {
    load_config(path).with_context(|| match path {
        Some(p) => format!("Failed to load config: {}", p.display()),
        None => "Failed to load config from environment".to_string(),
    })
}

/// Connect the object store and the cluster described by `config`.
pub async fn orchestrator(config: FlowmeshConfig) -> Result<Orchestrator> {
    let store = create_object_store(&config.store)?;
    let cluster = connect_cluster(&config.cluster).await?;
    Ok(Orchestrator::new(cluster, store, Arc::new(config)))
}

/// Sample event text: inline JSON, or `@path` read from a file.
pub fn sample_input(raw: Option<&str>) -> Result<Option<String>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read sample event: {path}"))?,
        None => raw.to_string(),
    };
    serde_json::from_str::<serde_json::Value>(&text).context("Sample event is not valid JSON")?;
    Ok(Some(text))
}
