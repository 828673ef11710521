//! Raw topic dump attached to failed receipt checks.

use std::time::Duration;

use flowmesh_types::ids::FlowId;
use tracing::warn;

use crate::config::FlowmeshConfig;
use crate::launch::{truncate_logs, JobLauncher};
use crate::poll::Deadline;
use crate::resources::{BatchJob, FlowNames};

/// Fewest messages a probe reads.
pub const MIN_PROBE_MESSAGES: u32 = 5;

/// Dump the most recent messages of the flow topic.
///
/// Never fails: launch problems come back as the diagnostic text.
pub async fn probe_topic(
    launcher: &JobLauncher<'_>,
    config: &FlowmeshConfig,
    flow: &FlowId,
    namespace: &str,
    timeout: Duration,
) -> String {
    let names = FlowNames::new(flow);
    let count = config.timeouts.probe_messages.max(MIN_PROBE_MESSAGES);
    let job = BatchJob::probe(
        names.probe_job(),
        namespace,
        &config.images.kcat,
        &config.kafka.bootstrap_servers(),
        &names.topic(),
        count,
    )
    .pull_policy(&config.images.pull_policy)
    .ttl_seconds(config.timeouts.job_ttl_seconds);

    if let Err(e) = launcher.launch(&job).await {
        warn!(flow_id = %flow, error = %e, "Topic probe launch failed");
        return format!("probe error: {e}");
    }
    launcher
        .wait_finished(namespace, &job.name, Deadline::after(timeout))
        .await;
    truncate_logs(&launcher.logs(namespace, &job.name).await)
}
