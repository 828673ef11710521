//! Kick-and-verify: inject one event and confirm it crossed the flow.

pub mod kick;
pub mod probe;

use std::sync::Arc;

use async_trait::async_trait;
use flowmesh_types::contract::{any_line, StepLogLine};
use flowmesh_types::event_type::PipelineEventType;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cluster::{ClusterClient, LogQuery};
use crate::config::types::PollConfig;
use crate::poll::{poll_until, Deadline, PollOutcome};
use crate::resources::names::LABEL_APP;
use crate::resources::service::SERVICE_CONTAINER;

pub use kick::KickVerifier;

/// Evidence that an event moved between steps.
///
/// Implementations poll until the evidence shows up or the deadline passes.
#[async_trait]
pub trait EventPropagationVerifier: Send + Sync {
    /// Whether `service` emitted an event of type `expected`.
    async fn upstream_emitted(
        &self,
        namespace: &str,
        service: &str,
        expected: &PipelineEventType,
        deadline: Deadline,
    ) -> PollOutcome<()>;

    /// Whether `service` received an event of type `expected`.
    async fn downstream_received(
        &self,
        namespace: &str,
        service: &str,
        expected: &PipelineEventType,
        deadline: Deadline,
    ) -> PollOutcome<()>;
}

/// Reads the step containers' logs and matches runtime log lines.
pub struct LogScrapeVerifier {
    cluster: Arc<dyn ClusterClient>,
    poll: PollConfig,
    cancel: CancellationToken,
}

impl LogScrapeVerifier {
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterClient>, poll: PollConfig, cancel: CancellationToken) -> Self {
        Self { cluster, poll, cancel }
    }

    /// Whether any pod of `service` logged a line satisfying `pred`.
    async fn scan(&self, namespace: &str, service: &str, pred: &(dyn Fn(&StepLogLine) -> bool + Sync)) -> bool {
        let pods = match self.cluster.list_pods(namespace, &format!("{LABEL_APP}={service}")).await {
            Ok(pods) => pods,
            Err(e) => {
                debug!(service, error = %e, "Listing service pods failed");
                return false;
            }
        };
        let query = LogQuery::container(SERVICE_CONTAINER, self.poll.log_tail_lines);
        for pod in pods {
            match self.cluster.pod_logs(namespace, &pod, &query).await {
                Ok(logs) if any_line(&logs, pred) => return true,
                Ok(_) => {}
                Err(e) => debug!(service, pod = %pod, error = %e, "Reading service logs failed"),
            }
        }
        false
    }
}

#[async_trait]
impl EventPropagationVerifier for LogScrapeVerifier {
    async fn upstream_emitted(
        &self,
        namespace: &str,
        service: &str,
        expected: &PipelineEventType,
        deadline: Deadline,
    ) -> PollOutcome<()> {
        let pred = |line: &StepLogLine| line.shows_emission(expected);
        poll_until(deadline, self.poll.upstream_logs(), &self.cancel, || async {
            self.scan(namespace, service, &pred).await.then_some(())
        })
        .await
    }

    async fn downstream_received(
        &self,
        namespace: &str,
        service: &str,
        expected: &PipelineEventType,
        deadline: Deadline,
    ) -> PollOutcome<()> {
        let pred = |line: &StepLogLine| line.shows_receipt(expected);
        poll_until(deadline, self.poll.downstream_logs(), &self.cancel, || async {
            self.scan(namespace, service, &pred).await.then_some(())
        })
        .await
    }
}
