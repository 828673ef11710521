//! Waiting for Knative and Kafka resources to report Ready.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cluster::{is_ready, ClusterClient, ResourceKind};
use crate::errors::FlowError;
use crate::poll::{poll_until, Deadline, PollOutcome};

/// Polls one resource's Ready condition.
pub struct ReadinessWaiter<'a> {
    cluster: &'a dyn ClusterClient,
    cancel: &'a CancellationToken,
}

impl<'a> ReadinessWaiter<'a> {
    #[must_use]
    pub fn new(cluster: &'a dyn ClusterClient, cancel: &'a CancellationToken) -> Self {
        Self { cluster, cancel }
    }

    /// Wait until `name` is Ready. Read errors and missing objects count
    /// as not ready yet.
    ///
    /// # Errors
    ///
    /// [`FlowError::ReadinessTimeout`] when the deadline passes first,
    /// [`FlowError::Cancelled`] when the operation is cancelled.
    pub async fn wait_ready(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        deadline: Deadline,
        interval: Duration,
    ) -> Result<(), FlowError> {
        let outcome = poll_until(deadline, interval, self.cancel, || async {
            match self.cluster.get(kind, namespace, name).await {
                Ok(Some(obj)) if is_ready(&obj) => Some(()),
                Ok(_) => None,
                Err(e) => {
                    debug!(%kind, name, error = %e, "Readiness read failed, retrying");
                    None
                }
            }
        })
        .await;
        match outcome {
            PollOutcome::Ready(()) => {
                debug!(%kind, namespace, name, "Resource ready");
                Ok(())
            }
            PollOutcome::TimedOut => Err(FlowError::ReadinessTimeout {
                kind,
                name: name.to_string(),
            }),
            PollOutcome::Cancelled => Err(FlowError::Cancelled),
        }
    }
}
