use std::time::Duration;

use flowmesh_types::contract::CloudEventEnvelope;
use flowmesh_types::event_type::PipelineEventType;
use flowmesh_types::ids::FlowId;
use flowmesh_types::outcome::{VerifyFailure, VerifyOutcome, VerifyStage};
use flowmesh_types::step::StepSpec;
use tracing::{info, warn};
use uuid::Uuid;

use super::probe::probe_topic;
use super::EventPropagationVerifier;
use crate::config::FlowmeshConfig;
use crate::launch::{JobExit, JobLauncher};
use crate::poll::{Deadline, PollOutcome};
use crate::resources::{BatchJob, FlowNames};

/// Injects one kick event and follows it to the last step.
pub struct KickVerifier<'a> {
    launcher: &'a JobLauncher<'a>,
    evidence: &'a dyn EventPropagationVerifier,
    config: &'a FlowmeshConfig,
}

impl<'a> KickVerifier<'a> {
    #[must_use]
    pub fn new(
        launcher: &'a JobLauncher<'a>,
        evidence: &'a dyn EventPropagationVerifier,
        config: &'a FlowmeshConfig,
    ) -> Self {
        Self {
            launcher,
            evidence,
            config,
        }
    }

    /// Envelope of the synthetic entry event.
    #[must_use]
    pub fn kick_envelope(flow: &FlowId) -> CloudEventEnvelope {
        CloudEventEnvelope::injected(
            &PipelineEventType::kick(flow),
            format!("/flow/{flow}/kick"),
            Uuid::new_v4().to_string(),
            Uuid::new_v4().to_string(),
        )
    }

    /// Kick the flow once and check the event reached the last step.
    ///
    /// Every stage shares one deadline of `timeout` from now.
    pub async fn run(&self, flow: &FlowId, namespace: &str, steps: &[StepSpec], timeout: Duration) -> VerifyOutcome {
        let Some(last) = steps.last() else {
            return VerifyOutcome::failed(VerifyStage::Steps, "no steps");
        };
        let names = FlowNames::new(flow);
        let deadline = Deadline::after(timeout);

        let envelope = Self::kick_envelope(flow);
        let job = BatchJob::kick(
            names.kick_job(),
            namespace,
            &self.config.images.kcat,
            &self.config.kafka.bootstrap_servers(),
            &names.topic(),
            &envelope,
        )
        .pull_policy(&self.config.images.pull_policy)
        .ttl_seconds(self.config.timeouts.job_ttl_seconds);

        if let Err(e) = self.launcher.launch(&job).await {
            return VerifyOutcome::failed(VerifyStage::Inject, format!("failed to create Kick Job -> {e}"));
        }
        info!(flow_id = %flow, job = %job.name, ce_id = %envelope.id, traceid = %envelope.traceid, "Kick injected");

        match self.launcher.wait_succeeded_pinned(namespace, &job.name, deadline).await {
            JobExit::Succeeded => {}
            JobExit::Cancelled => return cancelled(),
            JobExit::Failed | JobExit::TimedOut => {
                return VerifyOutcome::failed(VerifyStage::Inject, format!("Kick Job not succeeded -> {}", job.name));
            }
        }

        let total = steps.len();
        if total > 1 {
            let previous = names.service(&steps[total - 2].name);
            let expected = PipelineEventType::input_of(flow, total - 1);
            match self
                .evidence
                .upstream_emitted(namespace, &previous, &expected, deadline)
                .await
            {
                PollOutcome::Ready(()) => {}
                PollOutcome::Cancelled => return cancelled(),
                PollOutcome::TimedOut => {
                    return VerifyOutcome::failed(
                        VerifyStage::UpstreamEmission,
                        format!("previous step did not emit expected out={expected} -> {previous}"),
                    );
                }
            }
        }

        let last_service = names.service(&last.name);
        let expected = PipelineEventType::input_of(flow, total - 1);
        match self
            .evidence
            .downstream_received(namespace, &last_service, &expected, deadline)
            .await
        {
            PollOutcome::Ready(()) => {}
            PollOutcome::Cancelled => return cancelled(),
            PollOutcome::TimedOut => {
                warn!(flow_id = %flow, service = %last_service, "Last step never saw the event; probing topic");
                let dump = probe_topic(self.launcher, self.config, flow, namespace, timeout / 3).await;
                return VerifyFailure::new(
                    VerifyStage::DownstreamReceipt,
                    format!("last step did not receive event (no log matched '{expected}') -> {last_service}"),
                )
                .with_diagnostic(format!("== topic probe ==\n{dump}"))
                .into();
            }
        }

        info!(flow_id = %flow, steps = total, "Kick verified");
        VerifyOutcome::passed("run")
    }
}

fn cancelled() -> VerifyOutcome {
    VerifyOutcome::failed(VerifyStage::Cancelled, "operation cancelled")
}
