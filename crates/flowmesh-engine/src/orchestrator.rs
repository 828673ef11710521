//! Flow lifecycle orchestrator.
//!
//! Ties step assembly, preflight, provisioning, readiness, kick-and-verify,
//! teardown, and single-step unit tests to one cluster and one object store.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flowmesh_store::{ObjectStore, StoreError};
use flowmesh_types::ids::{FlowId, UserId};
use flowmesh_types::outcome::{TeardownReport, UnitTestReport, VerifyOutcome, VerifyStage};
use flowmesh_types::progress::{Operation, Phase};
use flowmesh_types::step::StepSpec;
use futures_util::FutureExt;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::assemble::{assemble_steps, fetch_object, StepParams};
use crate::change;
use crate::cluster::{ClusterClient, ResourceKind};
use crate::config::FlowmeshConfig;
use crate::errors::FlowError;
use crate::launch::JobLauncher;
use crate::poll::Deadline;
use crate::preflight::run_preflight;
use crate::progress::ProgressReporter;
use crate::provision::Provisioner;
use crate::prune::prune_stale;
use crate::readiness::ReadinessWaiter;
use crate::resources::FlowNames;
use crate::request::{validate_deploy, validate_identity, DeleteRequest, DeployOptions, DeployRequest, UnitTestRequest};
use crate::teardown::teardown_flow;
use crate::unit_test::{run_unit_test, UnitTestRun};
use crate::verify::{KickVerifier, LogScrapeVerifier};

/// Shortest readiness wait granted to a single step service.
const MIN_SERVICE_WAIT: Duration = Duration::from_secs(5);

/// A validated deploy/kick request with its steps resolved.
#[derive(Debug, Clone)]
pub struct FlowPlan {
    pub user: UserId,
    pub flow: FlowId,
    pub namespace: String,
    pub steps: Vec<StepSpec>,
    pub options: DeployOptions,
}

impl FlowPlan {
    #[must_use]
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.options.verify_timeout_seconds)
    }
}

/// Runs flow operations against one cluster and one object store.
#[derive(Clone)]
pub struct Orchestrator {
    cluster: Arc<dyn ClusterClient>,
    store: Arc<dyn ObjectStore>,
    config: Arc<FlowmeshConfig>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterClient>, store: Arc<dyn ObjectStore>, config: Arc<FlowmeshConfig>) -> Self {
        Self { cluster, store, config }
    }

    #[must_use]
    pub fn config(&self) -> &FlowmeshConfig {
        &self.config
    }

    #[must_use]
    pub fn cluster(&self) -> &Arc<dyn ClusterClient> {
        &self.cluster
    }

    /// Run a blocking store call off the async runtime.
    async fn with_store<T, F>(&self, what: &'static str, f: F) -> Result<T, FlowError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ObjectStore) -> Result<T, FlowError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| {
                error!(task = what, error = %e, "Store task panicked");
                FlowError::Store(StoreError::backend(e))
            })?
    }

    // -----------------------------------------------------------------------
    // Planning
    // -----------------------------------------------------------------------

    /// Validate a deploy/kick request and resolve its steps.
    ///
    /// # Errors
    ///
    /// Client errors ([`FlowError::Validation`], [`FlowError::NotFound`],
    /// [`FlowError::InvalidParams`]) and store failures.
    pub async fn plan(&self, request: &DeployRequest) -> Result<FlowPlan, FlowError> {
        validate_identity(request)?;
        let options = request.options(self.config.timeouts.verify_seconds)?;
        let ids = request.steps.clone();
        let steps = self
            .with_store("assemble_steps", move |store| assemble_steps(store, &ids))
            .await?;
        validate_deploy(request, &steps)?;
        Ok(FlowPlan {
            user: request.user_id(),
            flow: request.flow(),
            namespace: request.namespace(),
            steps,
            options,
        })
    }

    /// Whether the desired steps differ from what runs in the cluster.
    pub async fn flow_changed(&self, plan: &FlowPlan) -> bool {
        change::flow_changed(self.cluster.as_ref(), &plan.flow, &plan.namespace, &plan.steps).await
    }

    // -----------------------------------------------------------------------
    // Deploy
    // -----------------------------------------------------------------------

    /// Preflight, then converge the cluster onto the plan and prune leftovers.
    ///
    /// Returns the `apply.ok` message.
    ///
    /// # Errors
    ///
    /// [`FlowError::Preflight`] when the dry run rejects the flow,
    /// [`FlowError::Provision`] when a resource cannot be applied, and
    /// [`FlowError::Cluster`] when the namespace cannot be created.
    pub async fn apply(&self, plan: &FlowPlan, cancel: &CancellationToken) -> Result<String, FlowError> {
        if plan.options.create_namespace_if_missing && self.cluster.ensure_namespace(&plan.namespace).await? {
            info!(namespace = %plan.namespace, "Namespace created");
        }

        let launcher = JobLauncher::new(self.cluster.as_ref(), &self.config.poll, cancel);
        let preflight = run_preflight(&launcher, &self.config, &plan.flow, &plan.namespace, &plan.steps).await;
        if !preflight.ok {
            return Err(FlowError::Preflight(preflight.detail));
        }
        if cancel.is_cancelled() {
            return Err(FlowError::Cancelled);
        }

        let alive = Provisioner::new(self.cluster.as_ref(), &self.config)
            .provision(&plan.flow, &plan.namespace, &plan.steps)
            .await?;
        let pruned = prune_stale(self.cluster.as_ref(), &plan.flow, &plan.namespace, &alive).await;
        if !pruned.is_empty() {
            info!(
                flow_id = %plan.flow,
                services = ?pruned.services,
                sources = ?pruned.sources,
                "Pruned stale step resources"
            );
        }
        Ok(format!("flow {} applied ({} steps)", plan.flow, plan.steps.len()))
    }

    /// Wait for every step service, then the sink and every source, to be Ready.
    ///
    /// Each service gets half of `timeout` (at least five seconds); the sink
    /// and sources share one deadline of `timeout` from the start.
    pub async fn prepare_deployed_flow(
        &self,
        plan: &FlowPlan,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> VerifyOutcome {
        if plan.steps.is_empty() {
            return VerifyOutcome::failed(VerifyStage::Steps, "steps is empty");
        }
        let names = FlowNames::new(&plan.flow);
        let shared = Deadline::after(timeout);
        let per_service = (timeout / 2).max(MIN_SERVICE_WAIT);
        let waiter = ReadinessWaiter::new(self.cluster.as_ref(), cancel);
        let poll = &self.config.poll;

        for step in &plan.steps {
            let service = names.service(&step.name);
            if let Err(e) = waiter
                .wait_ready(
                    ResourceKind::KnativeService,
                    &plan.namespace,
                    &service,
                    Deadline::after(per_service),
                    poll.service(),
                )
                .await
            {
                return readiness_failure(&e);
            }
        }

        if let Err(e) = waiter
            .wait_ready(ResourceKind::KafkaSink, &plan.namespace, &names.sink(), shared, poll.sink())
            .await
        {
            return readiness_failure(&e);
        }

        for step in &plan.steps {
            let source = names.source(&step.name);
            if let Err(e) = waiter
                .wait_ready(ResourceKind::KafkaSource, &plan.namespace, &source, shared, poll.source())
                .await
            {
                return readiness_failure(&e);
            }
        }
        VerifyOutcome::passed("prepared")
    }

    /// Inject one kick event and confirm it reached the last step.
    pub async fn run_once_and_verify(
        &self,
        plan: &FlowPlan,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> VerifyOutcome {
        let launcher = JobLauncher::new(self.cluster.as_ref(), &self.config.poll, cancel);
        let evidence = LogScrapeVerifier::new(Arc::clone(&self.cluster), self.config.poll.clone(), cancel.clone());
        KickVerifier::new(&launcher, &evidence, &self.config)
            .run(&plan.flow, &plan.namespace, &plan.steps, timeout)
            .await
    }

    /// Apply, wait for readiness, then kick and verify.
    pub async fn apply_and_kick_verify(
        &self,
        plan: &FlowPlan,
        timeout: Duration,
        progress: Option<&ProgressReporter>,
        cancel: &CancellationToken,
    ) -> VerifyOutcome {
        let applied = match self.apply(plan, cancel).await {
            Ok(message) => message,
            Err(FlowError::Cancelled) => return VerifyOutcome::failed(VerifyStage::Cancelled, "operation cancelled"),
            Err(e) => {
                warn!(flow_id = %plan.flow, error = %e, "Apply failed");
                return VerifyOutcome::failed(VerifyStage::Apply, format!("apply failed: {e}"));
            }
        };

        let prepared = self.prepare_deployed_flow(plan, timeout, cancel).await;
        if !prepared.is_ok() {
            return prepared;
        }
        if let Some(progress) = progress {
            progress.progress(Phase::ApplyOk, applied, data([("flowId", Value::from(plan.flow.as_str()))]));
        }

        let verified = self.run_once_and_verify(plan, timeout, cancel).await;
        if !verified.is_ok() {
            return verified;
        }
        VerifyOutcome::passed("deployed & verified")
    }

    // -----------------------------------------------------------------------
    // Streaming
    // -----------------------------------------------------------------------

    /// Run a planned deploy or kick, reporting every phase.
    ///
    /// Always ends the stream with a verdict followed by `done`.
    pub async fn execute(&self, plan: &FlowPlan, reporter: &ProgressReporter, cancel: &CancellationToken) -> VerifyOutcome {
        reporter.hello();
        self.stamp_latest_run(&plan.flow, reporter).await;

        let timeout = plan.verify_timeout();
        let outcome = match plan.options.op {
            Operation::Kick => {
                reporter.progress(
                    Phase::VerifyStart,
                    "kick & verify",
                    data([
                        ("op", Value::from(Operation::Kick.as_str())),
                        ("timeoutSeconds", Value::from(plan.options.verify_timeout_seconds)),
                    ]),
                );
                self.run_once_and_verify(plan, timeout, cancel).await
            }
            Operation::Deploy => {
                if !self.flow_changed(plan).await {
                    reporter.progress(Phase::ApplySkip, "no changes; kick only", Map::new());
                    return finish(plan, reporter, self.run_once_and_verify(plan, timeout, cancel).await);
                }
                reporter.progress(
                    Phase::ApplyStart,
                    format!("deploying flow {}", plan.flow),
                    data([
                        ("steps", Value::from(plan.steps.len())),
                        ("timeoutSeconds", Value::from(plan.options.verify_timeout_seconds)),
                    ]),
                );
                self.apply_and_kick_verify(plan, timeout, Some(reporter), cancel).await
            }
        };
        finish(plan, reporter, outcome)
    }

    /// Run [`execute`](Self::execute) on its own task.
    ///
    /// A panic inside the operation is reported as an `error` event instead
    /// of tearing the stream down silently.
    #[must_use]
    pub fn spawn_execute(&self, plan: FlowPlan, reporter: ProgressReporter, cancel: CancellationToken) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let run = AssertUnwindSafe(this.execute(&plan, &reporter, &cancel)).catch_unwind();
            if let Err(payload) = run.await {
                let message = panic_message(payload.as_ref());
                error!(flow_id = %plan.flow, op_id = reporter.op_id(), panic = %message, "Flow operation panicked");
                reporter.error(format!("Internal server error: {message}"));
            }
        })
    }

    async fn stamp_latest_run(&self, flow: &FlowId, reporter: &ProgressReporter) {
        let Some(id) = flow.as_numeric() else {
            return;
        };
        let stamped = self
            .with_store("record_latest_run", move |store| {
                Ok(store.record_latest_run(id, Utc::now())?)
            })
            .await;
        match stamped {
            Ok(true) => {}
            Ok(false) => info!(flow_id = id, "No stored flow to stamp latest_run on"),
            Err(e) => {
                warn!(flow_id = id, error = %e, "Failed to update flow latest_run");
                reporter.warning(format!("Failed to update flow latest_run: {e}"));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Teardown and unit tests
    // -----------------------------------------------------------------------

    /// Delete everything the flow owns.
    ///
    /// # Errors
    ///
    /// [`FlowError::Validation`] for a malformed request. Cluster problems
    /// end up as warnings on the report.
    pub async fn delete_flow(&self, request: &DeleteRequest) -> Result<TeardownReport, FlowError> {
        request.validate()?;
        Ok(teardown_flow(
            self.cluster.as_ref(),
            &request.flow(),
            &request.namespace(),
            &self.config.kafka.namespace,
        )
        .await)
    }

    /// Run one stored step against an optional sample event.
    ///
    /// `total_timeout_seconds` falls back to the configured unit-test budget
    /// when absent or zero.
    ///
    /// # Errors
    ///
    /// Client errors for a malformed request or unknown object, and
    /// [`FlowError::Cluster`] when the sandbox cannot be launched.
    pub async fn unit_test(
        &self,
        request: &UnitTestRequest,
        total_timeout_seconds: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<UnitTestReport, FlowError> {
        request.validate()?;
        let Some(id) = request.test else {
            return Err(FlowError::validation("test object ID is required"));
        };
        let object = self.with_store("fetch_object", move |store| fetch_object(store, id)).await?;
        let params = StepParams::parse(&object)?;

        let namespace = request.namespace();
        self.cluster.ensure_namespace(&namespace).await?;

        let flow = request.flow();
        let run = UnitTestRun {
            flow: &flow,
            namespace: &namespace,
            step_label: &object.label,
            code: &params.code,
            sample_event: request.sample_event(),
            timeout_seconds: total_timeout_seconds
                .filter(|t| *t > 0)
                .unwrap_or(self.config.timeouts.unit_test_seconds),
        };
        let launcher = JobLauncher::new(self.cluster.as_ref(), &self.config.poll, cancel);
        run_unit_test(&launcher, &self.config, &run).await
    }
}

/// Log the verdict and close the stream.
fn finish(plan: &FlowPlan, reporter: &ProgressReporter, outcome: VerifyOutcome) -> VerifyOutcome {
    info!(
        flow_id = %plan.flow,
        op = plan.options.op.as_str(),
        op_id = reporter.op_id(),
        ok = outcome.is_ok(),
        elapsed_ms = reporter.elapsed_ms(),
        "Flow operation finished"
    );
    reporter.verdict(&outcome);
    reporter.done();
    outcome
}

fn readiness_failure(err: &FlowError) -> VerifyOutcome {
    match err {
        FlowError::Cancelled => VerifyOutcome::failed(VerifyStage::Cancelled, "operation cancelled"),
        other => VerifyOutcome::failed(VerifyStage::Readiness, other.to_string()),
    }
}

fn data<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
