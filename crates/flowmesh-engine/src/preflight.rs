//! Offline dry run of a whole flow in a disposable sandbox job.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flowmesh_types::ids::FlowId;
use flowmesh_types::outcome::{PreflightResult, PREFLIGHT_OK_MARKER};
use flowmesh_types::step::StepSpec;
use serde_json::json;
use tracing::{info, warn};

use crate::config::FlowmeshConfig;
use crate::launch::{truncate_logs, JobExit, JobLauncher};
use crate::poll::Deadline;
use crate::resources::names::{LABEL_FLOW_ID, LABEL_PURPOSE};
use crate::resources::{BatchJob, FlowNames, JobResources};

const HARNESS: &str = include_str!("../harness/preflight.py");

/// Build the preflight job for `steps`, in order.
#[must_use]
pub fn preflight_job(config: &FlowmeshConfig, flow: &FlowId, namespace: &str, steps: &[StepSpec]) -> BatchJob {
    let payload: Vec<_> = steps
        .iter()
        .map(|s| json!({"name": s.name, "code": s.code}))
        .collect();
    let encoded = BASE64.encode(serde_json::Value::Array(payload).to_string());

    BatchJob::python_harness(
        FlowNames::new(flow).preflight_job(),
        namespace,
        "check",
        &config.images.sandbox,
        HARNESS,
    )
    .label(LABEL_FLOW_ID, flow.as_str())
    .label(LABEL_PURPOSE, "preflight")
    .env("STEPS_B64", encoded)
    .env("PER_STEP_TIMEOUT", config.timeouts.preflight_step_seconds.to_string())
    .env("PREFLIGHT", "1")
    .pull_policy(&config.images.pull_policy)
    .resources(JobResources::sandbox("768Mi"))
    .ttl_seconds(config.timeouts.job_ttl_seconds)
}

/// Passed when some line is exactly the success marker; otherwise the
/// (truncated) logs become the failure detail.
#[must_use]
pub fn judge_logs(logs: &str) -> PreflightResult {
    if logs.lines().any(|line| line.trim() == PREFLIGHT_OK_MARKER) {
        return PreflightResult::passed();
    }
    if logs.trim().is_empty() {
        PreflightResult::failed("No logs")
    } else {
        PreflightResult::failed(truncate_logs(logs))
    }
}

/// Run the dry run and judge it by the harness's success marker.
pub async fn run_preflight(
    launcher: &JobLauncher<'_>,
    config: &FlowmeshConfig,
    flow: &FlowId,
    namespace: &str,
    steps: &[StepSpec],
) -> PreflightResult {
    let job = preflight_job(config, flow, namespace, steps);
    if let Err(e) = launcher.launch(&job).await {
        warn!(flow_id = %flow, error = %e, "Preflight job creation failed");
        return PreflightResult::failed(format!("Failed to create preflight job: {e}"));
    }

    let budget = config.timeouts.preflight_seconds;
    let exit = launcher
        .wait_finished(namespace, &job.name, Deadline::after(config.timeouts.preflight()))
        .await;
    let logs = launcher.logs(namespace, &job.name).await;

    match exit {
        JobExit::TimedOut => {
            return PreflightResult::failed(format!("Preflight timeout ({budget}s)\n{}", truncate_logs(&logs)));
        }
        JobExit::Cancelled => return PreflightResult::failed("Preflight cancelled"),
        JobExit::Succeeded | JobExit::Failed => {}
    }

    let result = judge_logs(&logs);
    if result.ok {
        info!(flow_id = %flow, job = %job.name, steps = steps.len(), "Preflight passed");
        return result;
    }
    warn!(
        flow_id = %flow,
        job = %job.name,
        tag = result.error_tag().unwrap_or("unknown"),
        "Preflight failed"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::{InMemoryCluster, JobScript};
    use crate::cluster::ResourceKind;
    use crate::resources::jobs::local;
    use crate::resources::Manifest;
    use kube::ResourceExt;
    use tokio_util::sync::CancellationToken;

    fn config() -> FlowmeshConfig {
        let mut config = FlowmeshConfig::default();
        config.poll = crate::config::types::PollConfig::uniform(5);
        config.timeouts.preflight_seconds = 1;
        config
    }

    fn steps() -> Vec<StepSpec> {
        vec![
            StepSpec::new("ingest", "def handle(e): return e", 0),
            StepSpec::new("transform", "def handle(e): return None", 1),
            StepSpec::new("sink", "def handle(e): pass", 2),
        ]
    }

    #[test]
    fn test_job_carries_ordered_steps() {
        let job = preflight_job(&config(), &FlowId::new("2"), "user-a", &steps());
        assert!(job.name.starts_with("preflight-flow2-"));
        let obj = job.to_object();
        assert_eq!(obj.labels()["purpose"], "preflight");
        assert_eq!(obj.labels()["flow_id"], "2");

        let (_, encoded) = job.env.iter().find(|(k, _)| k == "STEPS_B64").unwrap();
        let decoded: serde_json::Value = serde_json::from_slice(&BASE64.decode(encoded).unwrap()).unwrap();
        let names: Vec<&str> = decoded
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["ingest", "transform", "sink"]);
        assert!(job.script.contains("EMPTY_OUTPUT"));
    }

    fn harness_steps(prefix: &str, middle: &str) -> Vec<StepSpec> {
        vec![
            StepSpec::new(format!("{prefix}-ingest"), "def handle(evt):\n    return {'order': 1}\n", 0),
            StepSpec::new(format!("{prefix}-transform"), middle, 1),
            StepSpec::new(format!("{prefix}-sink"), "def handle(evt):\n    pass\n", 2),
        ]
    }

    #[test]
    fn test_harness_passes_three_step_chain() {
        let steps = harness_steps("pfh-ok", "def handle(evt):\n    return dict(evt, seen=True)\n");
        let job = preflight_job(&config(), &FlowId::new("2"), "user-a", &steps);
        let Some(run) = local::run_python(HARNESS, &job) else {
            return;
        };
        assert_eq!(run.code, Some(0), "{}", run.stdout);
        let result = judge_logs(&run.stdout);
        assert!(result.ok, "{}", result.detail);
    }

    #[test]
    fn test_harness_empty_output_on_middle_step() {
        let steps = harness_steps("pfh-empty", "def handle(evt):\n    return None\n");
        let job = preflight_job(&config(), &FlowId::new("2"), "user-a", &steps);
        let Some(run) = local::run_python(HARNESS, &job) else {
            return;
        };
        assert_eq!(run.code, Some(13));
        let result = judge_logs(&run.stdout);
        assert!(!result.ok);
        assert_eq!(result.error_tag(), Some("EMPTY_OUTPUT"));
        assert!(result
            .detail
            .starts_with("STEP pfh-empty-transform EMPTY_OUTPUT: downstream step would receive nothing"));
    }

    #[test]
    fn test_harness_syntax_error_names_step() {
        let steps = harness_steps("pfh-syntax", "def handle(evt)\n    return evt\n");
        let job = preflight_job(&config(), &FlowId::new("2"), "user-a", &steps);
        let Some(run) = local::run_python(HARNESS, &job) else {
            return;
        };
        assert_eq!(run.code, Some(2));
        assert_eq!(judge_logs(&run.stdout).error_tag(), Some("SYNTAX_ERROR"));
    }

    #[test]
    fn test_judge_logs_without_output() {
        let result = judge_logs("  \n");
        assert!(!result.ok);
        assert_eq!(result.detail, "No logs");
        assert!(judge_logs("warming up\n OK \n").ok);
    }

    #[tokio::test]
    async fn test_ok_marker_passes() {
        let cluster = InMemoryCluster::new();
        cluster.script_job("preflight-", JobScript::succeed("loading\nOK\n"));
        let config = config();
        let cancel = CancellationToken::new();
        let launcher = JobLauncher::new(&cluster, &config.poll, &cancel);
        let result = run_preflight(&launcher, &config, &FlowId::new("2"), "user-a", &steps()).await;
        assert!(result.ok);
    }

    #[tokio::test]
    async fn test_empty_output_fails_with_tag() {
        let cluster = InMemoryCluster::new();
        cluster.script_job(
            "preflight-",
            JobScript::fail("STEP transform EMPTY_OUTPUT: downstream step would receive nothing\n"),
        );
        let config = config();
        let cancel = CancellationToken::new();
        let launcher = JobLauncher::new(&cluster, &config.poll, &cancel);
        let result = run_preflight(&launcher, &config, &FlowId::new("2"), "user-a", &steps()).await;
        assert!(!result.ok);
        assert_eq!(result.error_tag(), Some("EMPTY_OUTPUT"));
    }

    #[tokio::test]
    async fn test_timeout_is_hard_failure() {
        let cluster = InMemoryCluster::new();
        let config = config();
        let cancel = CancellationToken::new();
        let launcher = JobLauncher::new(&cluster, &config.poll, &cancel);
        let result = run_preflight(&launcher, &config, &FlowId::new("2"), "user-a", &steps()).await;
        assert!(!result.ok);
        assert!(result.detail.starts_with("Preflight timeout (1s)"));
    }

    #[tokio::test]
    async fn test_creation_failure() {
        let cluster = InMemoryCluster::new();
        cluster.fail_create(ResourceKind::Job, "quota exceeded");
        let config = config();
        let cancel = CancellationToken::new();
        let launcher = JobLauncher::new(&cluster, &config.poll, &cancel);
        let result = run_preflight(&launcher, &config, &FlowId::new("2"), "user-a", &steps()).await;
        assert!(result.detail.starts_with("Failed to create preflight job"));
    }
}
