//! Launching disposable jobs and collecting what they printed.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cluster::{ClusterClient, ClusterError, JobState, LogQuery, ResourceKind};
use crate::config::types::PollConfig;
use crate::poll::{poll_until, Deadline, PollOutcome};
use crate::resources::names::LABEL_JOB_NAME;
use crate::resources::{BatchJob, Manifest};

/// Longest log excerpt carried in results and diagnostics.
pub const MAX_LOG_EXCERPT: usize = 4000;

const TRUNCATION_MARKER: &str = "\n...(truncated)";

/// How waiting on a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobExit {
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobExit {
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Cut `logs` to [`MAX_LOG_EXCERPT`] bytes on a char boundary.
#[must_use]
pub fn truncate_logs(logs: &str) -> String {
    if logs.len() <= MAX_LOG_EXCERPT {
        return logs.to_string();
    }
    let mut end = MAX_LOG_EXCERPT;
    while !logs.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{TRUNCATION_MARKER}", &logs[..end])
}

/// Creates jobs and waits on them through a [`ClusterClient`].
pub struct JobLauncher<'a> {
    cluster: &'a dyn ClusterClient,
    poll: &'a PollConfig,
    cancel: &'a CancellationToken,
}

impl<'a> JobLauncher<'a> {
    #[must_use]
    pub fn new(cluster: &'a dyn ClusterClient, poll: &'a PollConfig, cancel: &'a CancellationToken) -> Self {
        Self { cluster, poll, cancel }
    }

    /// Create the job, replacing a same-named leftover.
    ///
    /// # Errors
    ///
    /// Returns the API error when neither create nor replace succeeds.
    pub async fn launch(&self, job: &BatchJob) -> Result<(), ClusterError> {
        let object = job.to_object();
        match self.cluster.create(ResourceKind::Job, &job.namespace, &object).await {
            Ok(_) => {}
            Err(e) if e.is_already_exists() => {
                self.cluster
                    .replace(ResourceKind::Job, &job.namespace, &object)
                    .await?;
            }
            Err(e) => return Err(e),
        }
        debug!(job = %job.name, namespace = %job.namespace, "Job launched");
        Ok(())
    }

    /// Wait until the job reports success or failure.
    pub async fn wait_finished(&self, namespace: &str, name: &str, deadline: Deadline) -> JobExit {
        let outcome = poll_until(deadline, self.poll.job(), self.cancel, || async {
            let state = self.state(namespace, name).await?;
            state.is_finished().then_some(state)
        })
        .await;
        exit_of(outcome)
    }

    /// Wait for success of the job instance that exists now.
    ///
    /// The job's UID is captured first, and status is only trusted while
    /// the UID stays the same, so a same-named replacement cannot be
    /// mistaken for the job that was launched.
    pub async fn wait_succeeded_pinned(&self, namespace: &str, name: &str, deadline: Deadline) -> JobExit {
        let uid = poll_until(deadline, self.poll.job_uid(), self.cancel, || async {
            self.state(namespace, name).await?.uid
        })
        .await;
        let uid = match uid {
            PollOutcome::Ready(uid) => uid,
            PollOutcome::TimedOut => return JobExit::TimedOut,
            PollOutcome::Cancelled => return JobExit::Cancelled,
        };

        let outcome = poll_until(deadline, self.poll.job(), self.cancel, || async {
            let state = self.state(namespace, name).await?;
            (state.uid.as_deref() == Some(uid.as_str()) && state.is_finished()).then_some(state)
        })
        .await;
        exit_of(outcome)
    }

    async fn state(&self, namespace: &str, name: &str) -> Option<JobState> {
        match self.cluster.get(ResourceKind::Job, namespace, name).await {
            Ok(Some(obj)) => Some(JobState::of(&obj)),
            Ok(None) => None,
            Err(e) => {
                debug!(job = name, error = %e, "Job status read failed, retrying");
                None
            }
        }
    }

    /// Full log of the job's first pod, or empty if none can be read.
    pub async fn logs(&self, namespace: &str, job_name: &str) -> String {
        let selector = format!("{LABEL_JOB_NAME}={job_name}");
        let pods = match self.cluster.list_pods(namespace, &selector).await {
            Ok(pods) => pods,
            Err(e) => {
                warn!(job = job_name, error = %e, "Listing job pods failed");
                return String::new();
            }
        };
        let Some(pod) = pods.first() else {
            return String::new();
        };
        self.cluster
            .pod_logs(namespace, pod, &LogQuery::default())
            .await
            .unwrap_or_else(|e| {
                warn!(job = job_name, pod = %pod, error = %e, "Reading job logs failed");
                String::new()
            })
    }
}

fn exit_of(outcome: PollOutcome<JobState>) -> JobExit {
    match outcome {
        PollOutcome::Ready(state) if state.succeeded > 0 => JobExit::Succeeded,
        PollOutcome::Ready(_) => JobExit::Failed,
        PollOutcome::TimedOut => JobExit::TimedOut,
        PollOutcome::Cancelled => JobExit::Cancelled,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cluster::memory::{InMemoryCluster, JobScript};

    fn job(name: &str) -> BatchJob {
        BatchJob::new(name, "user-a", "check", "img", "true")
    }

    #[test]
    fn test_truncate_logs() {
        assert_eq!(truncate_logs("short"), "short");
        let long = "é".repeat(MAX_LOG_EXCERPT);
        let cut = truncate_logs(&long);
        assert!(cut.ends_with("...(truncated)"));
        assert!(cut.len() <= MAX_LOG_EXCERPT + TRUNCATION_MARKER.len());
    }

    #[tokio::test]
    async fn test_launch_and_wait_success() {
        let cluster = InMemoryCluster::new();
        cluster.script_job("ok-", JobScript::succeed("hello\nOK\n"));
        let poll = PollConfig::uniform(5);
        let cancel = CancellationToken::new();
        let launcher = JobLauncher::new(&cluster, &poll, &cancel);

        launcher.launch(&job("ok-1")).await.unwrap();
        let exit = launcher
            .wait_succeeded_pinned("user-a", "ok-1", Deadline::after(Duration::from_secs(2)))
            .await;
        assert_eq!(exit, JobExit::Succeeded);
        assert_eq!(launcher.logs("user-a", "ok-1").await, "hello\nOK\n");
    }

    #[tokio::test]
    async fn test_failed_job() {
        let cluster = InMemoryCluster::new();
        cluster.script_job("bad-", JobScript::fail("boom"));
        let poll = PollConfig::uniform(5);
        let cancel = CancellationToken::new();
        let launcher = JobLauncher::new(&cluster, &poll, &cancel);

        launcher.launch(&job("bad-1")).await.unwrap();
        let exit = launcher
            .wait_finished("user-a", "bad-1", Deadline::after(Duration::from_secs(2)))
            .await;
        assert_eq!(exit, JobExit::Failed);
        assert!(exit.is_finished());
    }

    #[tokio::test]
    async fn test_unscripted_job_times_out_without_logs() {
        let cluster = InMemoryCluster::new();
        let poll = PollConfig::uniform(5);
        let cancel = CancellationToken::new();
        let launcher = JobLauncher::new(&cluster, &poll, &cancel);

        launcher.launch(&job("idle-1")).await.unwrap();
        let exit = launcher
            .wait_finished("user-a", "idle-1", Deadline::after(Duration::from_millis(30)))
            .await;
        assert_eq!(exit, JobExit::TimedOut);
        assert_eq!(launcher.logs("user-a", "idle-1").await, "");
    }

    #[tokio::test]
    async fn test_relaunch_replaces_leftover() {
        let cluster = InMemoryCluster::new();
        let poll = PollConfig::uniform(5);
        let cancel = CancellationToken::new();
        let launcher = JobLauncher::new(&cluster, &poll, &cancel);

        launcher.launch(&job("dup-1")).await.unwrap();
        launcher.launch(&job("dup-1")).await.unwrap();
        assert!(cluster.calls().contains(&"replace Job user-a/dup-1".to_string()));
    }
}
