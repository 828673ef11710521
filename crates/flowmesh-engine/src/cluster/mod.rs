//! Cluster access seam.
//!
//! Every component talks to Kubernetes through [`ClusterClient`], which
//! speaks [`DynamicObject`] for the handful of resource kinds a flow uses.
//! [`KubeCluster`] is the real client; [`InMemoryCluster`] backs tests and
//! local dry runs.

pub mod kubernetes;
pub mod memory;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;

pub use self::kubernetes::KubeCluster;
pub use self::memory::{InMemoryCluster, JobScript};

/// Resource kinds a flow deploys, launches, or reads logs from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    KafkaTopic,
    KafkaSink,
    KnativeService,
    KafkaSource,
    ConfigMap,
    Job,
    Pod,
}

impl ResourceKind {
    /// `(group, version, kind, plural)` of this kind.
    fn coordinates(self) -> (&'static str, &'static str, &'static str, &'static str) {
        match self {
            Self::KafkaTopic => ("kafka.strimzi.io", "v1beta2", "KafkaTopic", "kafkatopics"),
            Self::KafkaSink => ("eventing.knative.dev", "v1alpha1", "KafkaSink", "kafkasinks"),
            Self::KnativeService => ("serving.knative.dev", "v1", "Service", "services"),
            Self::KafkaSource => ("sources.knative.dev", "v1", "KafkaSource", "kafkasources"),
            Self::ConfigMap => ("", "v1", "ConfigMap", "configmaps"),
            Self::Job => ("batch", "v1", "Job", "jobs"),
            Self::Pod => ("", "v1", "Pod", "pods"),
        }
    }

    #[must_use]
    pub fn api_resource(self) -> ApiResource {
        let (group, version, kind, plural) = self.coordinates();
        let api_version = if group.is_empty() {
            version.to_string()
        } else {
            format!("{group}/{version}")
        };
        ApiResource {
            group: group.to_string(),
            version: version.to_string(),
            api_version,
            kind: kind.to_string(),
            plural: plural.to_string(),
        }
    }

    /// Empty object of this kind, named and namespaced.
    #[must_use]
    pub fn object(self, namespace: &str, name: &str) -> DynamicObject {
        DynamicObject::new(name, &self.api_resource()).within(namespace)
    }

    /// Kinds that report a `Ready` condition.
    #[must_use]
    pub fn has_ready_condition(self) -> bool {
        matches!(
            self,
            Self::KafkaTopic | Self::KafkaSink | Self::KnativeService | Self::KafkaSource
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KafkaTopic => "KafkaTopic",
            Self::KafkaSink => "KafkaSink",
            Self::KnativeService => "KnativeService",
            Self::KafkaSource => "KafkaSource",
            Self::ConfigMap => "ConfigMap",
            Self::Job => "Job",
            Self::Pod => "Pod",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Marker the API server puts in replace rejections of immutable
/// template annotations.
const IMMUTABLE_ANNOTATION_MARKER: &str = "annotation value is immutable";

/// Errors produced by [`ClusterClient`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("{kind} {name} not found")]
    NotFound { kind: ResourceKind, name: String },

    /// The API server answered with a failure status.
    #[error("{kind} {name}: {message} ({reason}, {code})")]
    Api {
        kind: ResourceKind,
        name: String,
        code: u16,
        reason: String,
        message: String,
    },

    #[error("kubernetes client error: {0}")]
    Kube(#[from] kube::Error),

    #[error("malformed object: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cluster configuration: {0}")]
    Config(String),
}

impl ClusterError {
    pub fn not_found(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn already_exists(kind: ResourceKind, name: impl Into<String>) -> Self {
        let name = name.into();
        Self::Api {
            kind,
            message: format!("{} \"{name}\" already exists", kind.as_str()),
            name,
            code: 409,
            reason: "AlreadyExists".to_string(),
        }
    }

    pub fn rejected(
        kind: ResourceKind,
        name: impl Into<String>,
        code: u16,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Api {
            kind,
            name: name.into(),
            code,
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Map a client error for one named object into this taxonomy.
    pub(crate) fn from_kube(kind: ResourceKind, name: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => Self::not_found(kind, name),
            kube::Error::Api(ae) => Self::Api {
                kind,
                name: name.to_string(),
                code: ae.code,
                reason: ae.reason,
                message: ae.message,
            },
            other => Self::Kube(other),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. }) || matches!(self, Self::Api { code: 404, .. })
    }

    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::Api { code: 409, reason, .. } if reason == "AlreadyExists")
    }

    /// Replace was refused because a template annotation cannot change.
    #[must_use]
    pub fn is_immutable_annotation(&self) -> bool {
        matches!(self, Self::Api { message, .. } if message.contains(IMMUTABLE_ANNOTATION_MARKER))
    }
}

// ---------------------------------------------------------------------------
// Client trait
// ---------------------------------------------------------------------------

/// Options for reading a container's log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    pub container: Option<String>,
    pub tail_lines: Option<i64>,
}

impl LogQuery {
    #[must_use]
    pub fn container(name: impl Into<String>, tail_lines: i64) -> Self {
        Self {
            container: Some(name.into()),
            tail_lines: Some(tail_lines),
        }
    }
}

/// Operations the engine needs from a Kubernetes API server.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn ClusterClient>`.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Make sure a namespace exists. Returns `true` if it was created.
    async fn ensure_namespace(&self, name: &str) -> Result<bool, ClusterError>;

    /// Create an object. Fails with an `AlreadyExists` status on conflict.
    async fn create(
        &self,
        kind: ResourceKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError>;

    /// Replace an existing object wholesale.
    async fn replace(
        &self,
        kind: ResourceKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError>;

    /// Fetch an object; `Ok(None)` when it does not exist.
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, ClusterError>;

    /// List objects matching a `k=v[,k=v]` label selector.
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError>;

    /// Delete an object. Jobs are deleted with background propagation.
    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<(), ClusterError>;

    /// Names of pods matching a label selector.
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<String>, ClusterError>;

    /// Log text of one pod.
    async fn pod_logs(&self, namespace: &str, pod: &str, query: &LogQuery) -> Result<String, ClusterError>;
}

// ---------------------------------------------------------------------------
// Object views
// ---------------------------------------------------------------------------

/// Whether `status.conditions` holds `type=Ready, status=True`.
#[must_use]
pub fn is_ready(object: &DynamicObject) -> bool {
    object.data["status"]["conditions"]
        .as_array()
        .is_some_and(|conditions| {
            conditions.iter().any(|c| {
                c["type"].as_str() == Some("Ready") && c["status"].as_str() == Some("True")
            })
        })
}

/// Annotation on `spec.template.metadata`, where per-revision settings live.
#[must_use]
pub fn template_annotation<'a>(object: &'a DynamicObject, key: &str) -> Option<&'a str> {
    object.data["spec"]["template"]["metadata"]["annotations"][key].as_str()
}

/// Status fields of a batch job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobState {
    pub uid: Option<String>,
    pub succeeded: i64,
    pub failed: i64,
}

impl JobState {
    #[must_use]
    pub fn of(object: &DynamicObject) -> Self {
        Self {
            uid: object.metadata.uid.clone(),
            succeeded: object.data["status"]["succeeded"].as_i64().unwrap_or(0),
            failed: object.data["status"]["failed"].as_i64().unwrap_or(0),
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.succeeded > 0 || self.failed > 0
    }
}

/// Parse a `k=v[,k=v]` equality selector.
pub(crate) fn parse_selector(selector: &str) -> Vec<(&str, &str)> {
    selector
        .split(',')
        .filter_map(|term| term.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .collect()
}

pub(crate) fn selector_matches(selector: &str, labels: Option<&BTreeMap<String, String>>) -> bool {
    parse_selector(selector)
        .into_iter()
        .all(|(k, v)| labels.and_then(|l| l.get(k)).is_some_and(|have| have == v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn ClusterClient) {}
    }

    #[test]
    fn test_api_resources() {
        let svc = ResourceKind::KnativeService.api_resource();
        assert_eq!(svc.api_version, "serving.knative.dev/v1");
        assert_eq!(svc.kind, "Service");
        let cm = ResourceKind::ConfigMap.api_resource();
        assert_eq!(cm.api_version, "v1");
        assert_eq!(ResourceKind::Job.api_resource().api_version, "batch/v1");
    }

    #[test]
    fn test_ready_condition() {
        let mut obj = ResourceKind::KafkaSink.object("user-a", "sink-1");
        assert!(!is_ready(&obj));
        obj.data = json!({"status": {"conditions": [
            {"type": "Addressable", "status": "True"},
            {"type": "Ready", "status": "False"}
        ]}});
        assert!(!is_ready(&obj));
        obj.data["status"]["conditions"][1]["status"] = json!("True");
        assert!(is_ready(&obj));
    }

    #[test]
    fn test_job_state() {
        let mut obj = ResourceKind::Job.object("ns", "kick-flow-1-abcd1234");
        obj.metadata.uid = Some("u-1".into());
        obj.data = json!({"status": {"succeeded": 1}});
        let state = JobState::of(&obj);
        assert_eq!(state.uid.as_deref(), Some("u-1"));
        assert!(state.is_finished());
        assert_eq!(state.failed, 0);
    }

    #[test]
    fn test_error_classification() {
        assert!(ClusterError::already_exists(ResourceKind::ConfigMap, "cm").is_already_exists());
        assert!(ClusterError::not_found(ResourceKind::Job, "j").is_not_found());
        let immut = ClusterError::rejected(
            ResourceKind::KnativeService,
            "flow1-a",
            422,
            "Invalid",
            "metadata.annotations.autoscaling.knative.dev/minScale: annotation value is immutable",
        );
        assert!(immut.is_immutable_annotation());
        assert!(!immut.is_already_exists());
    }

    #[test]
    fn test_selector_matching() {
        let labels: BTreeMap<String, String> =
            [("flow_id".to_string(), "7".to_string()), ("app".to_string(), "x".to_string())]
                .into_iter()
                .collect();
        assert!(selector_matches("flow_id=7", Some(&labels)));
        assert!(selector_matches("flow_id=7,app=x", Some(&labels)));
        assert!(!selector_matches("flow_id=8", Some(&labels)));
        assert!(!selector_matches("flow_id=7", None));
    }
}
