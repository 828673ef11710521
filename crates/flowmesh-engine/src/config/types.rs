use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level service configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowmeshConfig {
    pub cluster: ClusterConfig,
    pub kafka: KafkaConfig,
    pub images: ImagesConfig,
    pub runtime: RuntimeConfig,
    pub timeouts: TimeoutConfig,
    pub poll: PollConfig,
    pub server: ServerConfig,
    pub store: StoreConfig,
}

/// How to reach the Kubernetes API server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Use the pod's service account instead of a kubeconfig.
    pub in_cluster: bool,
    pub kubeconfig: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Namespace holding the Kafka cluster and every flow topic.
    pub namespace: String,
    /// Strimzi cluster name, used for topic labels and the default bootstrap.
    pub cluster: String,
    pub bootstrap: Option<String>,
    pub topic_partitions: u32,
    pub topic_replicas: u32,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            namespace: "kafka".to_string(),
            cluster: "my-cluster".to_string(),
            bootstrap: None,
            topic_partitions: 1,
            topic_replicas: 3,
        }
    }
}

impl KafkaConfig {
    /// Explicit bootstrap address, or the in-cluster Strimzi default.
    #[must_use]
    pub fn bootstrap_servers(&self) -> String {
        self.bootstrap.clone().unwrap_or_else(|| {
            format!(
                "{}-kafka-bootstrap.{}.svc.cluster.local:9092",
                self.cluster, self.namespace
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    /// Pinned image for step services, preflight, and unit-test jobs.
    pub sandbox: String,
    /// Image for the kick and topic-probe jobs.
    pub kcat: String,
    pub pull_policy: String,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            sandbox: "ghcr.io/miribitsm3/python_image_build/python-pandas:1.0".to_string(),
            kcat: "edenhill/kcat:1.7.1".to_string(),
            pull_policy: "IfNotPresent".to_string(),
        }
    }
}

/// Step runtime launched inside each step service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub command: Vec<String>,
    pub port: u16,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "python".to_string(),
                "-u".to_string(),
                "/opt/flowmesh/runner.py".to_string(),
            ],
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub verify_seconds: u64,
    pub preflight_seconds: u64,
    pub preflight_step_seconds: u64,
    pub unit_test_seconds: u64,
    pub unit_test_step_seconds: u64,
    pub job_ttl_seconds: u64,
    pub probe_messages: u32,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            verify_seconds: 40,
            preflight_seconds: 90,
            preflight_step_seconds: 20,
            unit_test_seconds: 20,
            unit_test_step_seconds: 10,
            job_ttl_seconds: 60,
            probe_messages: 20,
        }
    }
}

impl TimeoutConfig {
    #[must_use]
    pub fn preflight(&self) -> Duration {
        Duration::from_secs(self.preflight_seconds)
    }
}

/// Poll intervals, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub service_ms: u64,
    pub sink_ms: u64,
    pub source_ms: u64,
    pub job_ms: u64,
    pub job_uid_ms: u64,
    pub upstream_logs_ms: u64,
    pub downstream_logs_ms: u64,
    pub log_tail_lines: i64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            service_ms: 700,
            sink_ms: 1000,
            source_ms: 800,
            job_ms: 500,
            job_uid_ms: 200,
            upstream_logs_ms: 800,
            downstream_logs_ms: 1000,
            log_tail_lines: 1000,
        }
    }
}

impl PollConfig {
    #[must_use]
    pub fn service(&self) -> Duration {
        Duration::from_millis(self.service_ms)
    }

    #[must_use]
    pub fn sink(&self) -> Duration {
        Duration::from_millis(self.sink_ms)
    }

    #[must_use]
    pub fn source(&self) -> Duration {
        Duration::from_millis(self.source_ms)
    }

    #[must_use]
    pub fn job(&self) -> Duration {
        Duration::from_millis(self.job_ms)
    }

    #[must_use]
    pub fn job_uid(&self) -> Duration {
        Duration::from_millis(self.job_uid_ms)
    }

    #[must_use]
    pub fn upstream_logs(&self) -> Duration {
        Duration::from_millis(self.upstream_logs_ms)
    }

    #[must_use]
    pub fn downstream_logs(&self) -> Duration {
        Duration::from_millis(self.downstream_logs_ms)
    }

    /// Same cadence with every interval set to `ms`; used by tests.
    #[must_use]
    pub fn uniform(ms: u64) -> Self {
        Self {
            service_ms: ms,
            sink_ms: ms,
            source_ms: ms,
            job_ms: ms,
            job_uid_ms: ms,
            upstream_logs_ms: ms,
            downstream_logs_ms: ms,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendKind {
    #[default]
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackendKind,
    /// SQLite file path or Postgres connection string.
    pub connection: Option<String>,
}

// ---------------------------------------------------------------------------
// Environment overlay
// ---------------------------------------------------------------------------

impl FlowmeshConfig {
    /// Overlay settings from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Overlay settings from any variable lookup.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("K8S_IN_CLUSTER") {
            self.cluster.in_cluster = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = get("KUBECONFIG") {
            self.cluster.kubeconfig = Some(v);
        }
        if let Some(v) = get("K8S_CONTEXT") {
            self.cluster.context = Some(v);
        }
        if let Some(v) = get("KAFKA_NAMESPACE") {
            self.kafka.namespace = v;
        }
        if let Some(v) = get("KAFKA_CLUSTER") {
            self.kafka.cluster = v;
        }
        if let Some(v) = get("KAFKA_BOOTSTRAP") {
            self.kafka.bootstrap = Some(v);
        }
        if let Some(v) = get("SANDBOX_IMAGE") {
            self.images.sandbox = v;
        }
        if let Some(v) = get("SERVER_HOST") {
            self.server.host = v;
        }
        if let Some(port) = get("SERVER_PORT").and_then(|v| v.trim().parse().ok()) {
            self.server.port = port;
        }
        if let Some(v) = get("DATABASE_URL") {
            self.store.backend = StoreBackendKind::Postgres;
            self.store.connection = Some(v);
        } else if let Some(v) = get("SQLITE_PATH") {
            self.store.backend = StoreBackendKind::Sqlite;
            self.store.connection = Some(v);
        }
    }
}
