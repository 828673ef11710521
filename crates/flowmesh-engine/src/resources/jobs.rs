//! Disposable batch jobs: preflight, unit test, kick, and topic probe.

use std::collections::BTreeMap;

use flowmesh_types::contract::CloudEventEnvelope;
use kube::api::DynamicObject;
use serde_json::{json, Value};

use super::names::LABEL_FLOW_ID;
use super::{labeled_object, Manifest};
use crate::cluster::ResourceKind;

/// CPU/memory requests and limits of a job container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResources {
    pub cpu_request: String,
    pub memory_request: String,
    pub cpu_limit: String,
    pub memory_limit: String,
}

impl JobResources {
    /// Sizing for the sandbox harness jobs.
    #[must_use]
    pub fn sandbox(memory_limit: &str) -> Self {
        Self {
            cpu_request: "100m".to_string(),
            memory_request: "256Mi".to_string(),
            cpu_limit: "1".to_string(),
            memory_limit: memory_limit.to_string(),
        }
    }

    fn to_value(&self) -> Value {
        json!({
            "requests": {"cpu": self.cpu_request, "memory": self.memory_request},
            "limits": {"cpu": self.cpu_limit, "memory": self.memory_limit},
        })
    }
}

/// Single-container job that runs once and is garbage-collected shortly
/// after it finishes.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub container: String,
    pub image: String,
    pub pull_policy: Option<String>,
    /// Shell script run with `/bin/sh -c`.
    pub script: String,
    pub env: Vec<(String, String)>,
    pub resources: Option<JobResources>,
    pub ttl_seconds: u64,
}

impl BatchJob {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        container: impl Into<String>,
        image: impl Into<String>,
        script: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
            container: container.into(),
            image: image.into(),
            pull_policy: None,
            script: script.into(),
            env: Vec::new(),
            resources: None,
            ttl_seconds: 60,
        }
    }

    #[must_use]
    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.push((key.to_string(), value.into()));
        self
    }

    #[must_use]
    pub fn pull_policy(mut self, policy: &str) -> Self {
        self.pull_policy = Some(policy.to_string());
        self
    }

    #[must_use]
    pub fn resources(mut self, resources: JobResources) -> Self {
        self.resources = Some(resources);
        self
    }

    #[must_use]
    pub fn ttl_seconds(mut self, ttl: u64) -> Self {
        self.ttl_seconds = ttl;
        self
    }

    /// Job that publishes one injected event onto `topic` with `kcat`.
    #[must_use]
    pub fn kick(
        name: String,
        namespace: &str,
        image: &str,
        bootstrap: &str,
        topic: &str,
        envelope: &CloudEventEnvelope,
    ) -> Self {
        Self::new(name, namespace, "kcat", image, kick_script(bootstrap, topic, envelope))
            .label(LABEL_FLOW_ID, topic)
    }

    /// Job that dumps the most recent `count` messages of `topic`.
    #[must_use]
    pub fn probe(
        name: String,
        namespace: &str,
        image: &str,
        bootstrap: &str,
        topic: &str,
        count: u32,
    ) -> Self {
        Self::new(name, namespace, "kcat", image, probe_script(bootstrap, topic, count))
            .label(LABEL_FLOW_ID, topic)
    }

    /// Job running an inline Python harness read from stdin.
    #[must_use]
    pub fn python_harness(
        name: String,
        namespace: &str,
        container: &str,
        image: &str,
        harness: &str,
    ) -> Self {
        let script = format!("python -u - <<'PY'\n{harness}\nPY");
        Self::new(name, namespace, container, image, script)
    }
}

impl Manifest for BatchJob {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Job
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn to_object(&self) -> DynamicObject {
        let env: Vec<Value> = self
            .env
            .iter()
            .map(|(k, v)| json!({"name": k, "value": v}))
            .collect();

        let mut container = json!({
            "name": self.container,
            "image": self.image,
            "command": ["/bin/sh", "-c"],
            "args": [self.script],
        });
        if !env.is_empty() {
            container["env"] = Value::Array(env);
        }
        if let Some(policy) = &self.pull_policy {
            container["imagePullPolicy"] = Value::String(policy.clone());
        }
        if let Some(resources) = &self.resources {
            container["resources"] = resources.to_value();
        }

        let mut obj = labeled_object(self.kind(), &self.namespace, &self.name, self.labels.clone());
        obj.data = json!({
            "spec": {
                "backoffLimit": 0,
                "ttlSecondsAfterFinished": self.ttl_seconds,
                "template": {
                    "spec": {
                        "restartPolicy": "Never",
                        "containers": [container],
                    }
                }
            }
        });
        obj
    }
}

/// Single-quote `value` for `/bin/sh`.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn kick_script(bootstrap: &str, topic: &str, envelope: &CloudEventEnvelope) -> String {
    let payload = if envelope.data.is_empty() {
        r#"{"kick":true}"#.to_string()
    } else {
        Value::Object(envelope.data.clone()).to_string()
    };
    let mut script = format!(
        "echo {} | kcat -P -b {} -t {}",
        shell_quote(&payload),
        shell_quote(bootstrap),
        shell_quote(topic)
    );
    for (key, value) in envelope.kafka_headers() {
        script.push_str(" \\\n  -H ");
        script.push_str(&shell_quote(&format!("{key}={value}")));
    }
    script.push_str(&format!(
        "\necho {} >&2",
        shell_quote(&format!("[KICK] sent to {topic} (ce_type={})", envelope.event_type))
    ));
    script
}

fn probe_script(bootstrap: &str, topic: &str, count: u32) -> String {
    format!(
        "kcat -C -b {} -t {} -o -{count} -e -q -c {count} -f {} || true",
        shell_quote(bootstrap),
        shell_quote(topic),
        shell_quote(r"ts=%T key=%k headers=%h payload=%s\n"),
    )
}
