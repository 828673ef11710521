//! In-process [`ClusterClient`] with scriptable behavior.
//!
//! Objects live in a map keyed by kind, namespace, and name. Custom
//! resources become Ready on write unless auto-readiness is turned off.
//! Jobs finish immediately according to the first [`JobScript`] whose
//! prefix matches their name, and get a pod carrying the scripted logs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::json;

use super::{selector_matches, ClusterClient, ClusterError, LogQuery, ResourceKind};

/// Outcome assigned to jobs whose name starts with a given prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobScript {
    pub succeeded: bool,
    pub logs: String,
}

impl JobScript {
    pub fn succeed(logs: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            logs: logs.into(),
        }
    }

    pub fn fail(logs: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            logs: logs.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct FakePod {
    namespace: String,
    name: String,
    labels: BTreeMap<String, String>,
    logs: String,
}

type ObjectKey = (ResourceKind, String, String);

#[derive(Debug)]
struct State {
    namespaces: BTreeSet<String>,
    objects: BTreeMap<ObjectKey, DynamicObject>,
    pods: Vec<FakePod>,
    job_scripts: Vec<(String, JobScript)>,
    reject_replace: BTreeMap<ResourceKind, String>,
    fail_create: BTreeMap<ResourceKind, String>,
    auto_ready: bool,
    next_uid: u64,
    calls: Vec<String>,
}

/// Fake cluster for tests and offline runs.
#[derive(Debug)]
pub struct InMemoryCluster {
    state: Mutex<State>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                namespaces: BTreeSet::new(),
                objects: BTreeMap::new(),
                pods: Vec::new(),
                job_scripts: Vec::new(),
                reject_replace: BTreeMap::new(),
                fail_create: BTreeMap::new(),
                auto_ready: true,
                next_uid: 1,
                calls: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, ClusterError> {
        self.state
            .lock()
            .map_err(|_| ClusterError::Config("in-memory cluster lock poisoned".to_string()))
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> Option<R> {
        self.lock().ok().map(|mut state| f(&mut state))
    }

    /// Turn automatic readiness of custom resources on or off.
    #[must_use]
    pub fn with_auto_ready(self, auto_ready: bool) -> Self {
        self.with_state(|s| s.auto_ready = auto_ready);
        self
    }

    /// Script the outcome of every job whose name starts with `prefix`.
    pub fn script_job(&self, prefix: impl Into<String>, script: JobScript) {
        let prefix = prefix.into();
        self.with_state(|s| s.job_scripts.push((prefix, script)));
    }

    /// Make every replace of `kind` fail with a 422 carrying `message`.
    pub fn reject_replace(&self, kind: ResourceKind, message: impl Into<String>) {
        let message = message.into();
        self.with_state(|s| s.reject_replace.insert(kind, message));
    }

    /// Make every create of `kind` fail with a 500 carrying `message`.
    pub fn fail_create(&self, kind: ResourceKind, message: impl Into<String>) {
        let message = message.into();
        self.with_state(|s| s.fail_create.insert(kind, message));
    }

    /// Add (or replace) a pod with the given labels and log text.
    pub fn add_pod(&self, namespace: &str, name: &str, labels: &[(&str, &str)], logs: &str) {
        let pod = FakePod {
            namespace: namespace.to_string(),
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            logs: logs.to_string(),
        };
        self.with_state(|s| {
            s.pods.retain(|p| !(p.namespace == namespace && p.name == name));
            s.pods.push(pod);
        });
    }

    /// Mark an object Ready or not Ready.
    pub fn set_ready(&self, kind: ResourceKind, namespace: &str, name: &str, ready: bool) {
        let key = (kind, namespace.to_string(), name.to_string());
        self.with_state(|s| {
            if let Some(obj) = s.objects.get_mut(&key) {
                mark_ready(obj, ready);
            }
        });
    }

    /// Every mutating call made so far, as `verb Kind namespace/name`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.with_state(|s| s.calls.clone()).unwrap_or_default()
    }

    /// Objects of one kind in one namespace.
    #[must_use]
    pub fn objects(&self, kind: ResourceKind, namespace: &str) -> Vec<DynamicObject> {
        self.with_state(|s| {
            s.objects
                .iter()
                .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
                .map(|(_, obj)| obj.clone())
                .collect()
        })
        .unwrap_or_default()
    }

    #[must_use]
    pub fn object(&self, kind: ResourceKind, namespace: &str, name: &str) -> Option<DynamicObject> {
        let key = (kind, namespace.to_string(), name.to_string());
        self.with_state(|s| s.objects.get(&key).cloned()).flatten()
    }

    #[must_use]
    pub fn has_namespace(&self, name: &str) -> bool {
        self.with_state(|s| s.namespaces.contains(name))
            .unwrap_or(false)
    }
}

fn mark_ready(obj: &mut DynamicObject, ready: bool) {
    let status = if ready { "True" } else { "False" };
    obj.data["status"] = json!({
        "conditions": [{"type": "Ready", "status": status}]
    });
}

impl State {
    fn stored(&mut self, kind: ResourceKind, namespace: &str, object: &DynamicObject) -> DynamicObject {
        let mut obj = object.clone();
        obj.metadata.namespace = Some(namespace.to_string());
        if obj.metadata.uid.is_none() {
            obj.metadata.uid = Some(format!("uid-{}", self.next_uid));
            self.next_uid += 1;
        }
        obj.metadata.resource_version = Some(self.next_uid.to_string());
        if kind.has_ready_condition() {
            mark_ready(&mut obj, self.auto_ready);
        }
        obj
    }

    fn run_job(&mut self, namespace: &str, obj: &mut DynamicObject) {
        let name = obj.name_any();
        let Some((_, script)) = self
            .job_scripts
            .iter()
            .find(|(prefix, _)| name.starts_with(prefix.as_str()))
        else {
            return;
        };
        let script = script.clone();
        obj.data["status"] = if script.succeeded {
            json!({"succeeded": 1})
        } else {
            json!({"failed": 1})
        };
        self.pods.push(FakePod {
            namespace: namespace.to_string(),
            name: format!("{name}-pod"),
            labels: [("job-name".to_string(), name)].into_iter().collect(),
            logs: script.logs,
        });
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn ensure_namespace(&self, name: &str) -> Result<bool, ClusterError> {
        let mut state = self.lock()?;
        state.calls.push(format!("ensure Namespace {name}"));
        Ok(state.namespaces.insert(name.to_string()))
    }

    async fn create(
        &self,
        kind: ResourceKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError> {
        let name = object.name_any();
        let mut state = self.lock()?;
        state.calls.push(format!("create {kind} {namespace}/{name}"));
        if let Some(message) = state.fail_create.get(&kind) {
            return Err(ClusterError::rejected(kind, name, 500, "InternalError", message.clone()));
        }
        let key = (kind, namespace.to_string(), name.clone());
        if state.objects.contains_key(&key) {
            return Err(ClusterError::already_exists(kind, name));
        }
        let mut obj = state.stored(kind, namespace, object);
        if kind == ResourceKind::Job {
            state.run_job(namespace, &mut obj);
        }
        state.objects.insert(key, obj.clone());
        Ok(obj)
    }

    async fn replace(
        &self,
        kind: ResourceKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError> {
        let name = object.name_any();
        let mut state = self.lock()?;
        state.calls.push(format!("replace {kind} {namespace}/{name}"));
        if let Some(message) = state.reject_replace.get(&kind) {
            return Err(ClusterError::rejected(kind, name, 422, "Invalid", message.clone()));
        }
        let key = (kind, namespace.to_string(), name.clone());
        let Some(existing_uid) = state.objects.get(&key).map(|o| o.metadata.uid.clone()) else {
            return Err(ClusterError::not_found(kind, name));
        };
        let mut desired = object.clone();
        desired.metadata.uid = existing_uid;
        let obj = state.stored(kind, namespace, &desired);
        state.objects.insert(key, obj.clone());
        Ok(obj)
    }

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, ClusterError> {
        let state = self.lock()?;
        let key = (kind, namespace.to_string(), name.to_string());
        Ok(state.objects.get(&key).cloned())
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        let state = self.lock()?;
        Ok(state
            .objects
            .iter()
            .filter(|((k, ns, _), obj)| {
                *k == kind
                    && ns == namespace
                    && selector_matches(label_selector, obj.metadata.labels.as_ref())
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let mut state = self.lock()?;
        state.calls.push(format!("delete {kind} {namespace}/{name}"));
        let key = (kind, namespace.to_string(), name.to_string());
        if state.objects.remove(&key).is_none() {
            return Err(ClusterError::not_found(kind, name));
        }
        if kind == ResourceKind::Job {
            state.pods.retain(|p| {
                !(p.namespace == namespace && p.labels.get("job-name").map(String::as_str) == Some(name))
            });
        }
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<String>, ClusterError> {
        let state = self.lock()?;
        Ok(state
            .pods
            .iter()
            .filter(|p| p.namespace == namespace && selector_matches(label_selector, Some(&p.labels)))
            .map(|p| p.name.clone())
            .collect())
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, query: &LogQuery) -> Result<String, ClusterError> {
        let state = self.lock()?;
        let found = state
            .pods
            .iter()
            .find(|p| p.namespace == namespace && p.name == pod)
            .ok_or_else(|| ClusterError::not_found(ResourceKind::Pod, pod))?;
        Ok(match query.tail_lines {
            Some(n) => {
                let lines: Vec<&str> = found.logs.lines().collect();
                let keep = usize::try_from(n).unwrap_or(0).min(lines.len());
                let mut tail = lines[lines.len() - keep..].join("\n");
                if keep > 0 {
                    tail.push('\n');
                }
                tail
            }
            None => found.logs.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labeled(kind: ResourceKind, ns: &str, name: &str, flow: &str) -> DynamicObject {
        let mut obj = kind.object(ns, name);
        obj.metadata.labels = Some([("flow_id".to_string(), flow.to_string())].into_iter().collect());
        obj
    }

    #[tokio::test]
    async fn test_create_then_conflict() {
        let cluster = InMemoryCluster::new();
        let obj = labeled(ResourceKind::ConfigMap, "ns", "cm", "1");
        cluster.create(ResourceKind::ConfigMap, "ns", &obj).await.unwrap();
        let err = cluster
            .create(ResourceKind::ConfigMap, "ns", &obj)
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_custom_resources_become_ready() {
        let cluster = InMemoryCluster::new();
        let obj = labeled(ResourceKind::KafkaSink, "ns", "sink-1", "1");
        let stored = cluster.create(ResourceKind::KafkaSink, "ns", &obj).await.unwrap();
        assert!(super::super::is_ready(&stored));

        let lazy = InMemoryCluster::new().with_auto_ready(false);
        let stored = lazy.create(ResourceKind::KafkaSink, "ns", &obj).await.unwrap();
        assert!(!super::super::is_ready(&stored));
    }

    #[tokio::test]
    async fn test_scripted_job_gets_pod_and_logs() {
        let cluster = InMemoryCluster::new();
        cluster.script_job("preflight-", JobScript::succeed("OK\n"));
        let job = ResourceKind::Job.object("ns", "preflight-flow1-abc");
        let stored = cluster.create(ResourceKind::Job, "ns", &job).await.unwrap();
        assert_eq!(stored.data["status"]["succeeded"], 1);

        let pods = cluster
            .list_pods("ns", "job-name=preflight-flow1-abc")
            .await
            .unwrap();
        assert_eq!(pods.len(), 1);
        let logs = cluster
            .pod_logs("ns", &pods[0], &LogQuery::default())
            .await
            .unwrap();
        assert_eq!(logs, "OK\n");
    }

    #[tokio::test]
    async fn test_list_by_selector_and_delete() {
        let cluster = InMemoryCluster::new();
        for (name, flow) in [("a", "1"), ("b", "1"), ("c", "2")] {
            cluster
                .create(ResourceKind::KnativeService, "ns", &labeled(ResourceKind::KnativeService, "ns", name, flow))
                .await
                .unwrap();
        }
        let listed = cluster
            .list(ResourceKind::KnativeService, "ns", "flow_id=1")
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);

        cluster.delete(ResourceKind::KnativeService, "ns", "a").await.unwrap();
        assert!(cluster
            .delete(ResourceKind::KnativeService, "ns", "a")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_tail_lines() {
        let cluster = InMemoryCluster::new();
        cluster.add_pod("ns", "p", &[("app", "x")], "one\ntwo\nthree\n");
        let tail = cluster
            .pod_logs("ns", "p", &LogQuery::container("app", 2))
            .await
            .unwrap();
        assert_eq!(tail, "two\nthree\n");
    }

    #[tokio::test]
    async fn test_reject_replace() {
        let cluster = InMemoryCluster::new();
        let obj = labeled(ResourceKind::KnativeService, "ns", "svc", "1");
        cluster.create(ResourceKind::KnativeService, "ns", &obj).await.unwrap();
        cluster.reject_replace(ResourceKind::KnativeService, "annotation value is immutable");
        let err = cluster
            .replace(ResourceKind::KnativeService, "ns", &obj)
            .await
            .unwrap_err();
        assert!(err.is_immutable_annotation());
    }
}
