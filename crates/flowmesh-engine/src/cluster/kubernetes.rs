//! [`ClusterClient`] backed by a live API server through `kube`.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, LogParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::{debug, info};

use super::{ClusterClient, ClusterError, LogQuery, ResourceKind};

/// Real cluster client.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic(&self, kind: ResourceKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource())
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn ensure_namespace(&self, name: &str) -> Result<bool, ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.get_opt(name).await? {
            Some(_) => {
                debug!(namespace = %name, "namespace already exists");
                Ok(false)
            }
            None => {
                let ns = Namespace {
                    metadata: ObjectMeta {
                        name: Some(name.to_string()),
                        ..Default::default()
                    },
                    ..Default::default()
                };
                match api.create(&PostParams::default(), &ns).await {
                    Ok(_) => {
                        info!(namespace = %name, "namespace created");
                        Ok(true)
                    }
                    // Lost a race with a concurrent request.
                    Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    async fn create(
        &self,
        kind: ResourceKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError> {
        let name = object.name_any();
        self.dynamic(kind, namespace)
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| ClusterError::from_kube(kind, &name, e))
    }

    async fn replace(
        &self,
        kind: ResourceKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError> {
        let name = object.name_any();
        let api = self.dynamic(kind, namespace);
        let current = api
            .get(&name)
            .await
            .map_err(|e| ClusterError::from_kube(kind, &name, e))?;

        let mut desired = object.clone();
        desired.metadata.resource_version = current.metadata.resource_version;
        api.replace(&name, &PostParams::default(), &desired)
            .await
            .map_err(|e| ClusterError::from_kube(kind, &name, e))
    }

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, ClusterError> {
        self.dynamic(kind, namespace)
            .get_opt(name)
            .await
            .map_err(|e| ClusterError::from_kube(kind, name, e))
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        let list = self
            .dynamic(kind, namespace)
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| ClusterError::from_kube(kind, label_selector, e))?;
        Ok(list.items)
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let params = if kind == ResourceKind::Job {
            DeleteParams::background()
        } else {
            DeleteParams::default()
        };
        self.dynamic(kind, namespace)
            .delete(name, &params)
            .await
            .map(|_| ())
            .map_err(|e| ClusterError::from_kube(kind, name, e))
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<String>, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(pods.items.iter().map(ResourceExt::name_any).collect())
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, query: &LogQuery) -> Result<String, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: query.container.clone(),
            tail_lines: query.tail_lines,
            ..LogParams::default()
        };
        api.logs(pod, &params)
            .await
            .map_err(|e| ClusterError::from_kube(ResourceKind::Pod, pod, e))
    }
}
