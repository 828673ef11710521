//! Converging the cluster onto a flow's desired resources.

use std::collections::BTreeSet;
use std::time::Duration;

use flowmesh_types::event_type::PipelineEventType;
use flowmesh_types::ids::FlowId;
use flowmesh_types::step::StepSpec;
use tracing::{info, warn};

use crate::cluster::{ClusterClient, ClusterError};
use crate::config::FlowmeshConfig;
use crate::errors::FlowError;
use crate::resources::names::sink_url;
use crate::resources::{CodeConfigMap, FlowSink, FlowTopic, Manifest, StepService, StepSource};

/// Pause between deleting a service and recreating it.
const RECREATE_PAUSE: Duration = Duration::from_millis(500);

/// Create `manifest`, or replace it if it already exists.
///
/// # Errors
///
/// Returns the API error of the create or replace call.
pub async fn create_or_replace(cluster: &dyn ClusterClient, manifest: &dyn Manifest) -> Result<(), ClusterError> {
    let object = manifest.to_object();
    match cluster.create(manifest.kind(), manifest.namespace(), &object).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_already_exists() => cluster
            .replace(manifest.kind(), manifest.namespace(), &object)
            .await
            .map(|_| ()),
        Err(e) => Err(e),
    }
}

/// Like [`create_or_replace`], but when the replace is refused because a
/// template annotation is immutable, delete the object and create it anew.
///
/// # Errors
///
/// Returns the API error of the last call attempted.
pub async fn create_or_recreate(cluster: &dyn ClusterClient, manifest: &dyn Manifest) -> Result<(), ClusterError> {
    match create_or_replace(cluster, manifest).await {
        Err(e) if e.is_immutable_annotation() => {
            let kind = manifest.kind();
            let name = manifest.name();
            warn!(%kind, name = %name, "Replace refused on immutable annotation; recreating");
            cluster.delete(kind, manifest.namespace(), &name).await?;
            tokio::time::sleep(RECREATE_PAUSE).await;
            cluster
                .create(kind, manifest.namespace(), &manifest.to_object())
                .await
                .map(|_| ())
        }
        other => other,
    }
}

/// Names of the step resources a successful provision left in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliveSet {
    pub services: BTreeSet<String>,
    pub sources: BTreeSet<String>,
}

/// Builds the desired manifests for a flow and pushes them to the cluster.
pub struct Provisioner<'a> {
    cluster: &'a dyn ClusterClient,
    config: &'a FlowmeshConfig,
}

impl<'a> Provisioner<'a> {
    #[must_use]
    pub fn new(cluster: &'a dyn ClusterClient, config: &'a FlowmeshConfig) -> Self {
        Self { cluster, config }
    }

    #[must_use]
    pub fn topic(&self, flow: &FlowId) -> FlowTopic {
        let kafka = &self.config.kafka;
        FlowTopic {
            flow: flow.clone(),
            namespace: kafka.namespace.clone(),
            cluster: kafka.cluster.clone(),
            partitions: kafka.topic_partitions,
            replicas: kafka.topic_replicas,
        }
    }

    #[must_use]
    pub fn sink(&self, flow: &FlowId, namespace: &str) -> FlowSink {
        FlowSink {
            flow: flow.clone(),
            namespace: namespace.to_string(),
            bootstrap: self.config.kafka.bootstrap_servers(),
        }
    }

    /// Service manifest for step `step` of a flow with `total` steps.
    #[must_use]
    pub fn service(&self, flow: &FlowId, namespace: &str, step: &StepSpec, total: usize) -> StepService {
        let out_type = PipelineEventType::output_of(flow, step.index, total);
        let sink = out_type.as_ref().map(|_| sink_url(namespace, flow));
        StepService {
            flow: flow.clone(),
            namespace: namespace.to_string(),
            step: step.name.clone(),
            code: step.code.clone(),
            in_type: PipelineEventType::input_of(flow, step.index),
            out_type,
            sink_url: sink,
            max_scale: step.max_scale,
            image: self.config.images.sandbox.clone(),
            pull_policy: self.config.images.pull_policy.clone(),
            command: self.config.runtime.command.clone(),
            port: self.config.runtime.port,
        }
    }

    /// Apply topic, sink, and per step the code, service, and source.
    ///
    /// Stops at the first failure; resources applied before it stay.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Provision`] naming the resource that failed.
    pub async fn provision(&self, flow: &FlowId, namespace: &str, steps: &[StepSpec]) -> Result<AliveSet, FlowError> {
        self.apply(&self.topic(flow), false).await?;
        self.apply(&self.sink(flow, namespace), false).await?;

        let mut alive = AliveSet::default();
        for step in steps {
            let config_map = CodeConfigMap {
                flow: flow.clone(),
                namespace: namespace.to_string(),
                step: step.name.clone(),
                code: step.code.clone(),
            };
            self.apply(&config_map, false).await?;

            let service = self.service(flow, namespace, step, steps.len());
            self.apply(&service, true).await?;
            alive.services.insert(service.name());

            let source = StepSource {
                flow: flow.clone(),
                namespace: namespace.to_string(),
                step: step.name.clone(),
                bootstrap: self.config.kafka.bootstrap_servers(),
            };
            self.apply(&source, false).await?;
            alive.sources.insert(source.name());
        }

        info!(
            flow_id = %flow,
            namespace,
            steps = steps.len(),
            "Flow resources applied"
        );
        Ok(alive)
    }

    async fn apply(&self, manifest: &dyn Manifest, recreate_on_immutable: bool) -> Result<(), FlowError> {
        let result = if recreate_on_immutable {
            create_or_recreate(self.cluster, manifest).await
        } else {
            create_or_replace(self.cluster, manifest).await
        };
        result.map_err(|source| FlowError::Provision {
            kind: manifest.kind(),
            name: manifest.name(),
            source,
        })
    }
}
