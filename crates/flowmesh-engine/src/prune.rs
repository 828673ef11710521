//! Removal of step resources left over from earlier versions of a flow.

use flowmesh_types::ids::FlowId;
use kube::ResourceExt;
use tracing::{info, warn};

use crate::cluster::{ClusterClient, ResourceKind};
use crate::provision::AliveSet;
use crate::resources::FlowNames;

/// Names deleted by one prune pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub services: Vec<String>,
    pub sources: Vec<String>,
}

impl PruneReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.sources.is_empty()
    }
}

/// Delete the flow's services and sources that are not in `alive`.
///
/// Best effort: list and delete failures are logged and skipped.
pub async fn prune_stale(
    cluster: &dyn ClusterClient,
    flow: &FlowId,
    namespace: &str,
    alive: &AliveSet,
) -> PruneReport {
    let selector = FlowNames::new(flow).selector();
    let mut report = PruneReport::default();
    for (kind, keep, deleted) in [
        (ResourceKind::KnativeService, &alive.services, &mut report.services),
        (ResourceKind::KafkaSource, &alive.sources, &mut report.sources),
    ] {
        let existing = match cluster.list(kind, namespace, &selector).await {
            Ok(items) => items,
            Err(e) => {
                warn!(flow_id = %flow, %kind, error = %e, "Prune listing failed");
                continue;
            }
        };
        for name in existing.iter().map(ResourceExt::name_any) {
            if name.is_empty() || keep.contains(&name) {
                continue;
            }
            match cluster.delete(kind, namespace, &name).await {
                Ok(()) => deleted.push(name),
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(flow_id = %flow, %kind, name = %name, error = %e, "Prune delete failed"),
            }
        }
    }
    if !report.is_empty() {
        info!(
            flow_id = %flow,
            services = ?report.services,
            sources = ?report.sources,
            "Pruned stale step resources"
        );
    }
    report
}
