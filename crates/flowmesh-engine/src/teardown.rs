//! Best-effort removal of everything a flow deployed.

use flowmesh_types::ids::FlowId;
use flowmesh_types::outcome::TeardownReport;
use kube::ResourceExt;
use tracing::{info, warn};

use crate::cluster::{ClusterClient, ResourceKind};
use crate::resources::FlowNames;

/// Kinds deleted by label selector, in order.
const LABELED_KINDS: [ResourceKind; 4] = [
    ResourceKind::KnativeService,
    ResourceKind::ConfigMap,
    ResourceKind::Job,
    ResourceKind::KafkaSource,
];

/// Delete a flow's labeled resources and sink in `namespace`, then its
/// topic in `topic_namespace`.
///
/// Never fails: problems become warnings on the report. Objects that are
/// already gone are not reported.
pub async fn teardown_flow(
    cluster: &dyn ClusterClient,
    flow: &FlowId,
    namespace: &str,
    topic_namespace: &str,
) -> TeardownReport {
    let names = FlowNames::new(flow);
    let selector = names.selector();
    let mut report = TeardownReport {
        flow_id: flow.to_string(),
        namespace: namespace.to_string(),
        topic_namespace: topic_namespace.to_string(),
        ..TeardownReport::default()
    };

    for kind in LABELED_KINDS {
        let items = match cluster.list(kind, namespace, &selector).await {
            Ok(items) => items,
            Err(e) => {
                report.warnings.push(format!("list {kind} failed: {e}"));
                continue;
            }
        };
        let mut deleted = 0;
        for name in items.iter().map(ResourceExt::name_any) {
            match cluster.delete(kind, namespace, &name).await {
                Ok(()) => deleted += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => report.warnings.push(format!("delete {kind} {name} failed: {e}")),
            }
        }
        if deleted > 0 {
            report.deleted.insert(kind.to_string(), deleted);
        }
    }

    match cluster.delete(ResourceKind::KafkaSink, namespace, &names.sink()).await {
        Ok(()) => {
            report.deleted.insert(ResourceKind::KafkaSink.to_string(), 1);
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => report.warnings.push(format!("delete KafkaSink {} failed: {e}", names.sink())),
    }

    match cluster
        .delete(ResourceKind::KafkaTopic, topic_namespace, &names.topic())
        .await
    {
        Ok(()) => report.topic_deleted = true,
        Err(e) if e.is_not_found() => {}
        Err(e) => report.warnings.push(format!("delete KafkaTopic {} failed: {e}", names.topic())),
    }

    for warning in &report.warnings {
        warn!(flow_id = %flow, namespace, warning = %warning, "Teardown warning");
    }
    info!(
        flow_id = %flow,
        namespace,
        deleted = report.total_deleted(),
        "Flow torn down"
    );
    report
}
