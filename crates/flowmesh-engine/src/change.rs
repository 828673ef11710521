//! Skip-if-unchanged decision for re-deploys.

use flowmesh_types::event_type::PipelineEventType;
use flowmesh_types::ids::FlowId;
use flowmesh_types::step::StepSpec;
use tracing::debug;

use crate::cluster::{template_annotation, ClusterClient, ResourceKind};
use crate::resources::names::{code_hash, ANNOTATION_CODE_HASH, ANNOTATION_WIRING};
use crate::resources::service::wiring;
use crate::resources::FlowNames;

/// Why a step needs provisioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepChange {
    /// No service exists, or it could not be read.
    Missing,
    CodeChanged,
    WiringChanged,
}

/// Compare each step against its deployed service.
///
/// Returns the steps that differ, paired with the reason. Empty means
/// the flow is unchanged.
pub async fn changed_steps(
    cluster: &dyn ClusterClient,
    flow: &FlowId,
    namespace: &str,
    steps: &[StepSpec],
) -> Vec<(String, StepChange)> {
    let names = FlowNames::new(flow);
    let mut changed = Vec::new();
    for step in steps {
        let service = names.service(&step.name);
        let existing = match cluster.get(ResourceKind::KnativeService, namespace, &service).await {
            Ok(Some(obj)) => obj,
            Ok(None) => {
                changed.push((step.name.clone(), StepChange::Missing));
                continue;
            }
            Err(e) => {
                debug!(service = %service, error = %e, "Service read failed; treating as changed");
                changed.push((step.name.clone(), StepChange::Missing));
                continue;
            }
        };

        let want_hash = code_hash(&step.code);
        if template_annotation(&existing, ANNOTATION_CODE_HASH) != Some(want_hash.as_str()) {
            changed.push((step.name.clone(), StepChange::CodeChanged));
            continue;
        }

        let want_wiring = wiring(
            &PipelineEventType::input_of(flow, step.index),
            PipelineEventType::output_of(flow, step.index, steps.len()).as_ref(),
        );
        if template_annotation(&existing, ANNOTATION_WIRING) != Some(want_wiring.as_str()) {
            changed.push((step.name.clone(), StepChange::WiringChanged));
        }
    }
    changed
}

/// Whether any step of the flow differs from what is deployed.
pub async fn flow_changed(cluster: &dyn ClusterClient, flow: &FlowId, namespace: &str, steps: &[StepSpec]) -> bool {
    let changed = changed_steps(cluster, flow, namespace, steps).await;
    if !changed.is_empty() {
        debug!(flow_id = %flow, changed = ?changed, "Flow differs from deployed state");
    }
    !changed.is_empty()
}
