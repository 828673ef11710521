use flowmesh_types::ids::FlowId;
use kube::api::DynamicObject;
use serde_json::json;

use super::names::{FlowNames, LABEL_FLOW_ID, LABEL_STRIMZI_CLUSTER};
use super::{label_map, labeled_object, Manifest};
use crate::cluster::ResourceKind;

/// Strimzi topic shared by every step of a flow, named after the flow.
#[derive(Debug, Clone)]
pub struct FlowTopic {
    pub flow: FlowId,
    pub namespace: String,
    pub cluster: String,
    pub partitions: u32,
    pub replicas: u32,
}

impl Manifest for FlowTopic {
    fn kind(&self) -> ResourceKind {
        ResourceKind::KafkaTopic
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn name(&self) -> String {
        FlowNames::new(&self.flow).topic()
    }

    fn to_object(&self) -> DynamicObject {
        let labels = label_map([
            (LABEL_STRIMZI_CLUSTER, self.cluster.as_str()),
            (LABEL_FLOW_ID, self.flow.as_str()),
        ]);
        let mut obj = labeled_object(self.kind(), &self.namespace, &self.name(), labels);
        obj.data = json!({
            "spec": {
                "partitions": self.partitions,
                "replicas": self.replicas,
            }
        });
        obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::ResourceExt;

    #[test]
    fn test_topic_manifest() {
        let topic = FlowTopic {
            flow: FlowId::new("4"),
            namespace: "kafka".into(),
            cluster: "my-cluster".into(),
            partitions: 1,
            replicas: 3,
        };
        let obj = topic.to_object();
        assert_eq!(obj.name_any(), "4");
        assert_eq!(obj.namespace().as_deref(), Some("kafka"));
        assert_eq!(obj.labels()["strimzi.io/cluster"], "my-cluster");
        assert_eq!(obj.labels()["flow_id"], "4");
        assert_eq!(obj.data["spec"]["replicas"], 3);
        assert_eq!(obj.types.unwrap().api_version, "kafka.strimzi.io/v1beta2");
    }
}
