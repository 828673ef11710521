use flowmesh_types::ids::FlowId;
use kube::api::DynamicObject;
use serde_json::json;

use super::names::{FlowNames, LABEL_FLOW_ID};
use super::{label_map, labeled_object, Manifest};
use crate::cluster::ResourceKind;

/// Knative `KafkaSink` that step services publish into.
#[derive(Debug, Clone)]
pub struct FlowSink {
    pub flow: FlowId,
    pub namespace: String,
    pub bootstrap: String,
}

impl Manifest for FlowSink {
    fn kind(&self) -> ResourceKind {
        ResourceKind::KafkaSink
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn name(&self) -> String {
        FlowNames::new(&self.flow).sink()
    }

    fn to_object(&self) -> DynamicObject {
        let labels = label_map([(LABEL_FLOW_ID, self.flow.as_str())]);
        let mut obj = labeled_object(self.kind(), &self.namespace, &self.name(), labels);
        obj.data = json!({
            "spec": {
                "bootstrapServers": [self.bootstrap],
                "topic": FlowNames::new(&self.flow).topic(),
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
    fn test_sink_routes_to_flow_topic() {
        let sink = FlowSink {
            flow: FlowId::new("8"),
            namespace: "user-a".into(),
            bootstrap: "broker:9092".into(),
        };
        let obj = sink.to_object();
        assert_eq!(obj.name_any(), "sink-8");
        assert_eq!(obj.data["spec"]["topic"], "8");
        assert_eq!(obj.data["spec"]["bootstrapServers"][0], "broker:9092");
    }
}
