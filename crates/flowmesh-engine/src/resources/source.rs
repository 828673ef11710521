use flowmesh_types::ids::FlowId;
use kube::api::DynamicObject;
use serde_json::json;

use super::names::{FlowNames, LABEL_FLOW_ID};
use super::{label_map, labeled_object, Manifest};
use crate::cluster::ResourceKind;

/// `KafkaSource` feeding the flow topic into one step's service.
#[derive(Debug, Clone)]
pub struct StepSource {
    pub flow: FlowId,
    pub namespace: String,
    pub step: String,
    pub bootstrap: String,
}

impl StepSource {
    #[must_use]
    pub fn consumer_group(&self) -> String {
        FlowNames::new(&self.flow).consumer_group(&self.step)
    }
}

impl Manifest for StepSource {
    fn kind(&self) -> ResourceKind {
        ResourceKind::KafkaSource
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn name(&self) -> String {
        FlowNames::new(&self.flow).source(&self.step)
    }

    fn to_object(&self) -> DynamicObject {
        let names = FlowNames::new(&self.flow);
        let service = ResourceKind::KnativeService.api_resource();
        let labels = label_map([(LABEL_FLOW_ID, self.flow.as_str())]);
        let mut obj = labeled_object(self.kind(), &self.namespace, &self.name(), labels);
        obj.data = json!({
            "spec": {
                "consumerGroup": self.consumer_group(),
                "initialOffset": "latest",
                "bootstrapServers": [self.bootstrap],
                "topics": [names.topic()],
                "sink": {
                    "ref": {
                        "apiVersion": service.api_version,
                        "kind": service.kind,
                        "name": names.service(&self.step),
                    }
                },
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
    fn test_source_binds_topic_to_service() {
        let src = StepSource {
            flow: FlowId::new("3"),
            namespace: "user-a".into(),
            step: "transform".into(),
            bootstrap: "broker:9092".into(),
        };
        let obj = src.to_object();
        assert_eq!(obj.name_any(), "source-3-to-flow3-transform");
        let spec = &obj.data["spec"];
        assert_eq!(spec["consumerGroup"], "cg-flow3-transform-v1");
        assert_eq!(spec["initialOffset"], "latest");
        assert_eq!(spec["topics"][0], "3");
        assert_eq!(spec["sink"]["ref"]["kind"], "Service");
        assert_eq!(spec["sink"]["ref"]["apiVersion"], "serving.knative.dev/v1");
        assert_eq!(spec["sink"]["ref"]["name"], "flow3-transform");
    }
}
