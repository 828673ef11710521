use flowmesh_types::contract::{DEDUP_WINDOW, MAX_HOPS};
use flowmesh_types::event_type::PipelineEventType;
use flowmesh_types::ids::FlowId;
use kube::api::DynamicObject;
use serde_json::{json, Map, Value};

use super::names::{
    code_hash, FlowNames, ANNOTATION_CODE_HASH, ANNOTATION_MAX_SCALE, ANNOTATION_MIN_SCALE,
    ANNOTATION_WIRING, CODE_KEY, LABEL_APP, LABEL_FLOW_ID,
};
use super::{label_map, labeled_object, Manifest};
use crate::cluster::ResourceKind;

/// Name of the step container inside each service revision.
pub const SERVICE_CONTAINER: &str = "app";
const CODE_MOUNT: &str = "/code";

/// Value of the wiring annotation: `<in>|<out or ->`.
#[must_use]
pub fn wiring(in_type: &PipelineEventType, out_type: Option<&PipelineEventType>) -> String {
    format!(
        "{}|{}",
        in_type,
        out_type.map_or("-", PipelineEventType::as_str)
    )
}

/// Knative Service running one step's handler.
#[derive(Debug, Clone)]
pub struct StepService {
    pub flow: FlowId,
    pub namespace: String,
    pub step: String,
    pub code: String,
    pub in_type: PipelineEventType,
    /// `None` for the terminal step.
    pub out_type: Option<PipelineEventType>,
    /// Where emitted events are posted; `None` for the terminal step.
    pub sink_url: Option<String>,
    pub max_scale: u8,
    pub image: String,
    pub pull_policy: String,
    pub command: Vec<String>,
    pub port: u16,
}

impl StepService {
    #[must_use]
    pub fn code_hash(&self) -> String {
        code_hash(&self.code)
    }

    #[must_use]
    pub fn wiring(&self) -> String {
        wiring(&self.in_type, self.out_type.as_ref())
    }

    fn env(&self) -> Vec<Value> {
        let out_type = self.out_type.as_ref().map_or("", PipelineEventType::as_str);
        let mut env = vec![
            json!({"name": "FLOW_ID", "value": self.flow.as_str()}),
            json!({"name": "APP_ID", "value": self.step}),
            json!({"name": "IN_TYPES", "value": self.in_type.as_str()}),
            json!({"name": "OUT_TYPE", "value": out_type}),
            json!({"name": "MAX_HOPS", "value": MAX_HOPS.to_string()}),
            json!({"name": "DEDUPE_WINDOW_SEC", "value": DEDUP_WINDOW.as_secs().to_string()}),
        ];
        if let Some(url) = &self.sink_url {
            env.push(json!({"name": "K_SINK", "value": url}));
        }
        env
    }
}

impl Manifest for StepService {
    fn kind(&self) -> ResourceKind {
        ResourceKind::KnativeService
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn name(&self) -> String {
        FlowNames::new(&self.flow).service(&self.step)
    }

    fn to_object(&self) -> DynamicObject {
        let name = self.name();
        let labels = label_map([(LABEL_APP, name.as_str()), (LABEL_FLOW_ID, self.flow.as_str())]);

        let mut annotations = Map::new();
        annotations.insert(ANNOTATION_CODE_HASH.into(), self.code_hash().into());
        annotations.insert(ANNOTATION_WIRING.into(), self.wiring().into());
        annotations.insert(ANNOTATION_MIN_SCALE.into(), "1".into());
        annotations.insert(ANNOTATION_MAX_SCALE.into(), self.max_scale.to_string().into());

        let mut obj = labeled_object(self.kind(), &self.namespace, &name, labels.clone());
        obj.data = json!({
            "spec": {
                "template": {
                    "metadata": {
                        "annotations": annotations,
                        "labels": labels,
                    },
                    "spec": {
                        "containers": [{
                            "name": SERVICE_CONTAINER,
                            "image": self.image,
                            "imagePullPolicy": self.pull_policy,
                            "command": self.command,
                            "ports": [{"containerPort": self.port}],
                            "env": self.env(),
                            "volumeMounts": [
                                {"name": "usercode", "mountPath": CODE_MOUNT, "readOnly": true},
                                {"name": "tmp", "mountPath": "/tmp"},
                            ],
                        }],
                        "volumes": [
                            {
                                "name": "usercode",
                                "configMap": {
                                    "name": FlowNames::new(&self.flow).config_map(&self.step),
                                    "items": [{"key": CODE_KEY, "path": CODE_KEY}],
                                },
                            },
                            {"name": "tmp", "emptyDir": {}},
                        ],
                    },
                },
            }
        });
        obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::template_annotation;
    use kube::ResourceExt;

    fn service(out: bool) -> StepService {
        let flow = FlowId::new("5");
        StepService {
            in_type: PipelineEventType::kick(&flow),
            out_type: out.then(|| PipelineEventType::output_of(&flow, 0, 2)).flatten(),
            sink_url: out.then(|| "http://sink".to_string()),
            flow,
            namespace: "user-a".into(),
            step: "ingest".into(),
            code: "def handle(evt):\n    return evt\n".into(),
            max_scale: 3,
            image: "sandbox:1".into(),
            pull_policy: "IfNotPresent".into(),
            command: vec!["python".into(), "-u".into(), "/opt/flowmesh/runner.py".into()],
            port: 8080,
        }
    }

    fn env_value<'a>(obj: &'a DynamicObject, name: &str) -> Option<&'a str> {
        obj.data["spec"]["template"]["spec"]["containers"][0]["env"]
            .as_array()?
            .iter()
            .find(|e| e["name"] == name)?["value"]
            .as_str()
    }

    #[test]
    fn test_annotations_and_labels() {
        let svc = service(true);
        let obj = svc.to_object();
        assert_eq!(obj.name_any(), "flow5-ingest");
        assert_eq!(obj.labels()["app"], "flow5-ingest");
        assert_eq!(template_annotation(&obj, ANNOTATION_CODE_HASH), Some(svc.code_hash().as_str()));
        assert_eq!(template_annotation(&obj, ANNOTATION_MAX_SCALE), Some("3"));
        assert_eq!(template_annotation(&obj, ANNOTATION_MIN_SCALE), Some("1"));
        assert_eq!(template_annotation(&obj, ANNOTATION_WIRING), Some("flow5.kick|flow5.s1"));
    }

    #[test]
    fn test_env_descriptor() {
        let obj = service(true).to_object();
        assert_eq!(env_value(&obj, "APP_ID"), Some("ingest"));
        assert_eq!(env_value(&obj, "IN_TYPES"), Some("flow5.kick"));
        assert_eq!(env_value(&obj, "OUT_TYPE"), Some("flow5.s1"));
        assert_eq!(env_value(&obj, "MAX_HOPS"), Some("5"));
        assert_eq!(env_value(&obj, "DEDUPE_WINDOW_SEC"), Some("60"));
        assert_eq!(env_value(&obj, "K_SINK"), Some("http://sink"));
    }

    #[test]
    fn test_terminal_step_has_no_sink() {
        let obj = service(false).to_object();
        assert_eq!(env_value(&obj, "K_SINK"), None);
        assert_eq!(env_value(&obj, "OUT_TYPE"), Some(""));
        assert_eq!(template_annotation(&obj, ANNOTATION_WIRING), Some("flow5.kick|-"));
    }

    #[test]
    fn test_code_volume() {
        let obj = service(true).to_object();
        let volume = &obj.data["spec"]["template"]["spec"]["volumes"][0];
        assert_eq!(volume["configMap"]["name"], "code-flow5-ingest");
        assert_eq!(volume["configMap"]["items"][0]["key"], "user_code.py");
    }
}
