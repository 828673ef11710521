use flowmesh_types::ids::FlowId;
use kube::api::DynamicObject;
use serde_json::json;

use super::names::{FlowNames, CODE_KEY, LABEL_FLOW_ID};
use super::{label_map, labeled_object, Manifest};
use crate::cluster::ResourceKind;

/// ConfigMap holding one step's source under [`CODE_KEY`].
#[derive(Debug, Clone)]
pub struct CodeConfigMap {
    pub flow: FlowId,
    pub namespace: String,
    pub step: String,
    pub code: String,
}

impl Manifest for CodeConfigMap {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ConfigMap
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn name(&self) -> String {
        FlowNames::new(&self.flow).config_map(&self.step)
    }

    fn to_object(&self) -> DynamicObject {
        let labels = label_map([(LABEL_FLOW_ID, self.flow.as_str())]);
        let mut obj = labeled_object(self.kind(), &self.namespace, &self.name(), labels);
        obj.data = json!({ "data": { CODE_KEY: self.code } });
        obj
    }
}
