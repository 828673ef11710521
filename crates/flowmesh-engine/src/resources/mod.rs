//! Typed builders for every resource a flow deploys or launches.
//!
//! Each builder knows its kind, namespace, and name, and renders itself to
//! a [`DynamicObject`] only at the cluster boundary.

pub mod config_map;
pub mod jobs;
pub mod names;
pub mod service;
pub mod sink;
pub mod source;
pub mod topic;

use std::collections::BTreeMap;

use kube::api::DynamicObject;

use crate::cluster::ResourceKind;

pub use config_map::CodeConfigMap;
pub use jobs::{BatchJob, JobResources};
pub use names::FlowNames;
pub use service::StepService;
pub use sink::FlowSink;
pub use source::StepSource;
pub use topic::FlowTopic;

/// A resource that can be rendered for the API server.
pub trait Manifest: Send + Sync {
    fn kind(&self) -> ResourceKind;
    fn namespace(&self) -> &str;
    fn name(&self) -> String;
    fn to_object(&self) -> DynamicObject;
}

pub(crate) fn label_map<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Empty object of `kind` carrying `labels`.
pub(crate) fn labeled_object(
    kind: ResourceKind,
    namespace: &str,
    name: &str,
    labels: BTreeMap<String, String>,
) -> DynamicObject {
    let mut obj = kind.object(namespace, name);
    obj.metadata.labels = Some(labels);
    obj
}
