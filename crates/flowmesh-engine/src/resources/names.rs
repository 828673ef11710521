//! Resource names, labels, and annotations derived from a flow and its steps.

use flowmesh_types::ids::FlowId;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Longest name a DNS label (and therefore most resource names) may have.
pub const MAX_NAME_LEN: usize = 63;

pub const LABEL_FLOW_ID: &str = "flow_id";
pub const LABEL_APP: &str = "app";
pub const LABEL_PURPOSE: &str = "purpose";
pub const LABEL_JOB_NAME: &str = "job-name";
pub const LABEL_STRIMZI_CLUSTER: &str = "strimzi.io/cluster";

pub const ANNOTATION_CODE_HASH: &str = "flow/code-hash";
pub const ANNOTATION_WIRING: &str = "flow/wiring";
pub const ANNOTATION_MIN_SCALE: &str = "autoscaling.knative.dev/minScale";
pub const ANNOTATION_MAX_SCALE: &str = "autoscaling.knative.dev/maxScale";

/// ConfigMap key holding a step's source.
pub const CODE_KEY: &str = "user_code.py";

const SINK_INGRESS: &str = "http://kafka-sink-ingress.knative-eventing.svc.cluster.local";

/// Lowercase `[a-z0-9-]` slug with single dashes and no dash at either edge.
#[must_use]
pub fn slug(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for c in raw.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
    }
    out
}

/// `base` followed by `suffix`, with `base` cut so the whole fits in
/// [`MAX_NAME_LEN`]. A dash left dangling by the cut is dropped.
#[must_use]
pub fn fit_with_suffix(base: &str, suffix: &str) -> String {
    let room = MAX_NAME_LEN.saturating_sub(suffix.len());
    let cut = if base.len() > room { &base[..room] } else { base };
    format!("{}{suffix}", cut.trim_end_matches('-'))
}

/// Eight lowercase hex characters for disposable job names.
#[must_use]
pub fn random_suffix() -> String {
    let bytes: [u8; 4] = rand::thread_rng().gen();
    hex::encode(bytes)
}

/// SHA-256 of a step's source, hex encoded.
#[must_use]
pub fn code_hash(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

/// Knative ingress URL that publishes into a flow's sink.
#[must_use]
pub fn sink_url(namespace: &str, flow: &FlowId) -> String {
    format!("{SINK_INGRESS}/{namespace}/sink-{flow}")
}

/// Names of every resource belonging to one flow.
#[derive(Debug, Clone, Copy)]
pub struct FlowNames<'a> {
    flow: &'a FlowId,
}

impl<'a> FlowNames<'a> {
    #[must_use]
    pub fn new(flow: &'a FlowId) -> Self {
        Self { flow }
    }

    #[must_use]
    pub fn flow(&self) -> &'a FlowId {
        self.flow
    }

    /// Label selector matching everything the flow owns.
    #[must_use]
    pub fn selector(&self) -> String {
        format!("{LABEL_FLOW_ID}={}", self.flow)
    }

    #[must_use]
    pub fn topic(&self) -> String {
        self.flow.to_string()
    }

    #[must_use]
    pub fn sink(&self) -> String {
        format!("sink-{}", self.flow)
    }

    #[must_use]
    pub fn config_map(&self, step: &str) -> String {
        format!("code-flow{}-{step}", self.flow)
    }

    #[must_use]
    pub fn service(&self, step: &str) -> String {
        format!("flow{}-{step}", self.flow)
    }

    #[must_use]
    pub fn source_for_service(&self, service: &str) -> String {
        format!("source-{}-to-{service}", self.flow)
    }

    #[must_use]
    pub fn source(&self, step: &str) -> String {
        self.source_for_service(&self.service(step))
    }

    #[must_use]
    pub fn consumer_group(&self, step: &str) -> String {
        format!("cg-flow{}-{step}-v1", self.flow)
    }

    #[must_use]
    pub fn preflight_job(&self) -> String {
        format!("preflight-flow{}-{}", self.flow, random_suffix())
    }

    #[must_use]
    pub fn kick_job(&self) -> String {
        format!("kick-flow-{}-{}", self.flow, random_suffix())
    }

    #[must_use]
    pub fn probe_job(&self) -> String {
        format!("probe-{}-{}", self.flow, random_suffix())
    }

    #[must_use]
    pub fn unit_test_job(&self) -> String {
        let flow = slug(self.flow.as_str());
        if flow.is_empty() {
            format!("ut1-{}", random_suffix())
        } else {
            format!("ut1-{flow}-{}", random_suffix())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug() {
        assert_eq!(slug("Ingest Orders"), "ingest-orders");
        assert_eq!(slug("  --Transform__v2!!  "), "transform-v2");
        assert_eq!(slug("a...b---c"), "a-b-c");
        assert_eq!(slug("데이터"), "");
        assert_eq!(slug(""), "");
    }

    #[test]
    fn test_fit_with_suffix_keeps_suffix() {
        let base = "a".repeat(70);
        let name = fit_with_suffix(&base, "-12");
        assert_eq!(name.len(), MAX_NAME_LEN);
        assert!(name.ends_with("-12"));
    }

    #[test]
    fn test_fit_drops_dangling_dash() {
        let base = format!("{}-tail", "x".repeat(59));
        let name = fit_with_suffix(&base, "-22");
        assert!(!name.contains("--"));
        assert_eq!(name, format!("{}-22", "x".repeat(59)));
    }

    #[test]
    fn test_flow_names() {
        let flow = FlowId::new("12");
        let names = FlowNames::new(&flow);
        assert_eq!(names.topic(), "12");
        assert_eq!(names.sink(), "sink-12");
        assert_eq!(names.config_map("ingest"), "code-flow12-ingest");
        assert_eq!(names.service("ingest"), "flow12-ingest");
        assert_eq!(names.source("ingest"), "source-12-to-flow12-ingest");
        assert_eq!(names.consumer_group("ingest"), "cg-flow12-ingest-v1");
        assert_eq!(names.selector(), "flow_id=12");
        assert!(names.kick_job().starts_with("kick-flow-12-"));
        assert!(names.unit_test_job().starts_with("ut1-12-"));
    }

    #[test]
    fn test_random_suffix_shape() {
        let s = random_suffix();
        assert_eq!(s.len(), 8);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_code_hash_is_stable() {
        assert_eq!(code_hash("abc"), code_hash("abc"));
        assert_ne!(code_hash("abc"), code_hash("abd"));
        assert_eq!(code_hash("").len(), 64);
    }

    #[test]
    fn test_sink_url() {
        assert_eq!(
            sink_url("user-a", &FlowId::new("3")),
            "http://kafka-sink-ingress.knative-eventing.svc.cluster.local/user-a/sink-3"
        );
    }
}
