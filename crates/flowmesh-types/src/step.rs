//! Step objects as persisted, and step specs as assembled for deployment.

use serde::{Deserialize, Serialize};

use crate::ids::ObjectId;

/// Autoscaling ceiling applied when a step does not configure one.
pub const DEFAULT_MAX_SCALE: u8 = 5;

/// A persisted graph node carrying handler code in its parameter blob.
///
/// `params` is the raw JSON text exactly as stored; the assembler decides
/// whether it parses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepObject {
    pub id: ObjectId,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<String>,
}

impl StepObject {
    #[must_use]
    pub fn new(id: impl Into<ObjectId>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            params: None,
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: impl Into<String>) -> Self {
        self.params = Some(params.into());
        self
    }
}

/// One deployable step of a flow.
///
/// `name` is a DNS-label-safe slug that is unique within its flow and at
/// most 63 characters long. `index` is the zero-based position in the flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    pub code: String,
    pub index: usize,
    /// Upper bound on replicas, already clamped to `0..=5`.
    pub max_scale: u8,
}

impl StepSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, code: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            index,
            max_scale: DEFAULT_MAX_SCALE,
        }
    }

    /// Whether this step is last in a flow of `total` steps.
    #[must_use]
    pub fn is_terminal(&self, total: usize) -> bool {
        self.index + 1 == total
    }
}
