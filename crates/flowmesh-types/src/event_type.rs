//! CloudEvent type identifiers that chain the steps of a flow together.
//!
//! Every flow publishes into a single topic. Steps tell their traffic apart
//! by event type: the injected entry event is `flow<ID>.kick` and the output
//! of step `N` (1-based position of the consumer) is `flow<ID>.s<N>`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::FlowId;

/// Position-dependent suffix of a pipeline event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSuffix {
    Kick,
    Step(usize),
}

impl fmt::Display for EventSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kick => f.write_str("kick"),
            Self::Step(n) => write!(f, "s{n}"),
        }
    }
}

/// Case-insensitive event type of shape `flow<FlowID>.<suffix>`.
///
/// Stored lowercased so comparisons and log matching agree regardless of
/// how a producer spelled it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineEventType(String);

impl PipelineEventType {
    #[must_use]
    pub fn new(flow: &FlowId, suffix: EventSuffix) -> Self {
        Self(format!("flow{}.{suffix}", flow.as_str()).to_ascii_lowercase())
    }

    /// The synthetic entry event consumed by the first step.
    #[must_use]
    pub fn kick(flow: &FlowId) -> Self {
        Self::new(flow, EventSuffix::Kick)
    }

    /// Type consumed by the step at zero-based `index`.
    #[must_use]
    pub fn input_of(flow: &FlowId, index: usize) -> Self {
        if index == 0 {
            Self::kick(flow)
        } else {
            Self::new(flow, EventSuffix::Step(index))
        }
    }

    /// Type emitted by the step at zero-based `index`; `None` for the
    /// terminal step, which never emits.
    #[must_use]
    pub fn output_of(flow: &FlowId, index: usize, total: usize) -> Option<Self> {
        if index + 1 >= total {
            None
        } else {
            Some(Self::new(flow, EventSuffix::Step(index + 1)))
        }
    }

    /// Parse a raw type string, normalizing case.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        Self(raw.trim().to_ascii_lowercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against a raw type string.
    #[must_use]
    pub fn matches(&self, raw: &str) -> bool {
        self.0.eq_ignore_ascii_case(raw.trim())
    }
}

impl fmt::Display for PipelineEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
