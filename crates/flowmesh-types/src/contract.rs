//! Observable contract of the step runtime.
//!
//! The runtime inside each deployed service is not part of this workspace,
//! but the verifier depends on what it does: the headers it reads and
//! writes, the admission rules it applies before user code runs, and the
//! lines it prints to stdout. Those rules are modeled here so the engine
//! can render the environment it hands to the runtime and parse what the
//! runtime logs back.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::event_type::PipelineEventType;
use crate::ids::FlowId;

/// Events at or above this hop count are dropped before user code.
pub const MAX_HOPS: u32 = 5;

/// How long a seen event id suppresses duplicates.
pub const DEDUP_WINDOW: Duration = Duration::from_secs(60);

/// Upper bound on remembered event ids per replica.
pub const DEDUP_CAPACITY: usize = 2048;

/// CloudEvents spec version written by every producer.
pub const CE_SPEC_VERSION: &str = "1.0";

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Metadata carried alongside every pipeline event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudEventEnvelope {
    pub specversion: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub id: String,
    pub traceid: String,
    #[serde(default)]
    pub hops: u32,
    /// Name of the emitting step; empty for injected events.
    #[serde(default)]
    pub producer: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl CloudEventEnvelope {
    /// Envelope for a freshly injected event.
    #[must_use]
    pub fn injected(
        event_type: &PipelineEventType,
        source: impl Into<String>,
        id: impl Into<String>,
        traceid: impl Into<String>,
    ) -> Self {
        Self {
            specversion: CE_SPEC_VERSION.to_string(),
            event_type: event_type.as_str().to_string(),
            source: source.into(),
            id: id.into(),
            traceid: traceid.into(),
            hops: 0,
            producer: String::new(),
            data: Map::new(),
        }
    }

    /// Envelope a step emits in reaction to `self`.
    ///
    /// Keeps the trace id and bumps the hop count.
    #[must_use]
    pub fn forward(
        &self,
        flow: &FlowId,
        producer: impl Into<String>,
        event_type: &PipelineEventType,
        id: impl Into<String>,
        data: Map<String, Value>,
    ) -> Self {
        let producer = producer.into();
        Self {
            specversion: CE_SPEC_VERSION.to_string(),
            event_type: event_type.as_str().to_string(),
            source: format!("/flow/{flow}/{producer}"),
            id: id.into(),
            traceid: self.traceid.clone(),
            hops: self.hops.saturating_add(1),
            producer,
            data,
        }
    }

    /// Kafka record headers (`ce_<attr>`) carrying this envelope's
    /// attributes in binary content mode.
    #[must_use]
    pub fn kafka_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("ce_specversion".to_string(), self.specversion.clone()),
            ("ce_type".to_string(), self.event_type.clone()),
            ("ce_source".to_string(), self.source.clone()),
            ("ce_id".to_string(), self.id.clone()),
            ("ce_traceid".to_string(), self.traceid.clone()),
            ("ce_hops".to_string(), self.hops.to_string()),
        ];
        if !self.producer.is_empty() {
            headers.push(("ce_producer".to_string(), self.producer.clone()));
        }
        headers
    }
}

// ---------------------------------------------------------------------------
// Duplicate suppression
// ---------------------------------------------------------------------------

/// Bounded, time-windowed set of recently seen event ids.
///
/// Per-process only: two replicas of one step do not share it.
#[derive(Debug)]
pub struct DedupCache {
    capacity: usize,
    window: Duration,
    order: VecDeque<(String, Instant)>,
    seen: HashSet<String>,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEDUP_CAPACITY, DEDUP_WINDOW)
    }
}

impl DedupCache {
    #[must_use]
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            window,
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// Record `id` as seen at `now`. Returns `true` if it was already
    /// present within the window.
    pub fn check_and_insert(&mut self, id: &str, now: Instant) -> bool {
        self.evict_expired(now);
        if self.seen.contains(id) {
            return true;
        }
        self.seen.insert(id.to_string());
        self.order.push_back((id.to_string(), now));
        while self.order.len() > self.capacity {
            if let Some((oldest, _)) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        false
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some((id, at)) = self.order.front() {
            if now.saturating_duration_since(*at) <= self.window {
                break;
            }
            self.seen.remove(id);
            self.order.pop_front();
        }
    }
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

/// Why the runtime refused to hand an event to user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Duplicate,
    HopLimit,
    OwnOutputType,
    OwnProducer,
    UnexpectedType,
}

/// Verdict of the admission rules for one incoming event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    Drop(DropReason),
}

/// Admission rules of one step replica, applied in order: duplicate id,
/// hop limit, self-produced type, self-produced event, unexpected type.
#[derive(Debug)]
pub struct AdmissionGate {
    step: String,
    in_types: Vec<PipelineEventType>,
    out_type: Option<PipelineEventType>,
    max_hops: u32,
    dedup: DedupCache,
}

impl AdmissionGate {
    #[must_use]
    pub fn new(
        step: impl Into<String>,
        in_types: Vec<PipelineEventType>,
        out_type: Option<PipelineEventType>,
    ) -> Self {
        Self {
            step: step.into(),
            in_types,
            out_type,
            max_hops: MAX_HOPS,
            dedup: DedupCache::default(),
        }
    }

    pub fn admit(&mut self, envelope: &CloudEventEnvelope, now: Instant) -> Admission {
        if self.dedup.check_and_insert(&envelope.id, now) {
            return Admission::Drop(DropReason::Duplicate);
        }
        if envelope.hops >= self.max_hops {
            return Admission::Drop(DropReason::HopLimit);
        }
        if self
            .out_type
            .as_ref()
            .is_some_and(|out| out.matches(&envelope.event_type))
        {
            return Admission::Drop(DropReason::OwnOutputType);
        }
        if envelope.producer == self.step {
            return Admission::Drop(DropReason::OwnProducer);
        }
        if !self.in_types.is_empty() && !self.in_types.iter().any(|t| t.matches(&envelope.event_type)) {
            return Admission::Drop(DropReason::UnexpectedType);
        }
        Admission::Accept
    }
}

// ---------------------------------------------------------------------------
// Log lines
// ---------------------------------------------------------------------------

/// A line the runtime prints that the verifier understands.
///
/// Lines may carry a `[STEP]` prefix; it is ignored when parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepLogLine {
    /// `emit ce_type=<type>`
    Emit { event_type: String },
    /// `in=<type> out=<type,...|-> items=<n>`
    Summary {
        input: String,
        outputs: Vec<String>,
        items: usize,
    },
}

impl StepLogLine {
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim();
        if rest.starts_with('[') {
            let close = rest.find(']')?;
            rest = rest[close + 1..].trim_start();
        }

        if let Some(tail) = rest.strip_prefix("emit ") {
            let event_type = tail.trim().strip_prefix("ce_type=")?;
            let event_type = event_type.split_whitespace().next()?;
            return Some(Self::Emit {
                event_type: event_type.to_string(),
            });
        }

        let mut input = None;
        let mut outputs = None;
        let mut items = None;
        for token in rest.split_whitespace() {
            if let Some(v) = token.strip_prefix("in=") {
                input = Some(v.to_string());
            } else if let Some(v) = token.strip_prefix("out=") {
                outputs = Some(if v == "-" {
                    Vec::new()
                } else {
                    v.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect()
                });
            } else if let Some(v) = token.strip_prefix("items=") {
                items = v.parse().ok();
            }
        }
        Some(Self::Summary {
            input: input?,
            outputs: outputs?,
            items: items?,
        })
    }

    /// Whether this line shows the step emitting `expected`.
    #[must_use]
    pub fn shows_emission(&self, expected: &PipelineEventType) -> bool {
        match self {
            Self::Emit { event_type } => expected.matches(event_type),
            Self::Summary { outputs, .. } => outputs.iter().any(|o| expected.matches(o)),
        }
    }

    /// Whether this line shows the step receiving `expected`.
    #[must_use]
    pub fn shows_receipt(&self, expected: &PipelineEventType) -> bool {
        match self {
            Self::Emit { .. } => false,
            Self::Summary { input, .. } => expected.matches(input),
        }
    }
}

impl fmt::Display for StepLogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Emit { event_type } => write!(f, "emit ce_type={event_type}"),
            Self::Summary {
                input,
                outputs,
                items,
            } => {
                let out = if outputs.is_empty() {
                    "-".to_string()
                } else {
                    outputs.join(",")
                };
                write!(f, "in={input} out={out} items={items}")
            }
        }
    }
}

/// Scan a log blob for any line satisfying `pred`.
pub fn any_line(logs: &str, pred: impl Fn(&StepLogLine) -> bool) -> bool {
    logs.lines().filter_map(StepLogLine::parse).any(|line| pred(&line))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(id: &str, ty: &str, hops: u32, producer: &str) -> CloudEventEnvelope {
        CloudEventEnvelope {
            specversion: CE_SPEC_VERSION.into(),
            event_type: ty.into(),
            source: "/flow/1/kick".into(),
            id: id.into(),
            traceid: "t".into(),
            hops,
            producer: producer.into(),
            data: Map::new(),
        }
    }

    fn gate() -> AdmissionGate {
        let flow = FlowId::new("1");
        AdmissionGate::new(
            "transform",
            vec![PipelineEventType::input_of(&flow, 1)],
            PipelineEventType::output_of(&flow, 1, 3),
        )
    }

    #[test]
    fn test_dedup_within_window() {
        let mut cache = DedupCache::default();
        let t0 = Instant::now();
        assert!(!cache.check_and_insert("a", t0));
        assert!(cache.check_and_insert("a", t0 + Duration::from_secs(30)));
        assert!(!cache.check_and_insert("a", t0 + Duration::from_secs(61)));
    }

    #[test]
    fn test_dedup_capacity_evicts_oldest() {
        let mut cache = DedupCache::new(2, DEDUP_WINDOW);
        let now = Instant::now();
        cache.check_and_insert("a", now);
        cache.check_and_insert("b", now);
        cache.check_and_insert("c", now);
        assert_eq!(cache.len(), 2);
        assert!(!cache.check_and_insert("a", now));
    }

    #[test]
    fn test_hop_limit_drops_before_user_code() {
        let mut gate = gate();
        let now = Instant::now();
        assert_eq!(
            gate.admit(&envelope("1", "flow1.s1", MAX_HOPS, "ingest"), now),
            Admission::Drop(DropReason::HopLimit)
        );
        assert_eq!(
            gate.admit(&envelope("2", "flow1.s1", MAX_HOPS - 1, "ingest"), now),
            Admission::Accept
        );
    }

    #[test]
    fn test_admission_rules() {
        let mut gate = gate();
        let now = Instant::now();
        assert_eq!(
            gate.admit(&envelope("1", "flow1.s2", 1, "ingest"), now),
            Admission::Drop(DropReason::OwnOutputType)
        );
        assert_eq!(
            gate.admit(&envelope("2", "flow1.s1", 1, "transform"), now),
            Admission::Drop(DropReason::OwnProducer)
        );
        assert_eq!(
            gate.admit(&envelope("3", "flow1.kick", 0, ""), now),
            Admission::Drop(DropReason::UnexpectedType)
        );
        assert_eq!(
            gate.admit(&envelope("4", "FLOW1.S1", 1, "ingest"), now),
            Admission::Accept
        );
        assert_eq!(
            gate.admit(&envelope("4", "flow1.s1", 1, "ingest"), now),
            Admission::Drop(DropReason::Duplicate)
        );
    }

    #[test]
    fn test_forward_bumps_hops_and_keeps_trace() {
        let flow = FlowId::new("1");
        let kick = CloudEventEnvelope::injected(
            &PipelineEventType::kick(&flow),
            "/flow/1/kick",
            "id-1",
            "trace-1",
        );
        let next = kick.forward(
            &flow,
            "ingest",
            &PipelineEventType::input_of(&flow, 1),
            "id-2",
            Map::new(),
        );
        assert_eq!(next.hops, 1);
        assert_eq!(next.traceid, "trace-1");
        assert_eq!(next.producer, "ingest");
        assert_eq!(next.source, "/flow/1/ingest");
        assert!(next
            .kafka_headers()
            .contains(&("ce_producer".to_string(), "ingest".to_string())));
    }

    #[test]
    fn test_parse_emit_line() {
        let line = StepLogLine::parse("[TRANSFORM] emit ce_type=flow1.s2").unwrap();
        assert_eq!(
            line,
            StepLogLine::Emit {
                event_type: "flow1.s2".into()
            }
        );
    }

    #[test]
    fn test_parse_summary_line() {
        let line = StepLogLine::parse("[SINK] in=flow1.s2 out=- items=1").unwrap();
        let flow = FlowId::new("1");
        assert!(line.shows_receipt(&PipelineEventType::input_of(&flow, 2)));
        assert!(!line.shows_emission(&PipelineEventType::input_of(&flow, 2)));
        assert_eq!(line.to_string(), "in=flow1.s2 out=- items=1");
    }

    #[test]
    fn test_exact_type_matching() {
        let flow = FlowId::new("1");
        let s1 = PipelineEventType::input_of(&flow, 1);
        assert!(!any_line("[X] in=flow1.kick out=flow1.s10 items=1", |l| l
            .shows_emission(&s1)));
        assert!(any_line("noise\n[X] in=flow1.kick out=flow1.s1 items=1\n", |l| l
            .shows_emission(&s1)));
    }

    #[test]
    fn test_unrelated_lines_ignored() {
        assert!(StepLogLine::parse("[X] error: boom").is_none());
        assert!(StepLogLine::parse("").is_none());
        assert!(StepLogLine::parse("[X] emit error: timeout").is_none());
    }
}
