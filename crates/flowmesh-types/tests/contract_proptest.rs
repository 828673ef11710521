use std::time::{Duration, Instant};

use flowmesh_types::contract::{
    Admission, AdmissionGate, CloudEventEnvelope, DedupCache, DropReason, StepLogLine, DEDUP_CAPACITY, MAX_HOPS,
};
use flowmesh_types::event_type::PipelineEventType;
use flowmesh_types::ids::FlowId;
use proptest::prelude::*;
use serde_json::Map;

fn event_type() -> impl Strategy<Value = String> {
    "flow[0-9]{1,4}\\.(kick|s[0-9]{1,3})"
}

fn envelope(flow: &FlowId, id: String, hops: u32) -> CloudEventEnvelope {
    let mut env = CloudEventEnvelope::injected(&PipelineEventType::kick(flow), "/flow/test", id, "trace");
    env.hops = hops;
    env
}

proptest! {
    #[test]
    fn summary_line_survives_render_and_parse(
        input in event_type(),
        outputs in prop::collection::vec(event_type(), 0..4),
        items in 0usize..10_000,
        prefixed in any::<bool>(),
    ) {
        let line = StepLogLine::Summary { input, outputs, items };
        let rendered = if prefixed { format!("[transform] {line}") } else { line.to_string() };
        prop_assert_eq!(StepLogLine::parse(&rendered), Some(line));
    }

    #[test]
    fn emit_line_survives_render_and_parse(event_type in event_type()) {
        let line = StepLogLine::Emit { event_type };
        prop_assert_eq!(StepLogLine::parse(&line.to_string()), Some(line));
    }

    #[test]
    fn event_type_match_ignores_case(flow in "[0-9]{1,4}", step in 1usize..50) {
        let flow = FlowId::new(flow);
        let expected = PipelineEventType::input_of(&flow, step);
        prop_assert!(expected.matches(&expected.as_str().to_ascii_uppercase()));
        prop_assert_eq!(PipelineEventType::parse(&expected.to_string().to_ascii_uppercase()), expected.clone());
        let longer = format!("{expected}0");
        prop_assert!(!expected.matches(&longer));
    }

    #[test]
    fn dedup_cache_stays_bounded(ids in prop::collection::vec(0u32..5_000, 1..4_000), step_ms in 0u64..40) {
        let mut cache = DedupCache::default();
        let start = Instant::now();
        for (i, id) in ids.iter().enumerate() {
            let now = start + Duration::from_millis(step_ms * i as u64);
            cache.check_and_insert(&id.to_string(), now);
            prop_assert!(cache.len() <= DEDUP_CAPACITY);
        }
    }

    #[test]
    fn repeated_id_within_window_is_duplicate(id in "[a-f0-9]{8}", gap_ms in 0u64..60_000) {
        let mut cache = DedupCache::default();
        let start = Instant::now();
        prop_assert!(!cache.check_and_insert(&id, start));
        prop_assert!(cache.check_and_insert(&id, start + Duration::from_millis(gap_ms)));
    }

    #[test]
    fn events_at_hop_cap_never_reach_user_code(hops in MAX_HOPS..MAX_HOPS + 100, serial in any::<u64>()) {
        let flow = FlowId::new("3");
        let mut gate = AdmissionGate::new("ingest", vec![PipelineEventType::kick(&flow)], None);
        let verdict = gate.admit(&envelope(&flow, serial.to_string(), hops), Instant::now());
        prop_assert_eq!(verdict, Admission::Drop(DropReason::HopLimit));
    }

    #[test]
    fn events_below_hop_cap_are_accepted(hops in 0..MAX_HOPS, serial in any::<u64>()) {
        let flow = FlowId::new("3");
        let mut gate = AdmissionGate::new("ingest", vec![PipelineEventType::kick(&flow)], None);
        let verdict = gate.admit(&envelope(&flow, serial.to_string(), hops), Instant::now());
        prop_assert_eq!(verdict, Admission::Accept);
    }
}

#[test]
fn test_forwarding_loop_stops_at_hop_cap() {
    let flow = FlowId::new("3");
    let kick = PipelineEventType::kick(&flow);
    let mut gate = AdmissionGate::new("echo", vec![kick.clone()], None);
    let now = Instant::now();

    let mut current = envelope(&flow, "e0".into(), 0);
    let mut accepted = 0;
    for i in 1..=20 {
        if gate.admit(&current, now) != Admission::Accept {
            break;
        }
        accepted += 1;
        current = current.forward(&flow, "relay", &kick, format!("e{i}"), Map::new());
    }
    assert_eq!(accepted, MAX_HOPS);
    assert_eq!(current.hops, MAX_HOPS);
}
