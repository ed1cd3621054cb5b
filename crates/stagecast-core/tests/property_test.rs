//! Property-based tests for the event wire format.
//!
//! Checks that serialised events carry exactly the fields that were set,
//! whatever the combination of optional build metadata and outcome.

use proptest::prelude::*;
use serde_json::Value;
use stagecast_core::{BuildContext, EventEnvelope, StageEvent, StageOutcome};

fn optional_text() -> impl Strategy<Value = Option<String>> {
    prop_oneof![Just(None), Just(Some(String::new())), "[a-zA-Z0-9/_-]{1,16}".prop_map(Some)]
}

fn build_context() -> impl Strategy<Value = BuildContext> {
    ("[a-z]{1,8}/[a-z]{1,8}", 1u32..100_000, optional_text(), optional_text(), optional_text())
        .prop_map(|(job, number, branch_name, change_id, change_target)| BuildContext {
            build_url: format!("job/{job}/{number}/"),
            job_full_name: job,
            build_number: number,
            branch_name,
            change_id,
            change_target,
        })
}

fn outcome() -> impl Strategy<Value = StageOutcome> {
    prop_oneof![
        any::<u32>().prop_map(|ms| StageOutcome::success(u64::from(ms))),
        (any::<u32>(), "[a-z][a-z ]{0,23}")
            .prop_map(|(ms, message)| StageOutcome::failure(u64::from(ms), message)),
    ]
}

fn encode(event: &StageEvent) -> serde_json::Map<String, Value> {
    match serde_json::from_slice(&event.to_json().expect("event encodes")) {
        Ok(Value::Object(map)) => map,
        other => panic!("expected a JSON object, got {other:?}"),
    }
}

proptest! {
    #[test]
    fn optional_build_fields_present_iff_set(build in build_context(), node in "[0-9]{1,4}") {
        let expected = [
            ("branch_name", build.branch_name.clone()),
            ("change_id", build.change_id.clone()),
            ("change_target", build.change_target.clone()),
        ];
        let event = StageEvent::stage_start(EventEnvelope::new(build, node, "Build", 0));
        let json = encode(&event);

        for (field, value) in expected {
            let set = value.filter(|v| !v.is_empty());
            prop_assert_eq!(json.get(field).and_then(Value::as_str), set.as_deref());
        }
        prop_assert_eq!(json.get("event_version").and_then(Value::as_str), Some("1.0"));
    }

    #[test]
    fn stage_end_fields_mirror_outcome(build in build_context(), outcome in outcome()) {
        let event = StageEvent::stage_end(
            EventEnvelope::new(build, "1", "Deploy", 42),
            outcome.clone(),
        );
        let json = encode(&event);

        prop_assert_eq!(json.get("event_type").and_then(Value::as_str), Some("stage_end"));
        let status = outcome.status().to_string();
        prop_assert_eq!(json.get("status").and_then(Value::as_str), Some(status.as_str()));
        prop_assert_eq!(json.get("result"), json.get("status"));
        let duration_ms = json.get("duration_ms").and_then(Value::as_u64);
        prop_assert_eq!(duration_ms, Some(outcome.duration_ms()));
        prop_assert_eq!(json.get("error_message").and_then(Value::as_str), outcome.error_message());
    }

    #[test]
    fn decoding_restores_the_event(build in build_context(), outcome in outcome()) {
        let event = StageEvent::stage_end(EventEnvelope::new(build, "9", "Test", 7), outcome);
        let decoded = StageEvent::from_json(&event.to_json().expect("event encodes"))
            .expect("event decodes");

        prop_assert_eq!(decoded, event);
    }
}
