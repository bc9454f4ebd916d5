//! Integration tests for telemetry initialization and span helpers.

use recite_circle::model::{GroupKey, ResourceId, SessionCode};

#[test]
fn telemetry_initializes_without_endpoint() {
    // Note: tracing subscriber can only be set once per process.
    let config = recite_circle::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "circle-test".to_string(),
        log_level: "debug".to_string(),
    };
    // This may return Err if a global subscriber was already set by
    // another test in this process; that is acceptable.
    let _guard = recite_circle::telemetry::init_telemetry(config);
}

#[test]
fn group_span_creates_and_records_transition() {
    let key = GroupKey {
        session: SessionCode::from("a1b2c3d4"),
        resource: ResourceId(1),
        participant: 3,
    };
    let span = recite_circle::telemetry::claim::start_group_span("claim", &key);
    recite_circle::telemetry::claim::record_state_transition(&span, "unclaimed", "claimed");
}

#[test]
fn metric_instruments_build_without_provider() {
    use opentelemetry::KeyValue;
    use recite_circle::telemetry::metrics;

    metrics::sessions_created().add(1, &[]);
    metrics::claims().add(1, &[KeyValue::new("result", "claimed")]);
    metrics::chunks_allocated().add(5, &[KeyValue::new("mode", "linear")]);
    metrics::operation_duration_ms().record(1.5, &[KeyValue::new("operation", "group.claim")]);
}
