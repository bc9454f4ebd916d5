//! Metric instrument factories for recite-circle.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"recite-circle"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for recite-circle instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("recite-circle")
}

/// Counter: sessions created.
pub fn sessions_created() -> Counter<u64> {
    meter()
        .u64_counter("circle.sessions.created")
        .with_description("Number of sessions created")
        .build()
}

/// Counter: claim attempts.
/// Labels: `result` ("claimed" | "reentrant" | "already_claimed" | "unauthorized").
pub fn claims() -> Counter<u64> {
    meter()
        .u64_counter("circle.claims")
        .with_description("Number of claim attempts by outcome")
        .build()
}

/// Counter: group state transitions.
/// Labels: `from`, `to`.
pub fn group_transitions() -> Counter<u64> {
    meter()
        .u64_counter("circle.group.transitions")
        .with_description("Number of assignment group state transitions")
        .build()
}

/// Counter: chunks produced by the allocator.
/// Labels: `mode` ("joint" | "linear" | "wrapping").
pub fn chunks_allocated() -> Counter<u64> {
    meter()
        .u64_counter("circle.chunks.allocated")
        .with_description("Number of assignment chunks allocated")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("circle.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
