//! Span helpers for operations on assignment groups.

use tracing::Span;

use crate::model::GroupKey;

/// Start a span for an operation on one assignment group.
///
/// The `group.state` field is declared empty and is filled in by
/// [`record_state_transition`].
pub fn start_group_span(operation: &str, key: &GroupKey) -> Span {
    tracing::info_span!(
        "group.operation",
        "group.operation" = operation,
        "group.session" = %key.session,
        "group.resource" = %key.resource,
        "group.participant" = key.participant,
        "group.state" = tracing::field::Empty,
    )
}

/// Record a state transition on the span and emit an `info` event in it.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("group.state", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
