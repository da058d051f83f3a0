//! Lease lifecycle span helpers.
//!
//! One span covers a message from reserve to its outcome; the
//! `queue.outcome` field is declared empty and filled in by
//! [`record_lease_outcome`].

use crate::transport::DeliveryTag;
use tracing::Span;

/// Start a span for one message lease.
pub fn start_lease_span(queue: &str, tag: &DeliveryTag) -> Span {
    tracing::info_span!(
        "queue.lease",
        "queue.name" = queue,
        "queue.delivery_tag" = %tag,
        "queue.outcome" = tracing::field::Empty,
    )
}

/// Record how the lease ended ("acknowledged" or "released").
pub fn record_lease_outcome(span: &Span, outcome: &str) {
    span.record("queue.outcome", outcome);
    span.in_scope(|| {
        tracing::info!(outcome, "lease closed");
    });
}
