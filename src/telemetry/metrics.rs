//! Metric instrument factories for leaseq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"leaseq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for leaseq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("leaseq")
}

/// Counter: queue-level operations (put, reserve, delete, touch, release).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("leaseq.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: transport calls that failed and were scheduled for retry.
/// Labels: `operation`.
pub fn transport_retries() -> Counter<u64> {
    meter()
        .u64_counter("leaseq.transport.retries")
        .with_description("Number of retried transport calls")
        .build()
}

/// Counter: full transport reconnects after a severed connection.
/// Labels: `queue`.
pub fn transport_reconnects() -> Counter<u64> {
    meter()
        .u64_counter("leaseq.transport.reconnects")
        .with_description("Number of transport reconnects")
        .build()
}

/// Histogram: time spent waiting inside dequeue, in milliseconds.
/// Labels: `queue`.
pub fn dequeue_wait_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("leaseq.queue.dequeue_wait_ms")
        .with_description("Time spent waiting for a message in dequeue")
        .with_unit("ms")
        .build()
}
