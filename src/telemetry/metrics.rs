//! Metric instrument factories for docflow.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"docflow"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for docflow instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("docflow")
}

/// Counter: document state transitions committed.
/// Labels: `doctype`.
pub fn transitions_applied() -> Counter<u64> {
    meter()
        .u64_counter("docflow.transitions.applied")
        .with_description("Number of document state transitions committed")
        .build()
}

/// Counter: apply requests turned down before any write.
/// Labels: `reason` ("no_transition" | "unauthorized" | "unknown_user").
pub fn transitions_denied() -> Counter<u64> {
    meter()
        .u64_counter("docflow.transitions.denied")
        .with_description("Number of apply requests denied")
        .build()
}

/// Counter: commits that lost an optimistic-concurrency race.
pub fn concurrent_modifications() -> Counter<u64> {
    meter()
        .u64_counter("docflow.transitions.conflicts")
        .with_description("Number of transitions rejected by a concurrent state change")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("docflow.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
