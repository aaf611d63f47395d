//! Metric instruments for informant-rs.
//!
//! Created from the globally-registered `MeterProvider`. Without an OTLP
//! endpoint the global provider is a no-op and recording costs nothing.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("informant-rs")
}

/// Counter: feed deliveries seen by the ingestor.
/// Labels: `result` ("admitted" | "filtered" | "malformed" | "closed").
pub fn builds_received() -> Counter<u64> {
    meter()
        .u64_counter("informant.builds.received")
        .with_description("Feed deliveries seen by the ingestor")
        .build()
}

/// Counter: builds rejected by the filter.
/// Labels: `reason` ("localization" | "unsupported").
pub fn builds_filtered() -> Counter<u64> {
    meter()
        .u64_counter("informant.builds.filtered")
        .with_description("Builds rejected by the filter")
        .build()
}

/// Counter: queued builds evicted by backpressure before any worker took them.
/// Labels: `platform`.
pub fn builds_dropped() -> Counter<u64> {
    meter()
        .u64_counter("informant.builds.dropped")
        .with_description("Builds dropped because the backlog was full")
        .build()
}

/// Counter: builds a worker finished.
/// Labels: `result` ("ok" | "error" | "panic").
pub fn builds_processed() -> Counter<u64> {
    meter()
        .u64_counter("informant.builds.processed")
        .with_description("Builds processed by workers")
        .build()
}

/// Histogram: per-build processing time in milliseconds.
/// Labels: `platform`.
pub fn processing_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("informant.build.duration_ms")
        .with_description("Per-build processing duration")
        .with_unit("ms")
        .build()
}

/// Counter: scratch resource removals at shutdown.
/// Labels: `result` ("removed" | "error").
pub fn cleanup_operations() -> Counter<u64> {
    meter()
        .u64_counter("informant.cleanup.operations")
        .with_description("Scratch resource removals during shutdown cleanup")
        .build()
}

/// Counter: feed resubscriptions after a transient error.
pub fn feed_resubscribes() -> Counter<u64> {
    meter()
        .u64_counter("informant.feed.resubscribes")
        .with_description("Feed resubscriptions after transient errors")
        .build()
}

/// Counter: feed lines that were not valid messages and were skipped.
pub fn feed_invalid_lines() -> Counter<u64> {
    meter()
        .u64_counter("informant.feed.invalid_lines")
        .with_description("Feed lines skipped because they were not valid messages")
        .build()
}
