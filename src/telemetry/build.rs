//! Per-build span helpers.

use crate::model::BuildEvent;
use tracing::Span;

/// Start a span covering one worker's processing of a build.
///
/// `build.result` is declared empty and filled by [`record_result`].
pub fn start_build_span(worker: usize, event: &BuildEvent) -> Span {
    tracing::info_span!(
        "build.process",
        "build.id" = %event.build_id,
        "build.platform" = %event.platform,
        "build.type" = %event.build_type,
        "worker.index" = worker,
        "build.result" = tracing::field::Empty,
    )
}

/// Record how processing ended on the build span.
pub fn record_result(span: &Span, result: &str) {
    span.record("build.result", result);
}
