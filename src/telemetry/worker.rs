//! Span helpers for periodic worker invocations.

use opentelemetry::KeyValue;
use tracing::Span;

use super::metrics;

/// Start a span covering one worker batch.
///
/// `worker.processed` is declared empty and filled by [`record_batch_result`].
pub fn start_worker_span(worker: &str) -> Span {
    tracing::info_span!(
        "worker.batch",
        "worker.name" = worker,
        "worker.processed" = tracing::field::Empty,
        "worker.truncated" = tracing::field::Empty,
    )
}

/// Record how much a batch did and how long it took.
pub fn record_batch_result(
    span: &Span,
    worker: &'static str,
    processed: usize,
    truncated: bool,
    elapsed: std::time::Duration,
) {
    span.record("worker.processed", processed as u64);
    span.record("worker.truncated", truncated);
    metrics::batch_duration_ms().record(
        elapsed.as_secs_f64() * 1000.0,
        &[KeyValue::new("worker", worker)],
    );
}
