//! Metric instrument factories.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments come from the `"review-queue"` meter; without a provider
//! installed they are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("review-queue")
}

/// Counter: claim attempts.
/// Labels: `result` ("acquired" | "already_claimed" | "not_claimable").
pub fn claim_attempts() -> Counter<u64> {
    meter()
        .u64_counter("review_queue.claim.attempts")
        .with_description("Claim acquisition attempts by result")
        .build()
}

/// Counter: owner-initiated claim exits.
/// Labels: `to` (target status), `result` ("ok" | "not_owner").
pub fn claim_exits() -> Counter<u64> {
    meter()
        .u64_counter("review_queue.claim.exits")
        .with_description("Claims released or resolved by their holder")
        .build()
}

/// Counter: stale claims returned to the queue by the reclaimer.
pub fn claims_reclaimed() -> Counter<u64> {
    meter()
        .u64_counter("review_queue.claim.reclaimed")
        .with_description("Stale claims reclaimed")
        .build()
}

/// Counter: intakes past the queue-age SLA seen by one SLA scan.
/// Labels: `severity` ("warning" | "critical").
pub fn sla_breaches() -> Counter<u64> {
    meter()
        .u64_counter("review_queue.sla.breaches")
        .with_description("Queued intakes older than the SLA thresholds")
        .build()
}

/// Counter: retry attempts by result.
/// Labels: `side_effect`, `result` ("succeeded" | "failed" | "exhausted").
pub fn retry_attempts() -> Counter<u64> {
    meter()
        .u64_counter("review_queue.retry.attempts")
        .with_description("Side-effect retry attempts")
        .build()
}

/// Counter: audit ledger writes.
/// Labels: `event_type`, `result` ("ok" | "error").
pub fn ledger_writes() -> Counter<u64> {
    meter()
        .u64_counter("review_queue.ledger.writes")
        .with_description("Compliance ledger append attempts")
        .build()
}

/// Counter: alerts sent to the alert sink.
/// Labels: `alert`, `level`.
pub fn alerts_emitted() -> Counter<u64> {
    meter()
        .u64_counter("review_queue.alerts.emitted")
        .with_description("Alerts emitted")
        .build()
}

/// Counter: dependency probe results.
/// Labels: `dependency`, `status` ("ok" | "error").
pub fn health_checks() -> Counter<u64> {
    meter()
        .u64_counter("review_queue.health.checks")
        .with_description("Dependency health probe results")
        .build()
}

/// Histogram: worker batch duration in milliseconds.
/// Labels: `worker`.
pub fn batch_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("review_queue.worker.batch_duration_ms")
        .with_description("Worker batch duration in milliseconds")
        .with_unit("ms")
        .build()
}
