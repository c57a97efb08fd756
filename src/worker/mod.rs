//! Periodic workers: stale-claim reclaim, SLA monitoring, side-effect retry.
//! The health checker also runs as one (see [`crate::health`]).
//!
//! Each worker exposes one invocation (`run_once`) that processes a bounded
//! batch and returns counts. Invocations are idempotent and safe to overlap;
//! per-item failures are logged and counted, never propagated. The
//! [`schedule::Scheduler`] drives them in-process; the CLI can also run a
//! single invocation for an external cron.

pub mod reclaim;
pub mod retry;
pub mod schedule;
pub mod sla;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::health::HealthReport;

pub use reclaim::{ReclaimConfig, ReclaimReport, StaleClaimReclaimer};
pub use retry::{HttpDraftGenerator, RetryConfig, RetryCoordinator, RetryReport, SideEffect};
pub use schedule::{Scheduler, TickResult};
pub use sla::{SlaConfig, SlaMonitor, SlaReport};

#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Process one batch.
    async fn run_once(&self) -> Result<WorkerReport>;
}

/// What one invocation did.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "worker", rename_all = "snake_case")]
pub enum WorkerReport {
    Reclaim(ReclaimReport),
    Sla(SlaReport),
    Retry(RetryReport),
    Health(HealthReport),
}

/// Wall-clock budget for one batch. Items left when it runs out wait for the
/// next invocation; each item's update is independently atomic, so a
/// half-processed batch is fine.
#[derive(Debug, Clone, Copy)]
pub struct BatchBudget {
    started: tokio::time::Instant,
    limit: std::time::Duration,
}

impl BatchBudget {
    pub fn start(limit: std::time::Duration) -> Self {
        Self {
            started: tokio::time::Instant::now(),
            limit,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.started.elapsed() >= self.limit
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }
}
