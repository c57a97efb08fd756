//! Stale claim reclaimer.
//!
//! A claim older than the lease goes back to the queue. The reclaim update
//! re-checks the lease in its WHERE clause, so two overlapping runs reclaim
//! each row at most once and never touch a claim that was released and
//! re-taken in between.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use serde::Serialize;
use tracing::{Instrument, error, info, warn};

use super::{BatchBudget, Worker, WorkerReport};
use crate::clock::Clock;
use crate::error::Result;
use crate::store::WorkStore;
use crate::telemetry::metrics;
use crate::telemetry::worker::{record_batch_result, start_worker_span};

#[derive(Debug, Clone)]
pub struct ReclaimConfig {
    /// How long a claim stays valid without release.
    pub lease: Duration,
    pub batch_size: usize,
    pub budget: std::time::Duration,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            lease: Duration::minutes(45),
            batch_size: 50,
            budget: std::time::Duration::from_secs(50),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    pub scanned: usize,
    pub reclaimed: usize,
    /// Already reclaimed, released or re-claimed by someone else.
    pub skipped: usize,
    pub failed: usize,
    pub truncated: bool,
}

pub struct StaleClaimReclaimer {
    store: Arc<dyn WorkStore>,
    clock: Arc<dyn Clock>,
    config: ReclaimConfig,
}

impl StaleClaimReclaimer {
    pub fn new(store: Arc<dyn WorkStore>, clock: Arc<dyn Clock>, config: ReclaimConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub async fn reclaim_stale(&self) -> Result<ReclaimReport> {
        let span = start_worker_span("reclaim");
        let budget = BatchBudget::start(self.config.budget);

        let report = async {
            let now = self.clock.now();
            let cutoff = now - self.config.lease;
            let stale = self
                .store
                .list_stale_claims(cutoff, self.config.batch_size)
                .await?;

            let mut report = ReclaimReport {
                scanned: stale.len(),
                ..Default::default()
            };

            for (i, item) in stale.into_iter().enumerate() {
                if budget.exhausted() {
                    warn!(
                        remaining = report.scanned - i,
                        "reclaim budget exhausted, leaving rest for next run"
                    );
                    report.truncated = true;
                    break;
                }
                match self
                    .store
                    .reclaim_if_stale(item.id, cutoff, self.clock.now())
                    .await
                {
                    Ok(true) => {
                        report.reclaimed += 1;
                        metrics::claims_reclaimed().add(1, &[]);
                        let held_minutes = item
                            .claimed_at
                            .map(|t| (now - t).num_minutes())
                            .unwrap_or_default();
                        warn!(
                            intake_id = %item.id,
                            reviewer = ?item.claimed_by,
                            held_minutes,
                            "stale claim reclaimed"
                        );
                    }
                    Ok(false) => report.skipped += 1,
                    Err(e) => {
                        report.failed += 1;
                        error!(intake_id = %item.id, error = %e, "reclaim failed");
                    }
                }
            }

            info!(
                scanned = report.scanned,
                reclaimed = report.reclaimed,
                skipped = report.skipped,
                failed = report.failed,
                "reclaim batch done"
            );
            Ok::<_, crate::error::Error>(report)
        }
        .instrument(span.clone())
        .await?;

        record_batch_result(
            &span,
            "reclaim",
            report.scanned,
            report.truncated,
            budget.elapsed(),
        );
        Ok(report)
    }
}

#[async_trait]
impl Worker for StaleClaimReclaimer {
    fn name(&self) -> &'static str {
        "reclaim"
    }

    async fn run_once(&self) -> Result<WorkerReport> {
        self.reclaim_stale().await.map(WorkerReport::Reclaim)
    }
}
