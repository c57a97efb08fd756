//! Queue-age SLA monitor.
//!
//! Measures how long paid, unclaimed intakes have waited since payment.
//! This is independent of the claim lease: it watches work nobody has
//! picked up, not work somebody is sitting on.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use opentelemetry::KeyValue;
use serde::Serialize;
use serde_json::json;
use tracing::{Instrument, info};

use super::{Worker, WorkerReport};
use crate::alert::{Alert, AlertLevel, AlertSink};
use crate::clock::Clock;
use crate::error::Result;
use crate::store::WorkStore;
use crate::telemetry::metrics;
use crate::telemetry::worker::{record_batch_result, start_worker_span};

/// How many of the oldest waits a critical alert carries.
const OLDEST_IN_ALERT: usize = 5;

#[derive(Debug, Clone)]
pub struct SlaConfig {
    pub warning_threshold: Duration,
    pub critical_threshold: Duration,
    pub batch_size: usize,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            warning_threshold: Duration::hours(4),
            critical_threshold: Duration::hours(8),
            batch_size: 20,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SlaReport {
    pub stale_count: usize,
    pub critical_count: usize,
    pub warning_count: usize,
    pub oldest_wait_hours: f64,
}

pub struct SlaMonitor {
    store: Arc<dyn WorkStore>,
    alerts: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
    config: SlaConfig,
}

impl SlaMonitor {
    pub fn new(
        store: Arc<dyn WorkStore>,
        alerts: Arc<dyn AlertSink>,
        clock: Arc<dyn Clock>,
        config: SlaConfig,
    ) -> Self {
        Self {
            store,
            alerts,
            clock,
            config,
        }
    }

    /// Scan the oldest waiting intakes and send at most one alert.
    pub async fn check_stale_queue(&self) -> Result<SlaReport> {
        let span = start_worker_span("sla");
        let started = tokio::time::Instant::now();

        let report = async {
            let now = self.clock.now();
            let waiting = self
                .store
                .list_waiting_since(now - self.config.warning_threshold, self.config.batch_size)
                .await?;

            let critical_before = now - self.config.critical_threshold;
            let waits: Vec<f64> = waiting
                .iter()
                .filter_map(|i| i.paid_at)
                .map(|paid_at| hours(now - paid_at))
                .collect();
            let critical_count = waiting
                .iter()
                .filter(|i| i.paid_at.is_some_and(|t| t < critical_before))
                .count();

            let report = SlaReport {
                stale_count: waiting.len(),
                critical_count,
                warning_count: waiting.len() - critical_count,
                oldest_wait_hours: waits.iter().copied().fold(0.0, f64::max),
            };

            self.emit_alert(&report, &waits);
            info!(
                stale = report.stale_count,
                critical = report.critical_count,
                warning = report.warning_count,
                oldest_wait_hours = report.oldest_wait_hours,
                "sla check done"
            );
            Ok::<_, crate::error::Error>(report)
        }
        .instrument(span.clone())
        .await?;

        record_batch_result(&span, "sla", report.stale_count, false, started.elapsed());
        Ok(report)
    }

    fn emit_alert(&self, report: &SlaReport, waits: &[f64]) {
        if report.critical_count > 0 {
            metrics::sla_breaches().add(
                report.critical_count as u64,
                &[KeyValue::new("severity", "critical")],
            );
        }
        if report.warning_count > 0 {
            metrics::sla_breaches().add(
                report.warning_count as u64,
                &[KeyValue::new("severity", "warning")],
            );
        }

        let extra = json!({
            "critical_count": report.critical_count,
            "warning_count": report.warning_count,
            "oldest_wait_hours": waits.iter().take(OLDEST_IN_ALERT).collect::<Vec<_>>(),
        });
        let alert = if report.critical_count > 0 {
            Alert::new("critical_sla_breach", AlertLevel::Error)
        } else if report.warning_count > 0 {
            Alert::new("sla_warning", AlertLevel::Warning)
        } else {
            return;
        };
        self.alerts.capture_message(
            alert
                .tag("subsystem", "review_queue")
                .tag("alert_type", "queue_sla")
                .extra(extra),
        );
    }
}

/// Hours, rounded to one decimal place.
fn hours(d: Duration) -> f64 {
    (d.num_seconds() as f64 / 360.0).round() / 10.0
}

#[async_trait]
impl Worker for SlaMonitor {
    fn name(&self) -> &'static str {
        "sla"
    }

    async fn run_once(&self) -> Result<WorkerReport> {
        self.check_stale_queue().await.map(WorkerReport::Sla)
    }
}
