//! Liveness and dependency health.
//!
//! Each dependency is probed on its own task under its own timeout, so a
//! hanging or panicking probe reports an error for its service only. The
//! check is read-only; failing services raise an alert, at most one per
//! service per throttle window. The throttle lives as long as the checker,
//! which is why `serve` keeps one checker as a scheduled [`Worker`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::alert::{Alert, AlertLevel, AlertSink, AlertThrottle};
use crate::db::Db;
use crate::error::{Error, Result};
use crate::telemetry::metrics;
use crate::worker::{Worker, WorkerReport};

/// One dependency that can be checked.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self) -> Result<()>;
}

/// `SELECT 1` against the pool.
pub struct DbProbe {
    db: Arc<Db>,
}

impl DbProbe {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl HealthProbe for DbProbe {
    fn name(&self) -> &str {
        "database"
    }

    async fn check(&self) -> Result<()> {
        self.db.health_check().await
    }
}

/// GET against a health URL; any non-2xx status is a failure.
pub struct HttpProbe {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> Result<()> {
        self.client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub checks: BTreeMap<String, CheckResult>,
}

impl HealthReport {
    pub fn status_code(&self) -> u16 {
        if self.healthy { 200 } else { 503 }
    }
}

pub struct HealthChecker {
    probes: Vec<Arc<dyn HealthProbe>>,
    timeout: Duration,
    throttle: AlertThrottle,
    alerts: Arc<dyn AlertSink>,
}

impl HealthChecker {
    pub fn new(throttle: AlertThrottle, alerts: Arc<dyn AlertSink>, timeout: Duration) -> Self {
        Self {
            probes: Vec::new(),
            timeout,
            throttle,
            alerts,
        }
    }

    /// Register a probe. Names key the report, so they must be unique.
    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Result<Self> {
        if self.probes.iter().any(|p| p.name() == probe.name()) {
            return Err(Error::Config(format!(
                "duplicate health probe: {}",
                probe.name()
            )));
        }
        self.probes.push(probe);
        Ok(self)
    }

    /// Probe every dependency concurrently and alert on failures.
    pub async fn check(&self) -> HealthReport {
        let mut set = JoinSet::new();
        for probe in &self.probes {
            set.spawn(run_probe(Arc::clone(probe), self.timeout));
        }

        let mut checks = BTreeMap::new();
        while let Some(joined) = set.join_next().await {
            // `run_probe` isolates the probe itself; this only fails on abort.
            let (name, result) = match joined {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "health probe task failed");
                    continue;
                }
            };
            if let Some(ref error) = result.error {
                warn!(service = %name, %error, "dependency unhealthy");
                self.alert_failure(&name, error).await;
            }
            checks.insert(name, result);
        }

        for probe in &self.probes {
            if !checks.contains_key(probe.name()) {
                let error = "probe did not report".to_string();
                self.alert_failure(probe.name(), &error).await;
                checks.insert(
                    probe.name().to_string(),
                    CheckResult {
                        status: CheckStatus::Error,
                        latency_ms: None,
                        error: Some(error),
                    },
                );
            }
        }

        let healthy = checks.values().all(|c| c.status == CheckStatus::Ok);
        info!(healthy, services = checks.len(), "health check done");
        HealthReport { healthy, checks }
    }

    async fn alert_failure(&self, service: &str, error: &str) {
        if !self.throttle.should_alert(&format!("health:{service}")).await {
            return;
        }
        self.alerts.capture_message(
            Alert::new(format!("Health check failed: {service}"), AlertLevel::Error)
                .tag("subsystem", "health")
                .tag("service", service)
                .extra(json!({ "error": error })),
        );
    }
}

#[async_trait]
impl Worker for HealthChecker {
    fn name(&self) -> &'static str {
        "health"
    }

    async fn run_once(&self) -> Result<WorkerReport> {
        Ok(WorkerReport::Health(self.check().await))
    }
}

async fn run_probe(probe: Arc<dyn HealthProbe>, timeout: Duration) -> (String, CheckResult) {
    let started = tokio::time::Instant::now();
    let task = {
        let probe = Arc::clone(&probe);
        tokio::spawn(async move { probe.check().await })
    };
    let abort = task.abort_handle();
    let outcome = match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(Error::Other(format!("probe failed: {e}"))),
        Err(_) => {
            abort.abort();
            Err(Error::Other(format!(
                "timed out after {}ms",
                timeout.as_millis()
            )))
        }
    };
    let latency_ms = started.elapsed().as_millis() as u64;

    let result = match outcome {
        Ok(()) => CheckResult {
            status: CheckStatus::Ok,
            latency_ms: Some(latency_ms),
            error: None,
        },
        Err(e) => CheckResult {
            status: CheckStatus::Error,
            latency_ms: None,
            error: Some(e.to_string()),
        },
    };
    let status = match result.status {
        CheckStatus::Ok => "ok",
        CheckStatus::Error => "error",
    };
    metrics::health_checks().add(
        1,
        &[
            KeyValue::new("dependency", probe.name().to_string()),
            KeyValue::new("status", status),
        ],
    );
    (probe.name().to_string(), result)
}
