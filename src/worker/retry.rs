//! Retry coordinator for a named side-effect.
//!
//! Each due entry is leased before the effect runs, so two overlapping
//! batches do not both invoke it for the same attempt. Results are written
//! with an optimistic check on the attempt count read at selection time.
//!
//! Backoff after the k-th failed attempt is `2^k` minutes, capped at
//! `max_backoff`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use opentelemetry::KeyValue;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{Instrument, error, info, warn};

use super::{BatchBudget, Worker, WorkerReport};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::model::*;
use crate::store::RetryStore;
use crate::telemetry::metrics;
use crate::telemetry::worker::{record_batch_result, start_worker_span};

/// The operation being retried. Must tolerate repeated invocation for the
/// same intake.
#[async_trait]
pub trait SideEffect: Send + Sync {
    /// Name entries are queued under.
    fn name(&self) -> &str;

    async fn execute(&self, intake_id: IntakeId) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub batch_size: usize,
    /// Attempts allowed for newly queued entries.
    pub max_attempts: u32,
    /// How long an entry stays leased to the batch running it.
    pub lease: Duration,
    pub max_backoff: Duration,
    pub budget: std::time::Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_attempts: 3,
            lease: Duration::minutes(5),
            max_backoff: Duration::minutes(60),
            budget: std::time::Duration::from_secs(50),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryReport {
    /// Entries whose side-effect was invoked.
    pub processed: usize,
    pub succeeded: usize,
    /// Failed attempts, including those that exhausted the entry.
    pub failed: usize,
    pub exhausted: usize,
    /// Leased or finished by an overlapping run.
    pub skipped: usize,
    /// Store errors while leasing or recording.
    pub errors: usize,
    pub truncated: bool,
}

/// Delay before the next attempt once `attempts` have failed.
pub fn backoff_for(attempts: u32, max_backoff: Duration) -> Duration {
    match 1i64.checked_shl(attempts) {
        Some(minutes) if minutes > 0 && minutes <= max_backoff.num_minutes() => {
            Duration::minutes(minutes)
        }
        _ => max_backoff,
    }
}

enum Attempt {
    Succeeded,
    Failed,
    Exhausted,
    Skipped,
}

pub struct RetryCoordinator {
    store: Arc<dyn RetryStore>,
    effect: Arc<dyn SideEffect>,
    clock: Arc<dyn Clock>,
    config: RetryConfig,
}

impl RetryCoordinator {
    pub fn new(
        store: Arc<dyn RetryStore>,
        effect: Arc<dyn SideEffect>,
        clock: Arc<dyn Clock>,
        config: RetryConfig,
    ) -> Self {
        Self {
            store,
            effect,
            clock,
            config,
        }
    }

    /// Queue a retry after the side-effect's first failure. Due immediately.
    /// A pending entry for the same intake is returned instead of a new one.
    pub async fn schedule_retry(&self, intake_id: IntakeId, error: &str) -> Result<RetryEntry> {
        let entry = self
            .store
            .enqueue_retry(
                intake_id,
                self.effect.name(),
                self.config.max_attempts,
                error,
                self.clock.now(),
            )
            .await?;
        info!(%intake_id, retry_id = %entry.id, side_effect = self.effect.name(), "retry queued");
        Ok(entry)
    }

    pub async fn run_retry_batch(&self) -> Result<RetryReport> {
        let span = start_worker_span("retry");
        let budget = BatchBudget::start(self.config.budget);

        let report = async {
            let due = self
                .store
                .due_retries(
                    self.effect.name(),
                    self.clock.now(),
                    self.config.batch_size,
                )
                .await?;

            let mut report = RetryReport::default();
            for entry in due {
                if budget.exhausted() {
                    warn!("retry budget exhausted, leaving rest for next run");
                    report.truncated = true;
                    break;
                }
                match self.attempt(&entry).await {
                    Ok(Attempt::Succeeded) => {
                        report.processed += 1;
                        report.succeeded += 1;
                    }
                    Ok(Attempt::Failed) => {
                        report.processed += 1;
                        report.failed += 1;
                    }
                    Ok(Attempt::Exhausted) => {
                        report.processed += 1;
                        report.failed += 1;
                        report.exhausted += 1;
                    }
                    Ok(Attempt::Skipped) => report.skipped += 1,
                    Err(e) => {
                        report.errors += 1;
                        error!(
                            retry_id = %entry.id,
                            intake_id = %entry.intake_id,
                            error = %e,
                            "retry bookkeeping failed"
                        );
                    }
                }
            }

            info!(
                processed = report.processed,
                succeeded = report.succeeded,
                failed = report.failed,
                exhausted = report.exhausted,
                "retry batch done"
            );
            Ok::<_, Error>(report)
        }
        .instrument(span.clone())
        .await?;

        record_batch_result(
            &span,
            "retry",
            report.processed,
            report.truncated,
            budget.elapsed(),
        );
        Ok(report)
    }

    async fn attempt(&self, entry: &RetryEntry) -> Result<Attempt> {
        let now = self.clock.now();
        if !self
            .store
            .lease_retry(entry.id, entry.attempts, now, now + self.config.lease)
            .await?
        {
            return Ok(Attempt::Skipped);
        }

        let result = self.execute_isolated(entry.intake_id).await;
        let now = self.clock.now();
        let attempts = entry.attempts + 1;

        let (recorded, attempt) = match result {
            Ok(()) => {
                let recorded = self
                    .store
                    .record_retry_success(entry.id, entry.attempts, now)
                    .await?;
                info!(retry_id = %entry.id, intake_id = %entry.intake_id, attempts, "retry succeeded");
                (recorded, Attempt::Succeeded)
            }
            Err(e) => {
                let exhausted = attempts >= entry.max_attempts;
                let failure = RetryFailure {
                    error: e.to_string(),
                    next_retry_at: now + backoff_for(attempts, self.config.max_backoff),
                    exhausted,
                };
                let recorded = self
                    .store
                    .record_retry_failure(entry.id, entry.attempts, &failure, now)
                    .await?;
                if exhausted {
                    error!(
                        retry_id = %entry.id,
                        intake_id = %entry.intake_id,
                        attempts,
                        error = %failure.error,
                        "retries exhausted, giving up"
                    );
                    (recorded, Attempt::Exhausted)
                } else {
                    warn!(
                        retry_id = %entry.id,
                        intake_id = %entry.intake_id,
                        attempts,
                        next_retry_at = %failure.next_retry_at,
                        error = %failure.error,
                        "retry failed, backing off"
                    );
                    (recorded, Attempt::Failed)
                }
            }
        };

        if !recorded {
            warn!(retry_id = %entry.id, "retry entry changed underneath this run, result dropped");
            return Ok(Attempt::Skipped);
        }

        let result = match attempt {
            Attempt::Succeeded => "succeeded",
            Attempt::Failed => "failed",
            Attempt::Exhausted => "exhausted",
            Attempt::Skipped => "skipped",
        };
        metrics::retry_attempts().add(
            1,
            &[
                KeyValue::new("side_effect", self.effect.name().to_string()),
                KeyValue::new("result", result),
            ],
        );
        Ok(attempt)
    }

    /// Run the effect on its own task so a panic counts as a failed attempt
    /// instead of unwinding through the batch.
    async fn execute_isolated(&self, intake_id: IntakeId) -> Result<()> {
        let effect = Arc::clone(&self.effect);
        match tokio::spawn(async move { effect.execute(intake_id).await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(Error::SideEffect(format!(
                "{} panicked: {}",
                self.effect.name(),
                panic_message(e.into_panic())
            ))),
            Err(e) => Err(Error::SideEffect(format!(
                "{} task failed: {e}",
                self.effect.name()
            ))),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[async_trait]
impl Worker for RetryCoordinator {
    fn name(&self) -> &'static str {
        "retry"
    }

    async fn run_once(&self) -> Result<WorkerReport> {
        self.run_retry_batch().await.map(WorkerReport::Retry)
    }
}

// ---------------------------------------------------------------------------
// Draft generation over HTTP
// ---------------------------------------------------------------------------

/// Asks the application's draft service to (re)generate the AI draft for an
/// intake.
pub struct HttpDraftGenerator {
    client: reqwest::Client,
    endpoint: String,
    token: Option<SecretString>,
}

impl HttpDraftGenerator {
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<SecretString>,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token,
        })
    }
}

#[async_trait]
impl SideEffect for HttpDraftGenerator {
    fn name(&self) -> &str {
        DRAFT_GENERATION
    }

    async fn execute(&self, intake_id: IntakeId) -> Result<()> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "intake_id": intake_id }));
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token.expose_secret());
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::SideEffect(format!(
                "draft service returned {status}: {body}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let cap = Duration::minutes(60);
        assert_eq!(backoff_for(1, cap), Duration::minutes(2));
        assert_eq!(backoff_for(2, cap), Duration::minutes(4));
        assert_eq!(backoff_for(3, cap), Duration::minutes(8));
    }

    #[test]
    fn backoff_is_capped() {
        let cap = Duration::minutes(60);
        assert_eq!(backoff_for(6, cap), Duration::minutes(60));
        assert_eq!(backoff_for(63, cap), cap);
        assert_eq!(backoff_for(200, cap), cap);
    }
}
