//! Worker tunables, loaded from TOML.
//!
//! Every field has a default, so an empty file (or none at all) yields the
//! production settings:
//!
//! ```toml
//! batch_budget_seconds = 50
//! poll_interval_seconds = 30
//!
//! [reclaim]
//! lease_minutes = 45
//! batch_size = 50
//! interval_minutes = 10
//!
//! [sla]
//! warning_hours = 4
//! critical_hours = 8
//! batch_size = 20
//! interval_minutes = 60
//!
//! [retry]
//! batch_size = 10
//! max_attempts = 3
//! lease_minutes = 5
//! max_backoff_minutes = 60
//! interval_minutes = 5
//!
//! [health]
//! timeout_seconds = 3
//! alert_window_minutes = 5
//! interval_seconds = 60
//! ```

use std::path::Path;

use chrono::Duration;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::worker::{ReclaimConfig, RetryConfig, SlaConfig};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerSettings {
    pub batch_budget_seconds: u64,
    pub poll_interval_seconds: u64,
    pub reclaim: ReclaimSettings,
    pub sla: SlaSettings,
    pub retry: RetrySettings,
    pub health: HealthSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReclaimSettings {
    pub lease_minutes: i64,
    pub batch_size: usize,
    pub interval_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SlaSettings {
    pub warning_hours: i64,
    pub critical_hours: i64,
    pub batch_size: usize,
    pub interval_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub batch_size: usize,
    pub max_attempts: u32,
    pub lease_minutes: i64,
    pub max_backoff_minutes: i64,
    pub interval_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthSettings {
    pub timeout_seconds: u64,
    pub alert_window_minutes: i64,
    /// Cadence of the health job under `serve`.
    pub interval_seconds: i64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            batch_budget_seconds: 50,
            poll_interval_seconds: 30,
            reclaim: ReclaimSettings::default(),
            sla: SlaSettings::default(),
            retry: RetrySettings::default(),
            health: HealthSettings::default(),
        }
    }
}

impl Default for ReclaimSettings {
    fn default() -> Self {
        Self {
            lease_minutes: 45,
            batch_size: 50,
            interval_minutes: 10,
        }
    }
}

impl Default for SlaSettings {
    fn default() -> Self {
        Self {
            warning_hours: 4,
            critical_hours: 8,
            batch_size: 20,
            interval_minutes: 60,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_attempts: 3,
            lease_minutes: 5,
            max_backoff_minutes: 60,
            interval_minutes: 5,
        }
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: 3,
            alert_window_minutes: 5,
            interval_seconds: 60,
        }
    }
}

impl WorkerSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Parse and validate a TOML document.
    pub fn parse(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("invalid worker settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.sla.critical_hours <= self.sla.warning_hours {
            return Err(Error::Config(
                "sla.critical_hours must be greater than sla.warning_hours".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".to_string()));
        }
        let positive = [
            ("reclaim.lease_minutes", self.reclaim.lease_minutes),
            ("reclaim.interval_minutes", self.reclaim.interval_minutes),
            ("sla.warning_hours", self.sla.warning_hours),
            ("sla.interval_minutes", self.sla.interval_minutes),
            ("retry.lease_minutes", self.retry.lease_minutes),
            ("retry.max_backoff_minutes", self.retry.max_backoff_minutes),
            ("retry.interval_minutes", self.retry.interval_minutes),
            ("health.interval_seconds", self.health.interval_seconds),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v <= 0) {
            return Err(Error::Config(format!("{name} must be positive")));
        }
        Ok(())
    }

    fn budget(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.batch_budget_seconds)
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn reclaim_config(&self) -> ReclaimConfig {
        ReclaimConfig {
            lease: Duration::minutes(self.reclaim.lease_minutes),
            batch_size: self.reclaim.batch_size,
            budget: self.budget(),
        }
    }

    pub fn sla_config(&self) -> SlaConfig {
        SlaConfig {
            warning_threshold: Duration::hours(self.sla.warning_hours),
            critical_threshold: Duration::hours(self.sla.critical_hours),
            batch_size: self.sla.batch_size,
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            batch_size: self.retry.batch_size,
            max_attempts: self.retry.max_attempts,
            lease: Duration::minutes(self.retry.lease_minutes),
            max_backoff: Duration::minutes(self.retry.max_backoff_minutes),
            budget: self.budget(),
        }
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::minutes(self.reclaim.interval_minutes)
    }

    pub fn sla_interval(&self) -> Duration {
        Duration::minutes(self.sla.interval_minutes)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::minutes(self.retry.interval_minutes)
    }

    pub fn probe_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.health.timeout_seconds)
    }

    pub fn alert_window(&self) -> Duration {
        Duration::minutes(self.health.alert_window_minutes)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::seconds(self.health.interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let settings = WorkerSettings::parse("").unwrap();
        assert_eq!(settings, WorkerSettings::default());
        assert_eq!(settings.reclaim_config().lease, Duration::minutes(45));
        assert_eq!(settings.sla_config().critical_threshold, Duration::hours(8));
        assert_eq!(settings.retry_config().max_backoff, Duration::minutes(60));
    }

    #[test]
    fn partial_document_overrides_only_named_fields() {
        let settings = WorkerSettings::parse(
            r#"
            [reclaim]
            lease_minutes = 30

            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(settings.reclaim.lease_minutes, 30);
        assert_eq!(settings.reclaim.batch_size, 50);
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.batch_size, 10);
    }

    #[test]
    fn rejects_inverted_sla_thresholds() {
        let err = WorkerSettings::parse("[sla]\nwarning_hours = 8\ncritical_hours = 4\n");
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn health_job_cadence_is_configurable() {
        assert_eq!(
            WorkerSettings::default().health_interval(),
            Duration::seconds(60)
        );
        let settings = WorkerSettings::parse("[health]\ninterval_seconds = 15\n").unwrap();
        assert_eq!(settings.health_interval(), Duration::seconds(15));
        assert!(WorkerSettings::parse("[health]\ninterval_seconds = 0\n").is_err());
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(WorkerSettings::parse("[reclaim]\nlease = 45\n").is_err());
    }
}
