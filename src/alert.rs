//! Alerting: a fire-and-forget sink and a per-key throttle.
//!
//! The throttle remembers when each key last alerted through a
//! [`ThrottleStore`]. The shipped [`MemoryThrottleStore`] is process-local:
//! it resets on restart and is not shared between instances, so each
//! instance may alert once per window.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use opentelemetry::KeyValue;
use serde::Serialize;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::telemetry::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
}

impl AlertLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
        }
    }
}

/// One alert message with its routing tags and free-form detail.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub message: String,
    pub level: AlertLevel,
    pub tags: BTreeMap<String, String>,
    pub extra: serde_json::Value,
}

impl Alert {
    pub fn new(message: impl Into<String>, level: AlertLevel) -> Self {
        Self {
            message: message.into(),
            level,
            tags: BTreeMap::new(),
            extra: serde_json::Value::Null,
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = extra;
        self
    }
}

/// Where alerts go. Delivery failures are the sink's problem; callers never
/// wait on or react to them.
pub trait AlertSink: Send + Sync {
    fn capture_message(&self, alert: Alert);
}

/// Emits alerts as tracing events, which the OTLP log bridge exports.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn capture_message(&self, alert: Alert) {
        metrics::alerts_emitted().add(
            1,
            &[
                KeyValue::new("alert", alert.message.clone()),
                KeyValue::new("level", alert.level.as_str()),
            ],
        );
        let tags = serde_json::to_string(&alert.tags).unwrap_or_default();
        match alert.level {
            AlertLevel::Error => {
                tracing::error!(alert = %alert.message, %tags, extra = %alert.extra, "alert")
            }
            AlertLevel::Warning => {
                tracing::warn!(alert = %alert.message, %tags, extra = %alert.extra, "alert")
            }
            AlertLevel::Info => {
                tracing::info!(alert = %alert.message, %tags, extra = %alert.extra, "alert")
            }
        }
    }
}

/// Keeps every alert in memory. For tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .map(|a| a.clone())
            .unwrap_or_default()
    }
}

impl AlertSink for MemoryAlertSink {
    fn capture_message(&self, alert: Alert) {
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(alert);
        }
    }
}

// ---------------------------------------------------------------------------
// Throttle
// ---------------------------------------------------------------------------

/// Key → last-alert time, with an atomic check-and-set.
#[async_trait]
pub trait ThrottleStore: Send + Sync {
    /// Record `now` for `key` and return true iff the previous record is
    /// absent or at least `window` old.
    async fn try_acquire(&self, key: &str, now: DateTime<Utc>, window: Duration) -> Result<bool>;
}

#[derive(Debug, Default)]
pub struct MemoryThrottleStore {
    last: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryThrottleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThrottleStore for MemoryThrottleStore {
    async fn try_acquire(&self, key: &str, now: DateTime<Utc>, window: Duration) -> Result<bool> {
        let mut last = self
            .last
            .lock()
            .map_err(|e| Error::Other(format!("throttle lock poisoned: {e}")))?;
        match last.get(key) {
            Some(prev) if now - *prev < window => Ok(false),
            _ => {
                last.insert(key.to_string(), now);
                Ok(true)
            }
        }
    }
}

/// At most one alert per key per window.
#[derive(Clone)]
pub struct AlertThrottle {
    store: Arc<dyn ThrottleStore>,
    clock: Arc<dyn Clock>,
    window: Duration,
}

impl AlertThrottle {
    pub fn new(store: Arc<dyn ThrottleStore>, clock: Arc<dyn Clock>, window: Duration) -> Self {
        Self {
            store,
            clock,
            window,
        }
    }

    /// True if an alert for `key` may go out now. A failing store lets the
    /// alert through.
    pub async fn should_alert(&self, key: &str) -> bool {
        match self
            .store
            .try_acquire(key, self.clock.now(), self.window)
            .await
        {
            Ok(allowed) => allowed,
            Err(e) => {
                tracing::warn!(key, error = %e, "alert throttle unavailable, not suppressing");
                true
            }
        }
    }
}
