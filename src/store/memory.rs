//! In-process store.
//!
//! Each conditional update runs entirely under one mutex, which gives the
//! same single-row atomicity the database provides. Used by tests and for
//! running the workers without Postgres.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{AuditStore, RetryStore, WorkStore};
use crate::error::{Error, Result};
use crate::model::*;

#[derive(Default)]
struct Inner {
    intakes: HashMap<IntakeId, WorkItem>,
    retries: HashMap<RetryId, RetryEntry>,
    audit: Vec<ComplianceAuditEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| Error::Other(format!("memory store lock poisoned: {e}")))
    }

    /// Overwrite an intake wholesale. Test setup only; bypasses every
    /// precondition.
    pub fn put_intake(&self, item: WorkItem) -> Result<()> {
        self.lock()?.intakes.insert(item.id, item);
        Ok(())
    }

    /// Overwrite a retry entry wholesale. Test setup only.
    pub fn put_retry(&self, entry: RetryEntry) -> Result<()> {
        self.lock()?.retries.insert(entry.id, entry);
        Ok(())
    }

    /// Total audit entries across all requests.
    pub fn audit_len(&self) -> Result<usize> {
        Ok(self.lock()?.audit.len())
    }
}

fn oldest_first<T>(
    mut items: Vec<T>,
    key: impl Fn(&T) -> Option<DateTime<Utc>>,
    limit: usize,
) -> Vec<T> {
    items.sort_by_key(key);
    items.truncate(limit);
    items
}

#[async_trait]
impl WorkStore for MemoryStore {
    async fn insert_intake(&self, new: &NewIntake, now: DateTime<Utc>) -> Result<WorkItem> {
        let mut inner = self.lock()?;
        if inner.intakes.contains_key(&new.id) {
            return Err(Error::Other(format!("intake {} already exists", new.id)));
        }
        let item = WorkItem {
            id: new.id,
            request_type: new.request_type,
            status: IntakeStatus::Submitted,
            payment_status: PaymentStatus::Pending,
            claimed_by: None,
            claimed_at: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };
        inner.intakes.insert(item.id, item.clone());
        Ok(item)
    }

    async fn get_intake(&self, id: IntakeId) -> Result<Option<WorkItem>> {
        Ok(self.lock()?.intakes.get(&id).cloned())
    }

    async fn mark_paid(&self, id: IntakeId, now: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.lock()?;
        match inner.intakes.get_mut(&id) {
            Some(item) if item.status == IntakeStatus::Submitted => {
                item.status = IntakeStatus::Paid;
                item.payment_status = PaymentStatus::Paid;
                item.paid_at = Some(now);
                item.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn requeue_pending_info(&self, id: IntakeId, now: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.lock()?;
        match inner.intakes.get_mut(&id) {
            Some(item) if item.status == IntakeStatus::PendingInfo => {
                item.status = IntakeStatus::Paid;
                item.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn try_claim(
        &self,
        id: IntakeId,
        reviewer: &ReviewerId,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkItem>> {
        let mut inner = self.lock()?;
        match inner.intakes.get_mut(&id) {
            Some(item) if item.status == IntakeStatus::Paid && item.claimed_by.is_none() => {
                item.status = IntakeStatus::Claimed;
                item.claimed_by = Some(reviewer.clone());
                item.claimed_at = Some(now);
                item.updated_at = now;
                Ok(Some(item.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn release_claim(
        &self,
        id: IntakeId,
        reviewer: &ReviewerId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.transition_owned(id, reviewer, IntakeStatus::Paid, now)
            .await
    }

    async fn transition_owned(
        &self,
        id: IntakeId,
        reviewer: &ReviewerId,
        to: IntakeStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if !IntakeStatus::Claimed.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: IntakeStatus::Claimed.to_string(),
                to: to.to_string(),
            });
        }
        let mut inner = self.lock()?;
        match inner.intakes.get_mut(&id) {
            Some(item)
                if item.status == IntakeStatus::Claimed
                    && item.claimed_by.as_ref() == Some(reviewer) =>
            {
                item.status = to;
                item.claimed_by = None;
                item.claimed_at = None;
                item.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkItem>> {
        let inner = self.lock()?;
        let stale = inner
            .intakes
            .values()
            .filter(|i| {
                i.status == IntakeStatus::Claimed && i.claimed_at.is_some_and(|t| t < claimed_before)
            })
            .cloned()
            .collect();
        Ok(oldest_first(stale, |i| i.claimed_at, limit))
    }

    async fn reclaim_if_stale(
        &self,
        id: IntakeId,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.lock()?;
        match inner.intakes.get_mut(&id) {
            Some(item)
                if item.status == IntakeStatus::Claimed
                    && item.claimed_at.is_some_and(|t| t < claimed_before) =>
            {
                item.status = IntakeStatus::Paid;
                item.claimed_by = None;
                item.claimed_at = None;
                item.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_waiting_since(
        &self,
        paid_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkItem>> {
        let inner = self.lock()?;
        let waiting = inner
            .intakes
            .values()
            .filter(|i| {
                i.status == IntakeStatus::Paid
                    && i.payment_status == PaymentStatus::Paid
                    && i.paid_at.is_some_and(|t| t < paid_before)
            })
            .cloned()
            .collect();
        Ok(oldest_first(waiting, |i| i.paid_at, limit))
    }
}

#[async_trait]
impl RetryStore for MemoryStore {
    async fn enqueue_retry(
        &self,
        intake_id: IntakeId,
        side_effect: &str,
        max_attempts: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<RetryEntry> {
        let mut inner = self.lock()?;
        if let Some(existing) = inner.retries.values().find(|e| {
            e.intake_id == intake_id && e.side_effect == side_effect && e.completed_at.is_none()
        }) {
            return Ok(existing.clone());
        }
        let entry = RetryEntry {
            id: RetryId::new(),
            intake_id,
            side_effect: side_effect.to_string(),
            attempts: 0,
            max_attempts,
            next_retry_at: now,
            completed_at: None,
            outcome: RetryOutcome::Pending,
            last_error: Some(error.to_string()),
            created_at: now,
            updated_at: now,
        };
        inner.retries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn get_retry(&self, id: RetryId) -> Result<Option<RetryEntry>> {
        Ok(self.lock()?.retries.get(&id).cloned())
    }

    async fn due_retries(
        &self,
        side_effect: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RetryEntry>> {
        let inner = self.lock()?;
        let due = inner
            .retries
            .values()
            .filter(|e| e.side_effect == side_effect && e.is_due(now))
            .cloned()
            .collect();
        Ok(oldest_first(due, |e| Some(e.next_retry_at), limit))
    }

    async fn lease_retry(
        &self,
        id: RetryId,
        attempts: u32,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.lock()?;
        match inner.retries.get_mut(&id) {
            Some(e) if e.attempts == attempts && e.is_due(now) => {
                e.next_retry_at = lease_until;
                e.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_retry_success(
        &self,
        id: RetryId,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.lock()?;
        match inner.retries.get_mut(&id) {
            Some(e) if e.attempts == attempts && e.completed_at.is_none() => {
                e.attempts += 1;
                e.completed_at = Some(now);
                e.outcome = RetryOutcome::Succeeded;
                e.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_retry_failure(
        &self,
        id: RetryId,
        attempts: u32,
        failure: &RetryFailure,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.lock()?;
        match inner.retries.get_mut(&id) {
            Some(e) if e.attempts == attempts && e.completed_at.is_none() => {
                e.attempts += 1;
                e.next_retry_at = failure.next_retry_at;
                e.last_error = Some(failure.error.clone());
                if failure.exhausted {
                    e.completed_at = Some(now);
                    e.outcome = RetryOutcome::Exhausted;
                }
                e.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append_audit(
        &self,
        entry: NewAuditEntry,
        now: DateTime<Utc>,
    ) -> Result<ComplianceAuditEntry> {
        let mut inner = self.lock()?;
        let seq = inner.audit.len() as i64 + 1;
        let stored = entry.into_entry(AuditId::new(), seq, now);
        inner.audit.push(stored.clone());
        Ok(stored)
    }

    async fn audit_timeline(&self, request_id: RequestId) -> Result<Vec<ComplianceAuditEntry>> {
        let inner = self.lock()?;
        Ok(inner
            .audit
            .iter()
            .filter(|e| e.request_id == request_id)
            .cloned()
            .collect())
    }
}
