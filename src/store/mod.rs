//! Persistence seams.
//!
//! Claim, reclaim, retry and ledger logic operate exclusively through these
//! traits. Every mutating method is a single-row conditional update: it
//! applies only if the row still matches the precondition and reports
//! whether it did. Overlapping invocations coordinate through that, never
//! through in-process locks.
//!
//! Two backends: [`crate::db::Db`] (Postgres) and [`memory::MemoryStore`].
//! Methods take `now` explicitly so workers stay on the injected clock.

pub mod memory;

use crate::error::Result;
use crate::model::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::MemoryStore;

#[async_trait]
pub trait WorkStore: Send + Sync {
    // ── Lifecycle ──

    async fn insert_intake(&self, new: &NewIntake, now: DateTime<Utc>) -> Result<WorkItem>;
    async fn get_intake(&self, id: IntakeId) -> Result<Option<WorkItem>>;

    /// `submitted → paid`. Records `paid_at`.
    async fn mark_paid(&self, id: IntakeId, now: DateTime<Utc>) -> Result<bool>;

    /// `pending_info → paid`, returning the intake to the queue.
    async fn requeue_pending_info(&self, id: IntakeId, now: DateTime<Utc>) -> Result<bool>;

    // ── Claims ──

    /// `paid → claimed` iff nobody holds the claim. Returns the claimed row.
    async fn try_claim(
        &self,
        id: IntakeId,
        reviewer: &ReviewerId,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkItem>>;

    /// `claimed → paid` iff `reviewer` holds the claim.
    async fn release_claim(
        &self,
        id: IntakeId,
        reviewer: &ReviewerId,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// `claimed → to` iff `reviewer` holds the claim. Clears the claim.
    async fn transition_owned(
        &self,
        id: IntakeId,
        reviewer: &ReviewerId,
        to: IntakeStatus,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Claimed items whose claim was taken before `claimed_before`, oldest first.
    async fn list_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkItem>>;

    /// `claimed → paid` iff the claim is still older than `claimed_before`.
    async fn reclaim_if_stale(
        &self,
        id: IntakeId,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    // ── Queue age ──

    /// Paid, unclaimed items paid before `paid_before`, oldest first.
    async fn list_waiting_since(
        &self,
        paid_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkItem>>;
}

#[async_trait]
pub trait RetryStore: Send + Sync {
    /// Queue a retry unless a pending one exists for the same intake and
    /// effect, in which case that one is returned.
    async fn enqueue_retry(
        &self,
        intake_id: IntakeId,
        side_effect: &str,
        max_attempts: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<RetryEntry>;

    async fn get_retry(&self, id: RetryId) -> Result<Option<RetryEntry>>;

    /// Pending entries for `side_effect` due at `now`, by `next_retry_at`.
    async fn due_retries(
        &self,
        side_effect: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RetryEntry>>;

    /// Push `next_retry_at` to `lease_until` iff the entry is still pending,
    /// due, and at `attempts`. Keeps overlapping batches off the same entry.
    async fn lease_retry(
        &self,
        id: RetryId,
        attempts: u32,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool>;

    /// Mark succeeded iff still pending at `attempts`.
    async fn record_retry_success(
        &self,
        id: RetryId,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Record a failed attempt iff still pending at `attempts`.
    async fn record_retry_failure(
        &self,
        id: RetryId,
        attempts: u32,
        failure: &RetryFailure,
        now: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Append-only audit storage. Entries are never updated or deleted.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_audit(
        &self,
        entry: NewAuditEntry,
        now: DateTime<Utc>,
    ) -> Result<ComplianceAuditEntry>;

    /// Entries for a request in creation order.
    async fn audit_timeline(&self, request_id: RequestId) -> Result<Vec<ComplianceAuditEntry>>;
}
