//! Claim manager: exclusive hand-out of paid intakes to reviewers.
//!
//! Mutual exclusion comes entirely from the store's conditional update.
//! Losing a race is a normal outcome ([`ClaimOutcome::Rejected`]), not an
//! error. No fairness is promised between racing reviewers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde::Serialize;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::ledger::ComplianceLedger;
use crate::model::*;
use crate::store::WorkStore;
use crate::telemetry::metrics;

/// Result of trying to take a claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ClaimOutcome {
    Acquired { claimed_at: DateTime<Utc> },
    Rejected { reason: ClaimRejection },
}

impl ClaimOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, ClaimOutcome::Acquired { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimRejection {
    /// Someone else holds it.
    AlreadyClaimed,
    /// Not in the queue (unpaid, pending info, or finished).
    NotClaimable(IntakeStatus),
}

impl ClaimRejection {
    pub fn as_str(self) -> &'static str {
        match self {
            ClaimRejection::AlreadyClaimed => "already_claimed",
            ClaimRejection::NotClaimable(_) => "not_claimable",
        }
    }
}

#[derive(Clone)]
pub struct ClaimManager {
    store: Arc<dyn WorkStore>,
    ledger: ComplianceLedger,
    clock: Arc<dyn Clock>,
}

impl ClaimManager {
    pub fn new(
        store: Arc<dyn WorkStore>,
        ledger: ComplianceLedger,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            ledger,
            clock,
        }
    }

    /// Take the claim on a paid, unclaimed intake.
    ///
    /// On success a `clinician_opened_request` entry is appended. A ledger
    /// failure is logged by the ledger and does not undo the claim.
    pub async fn acquire_claim(
        &self,
        intake_id: IntakeId,
        reviewer: &ReviewerId,
    ) -> Result<ClaimOutcome> {
        let now = self.clock.now();
        if let Some(item) = self.store.try_claim(intake_id, reviewer, now).await? {
            metrics::claim_attempts().add(1, &[KeyValue::new("result", "acquired")]);
            info!(%intake_id, %reviewer, "claim acquired");

            self.ledger
                .record_clinician_opened(AuditContext::clinician(
                    intake_id,
                    item.request_type,
                    reviewer,
                ))
                .await;
            return Ok(ClaimOutcome::Acquired { claimed_at: now });
        }

        let item = self.require(intake_id).await?;
        let reason = match item.status {
            // Paid again by the time of the read: a holder released in between.
            IntakeStatus::Claimed | IntakeStatus::Paid => ClaimRejection::AlreadyClaimed,
            status => ClaimRejection::NotClaimable(status),
        };
        metrics::claim_attempts().add(1, &[KeyValue::new("result", reason.as_str())]);
        info!(%intake_id, %reviewer, reason = reason.as_str(), "claim not acquired");
        Ok(ClaimOutcome::Rejected { reason })
    }

    /// Give the intake back to the queue. Only the holder can release;
    /// anyone else gets `false` and nothing changes.
    pub async fn release_claim(&self, intake_id: IntakeId, reviewer: &ReviewerId) -> Result<bool> {
        let released = self
            .store
            .release_claim(intake_id, reviewer, self.clock.now())
            .await?;
        self.count_exit(IntakeStatus::Paid, released);
        if released {
            info!(%intake_id, %reviewer, "claim released");
        } else {
            warn!(%intake_id, %reviewer, "release ignored: reviewer does not hold the claim");
        }
        Ok(released)
    }

    /// Close the intake with a terminal decision. Owner-scoped.
    pub async fn resolve_claim(
        &self,
        intake_id: IntakeId,
        reviewer: &ReviewerId,
        resolution: Resolution,
    ) -> Result<bool> {
        let to = IntakeStatus::from(resolution);
        let done = self
            .store
            .transition_owned(intake_id, reviewer, to, self.clock.now())
            .await?;
        self.count_exit(to, done);
        if done {
            info!(%intake_id, %reviewer, status = %to, "intake resolved");
        }
        Ok(done)
    }

    /// Park the intake while the patient supplies more information.
    /// Owner-scoped; clears the claim.
    pub async fn request_info(&self, intake_id: IntakeId, reviewer: &ReviewerId) -> Result<bool> {
        let done = self
            .store
            .transition_owned(
                intake_id,
                reviewer,
                IntakeStatus::PendingInfo,
                self.clock.now(),
            )
            .await?;
        self.count_exit(IntakeStatus::PendingInfo, done);
        Ok(done)
    }

    async fn require(&self, intake_id: IntakeId) -> Result<WorkItem> {
        self.store
            .get_intake(intake_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("intake {intake_id}")))
    }

    fn count_exit(&self, to: IntakeStatus, ok: bool) {
        metrics::claim_exits().add(
            1,
            &[
                KeyValue::new("to", to.as_str()),
                KeyValue::new("result", if ok { "ok" } else { "not_owner" }),
            ],
        );
    }
}
