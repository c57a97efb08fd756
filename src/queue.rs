//! Entry into the review queue: submission, payment, and re-entry after a
//! patient answers an information request.

use std::sync::Arc;

use tracing::info;

use crate::clock::Clock;
use crate::error::Result;
use crate::ledger::ComplianceLedger;
use crate::model::*;
use crate::store::WorkStore;

#[derive(Clone)]
pub struct ReviewQueue {
    store: Arc<dyn WorkStore>,
    ledger: ComplianceLedger,
    clock: Arc<dyn Clock>,
}

impl ReviewQueue {
    pub fn new(store: Arc<dyn WorkStore>, ledger: ComplianceLedger, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            ledger,
            clock,
        }
    }

    /// Record a new submission and its `request_created` audit entry.
    ///
    /// `patient` supplies actor, IP and user agent; its request id and type
    /// are overwritten from the intake.
    pub async fn submit(&self, new: NewIntake, patient: AuditContext) -> Result<WorkItem> {
        let item = self.store.insert_intake(&new, self.clock.now()).await?;
        let ctx = AuditContext {
            request_id: item.id.into(),
            request_type: item.request_type,
            ..patient
        };
        self.ledger.record_request_created(ctx).await;
        info!(intake_id = %item.id, request_type = %item.request_type, "intake submitted");
        Ok(item)
    }

    /// Payment confirmed: the intake becomes claimable. False if it was not
    /// awaiting payment.
    pub async fn confirm_payment(&self, intake_id: IntakeId) -> Result<bool> {
        let paid = self.store.mark_paid(intake_id, self.clock.now()).await?;
        if paid {
            info!(%intake_id, "intake paid, now in review queue");
        }
        Ok(paid)
    }

    /// The patient answered; the intake goes back into the queue.
    pub async fn patient_responded(&self, intake_id: IntakeId) -> Result<bool> {
        self.store
            .requeue_pending_info(intake_id, self.clock.now())
            .await
    }
}
