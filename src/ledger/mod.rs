//! Compliance audit ledger.
//!
//! Writes are best effort: a clinical action must never fail because its
//! audit entry could not be written. `log_event` swallows store errors,
//! logs them, counts them, and returns `None`. Callers use the
//! `record_*` wrappers so the event taxonomy stays closed.

mod readiness;

pub use readiness::{AuditReadiness, check_readiness};

use std::sync::Arc;

use opentelemetry::KeyValue;
use tracing::error;

use crate::clock::Clock;
use crate::error::Result;
use crate::model::*;
use crate::store::AuditStore;
use crate::telemetry::metrics;

#[derive(Clone)]
pub struct ComplianceLedger {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
}

impl ComplianceLedger {
    pub fn new(store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Append an entry. Returns its id, or `None` if the write failed.
    pub async fn log_event(&self, entry: NewAuditEntry) -> Option<AuditId> {
        let event_type = entry.event().event_type();
        let request_id = entry.request_id();
        match self.store.append_audit(entry, self.clock.now()).await {
            Ok(stored) => {
                metrics::ledger_writes().add(
                    1,
                    &[
                        KeyValue::new("event_type", event_type.as_str()),
                        KeyValue::new("result", "ok"),
                    ],
                );
                Some(stored.id)
            }
            Err(e) => {
                metrics::ledger_writes().add(
                    1,
                    &[
                        KeyValue::new("event_type", event_type.as_str()),
                        KeyValue::new("result", "error"),
                    ],
                );
                error!(%request_id, %event_type, error = %e, "compliance audit write failed");
                None
            }
        }
    }

    /// All entries for a request, in creation order.
    pub async fn get_compliance_timeline(
        &self,
        request_id: RequestId,
    ) -> Result<Vec<ComplianceAuditEntry>> {
        self.store.audit_timeline(request_id).await
    }

    /// Whether the recorded evidence for a request is complete enough to
    /// stand up in an audit.
    pub async fn check_audit_readiness(&self, request_id: RequestId) -> Result<AuditReadiness> {
        let timeline = self.store.audit_timeline(request_id).await?;
        Ok(check_readiness(&timeline))
    }

    async fn record(&self, ctx: AuditContext, event: AuditEvent) -> Option<AuditId> {
        self.log_event(NewAuditEntry::new(ctx, event)).await
    }

    // ── Lifecycle ──

    pub async fn record_request_created(&self, ctx: AuditContext) -> Option<AuditId> {
        self.record(ctx, AuditEvent::RequestCreated).await
    }

    pub async fn record_request_reviewed(
        &self,
        ctx: AuditContext,
        notes: Option<String>,
    ) -> Option<AuditId> {
        self.record(ctx, AuditEvent::RequestReviewed { notes }).await
    }

    pub async fn record_outcome_assigned(
        &self,
        ctx: AuditContext,
        outcome: TriageOutcome,
    ) -> Option<AuditId> {
        self.record(ctx, AuditEvent::OutcomeAssigned { outcome })
            .await
    }

    // ── Clinician involvement ──

    pub async fn record_clinician_opened(&self, ctx: AuditContext) -> Option<AuditId> {
        self.record(ctx, AuditEvent::ClinicianOpenedRequest).await
    }

    pub async fn record_clinician_reviewed(
        &self,
        ctx: AuditContext,
        review_seconds: Option<u64>,
    ) -> Option<AuditId> {
        self.record(ctx, AuditEvent::ClinicianReviewedRequest { review_seconds })
            .await
    }

    pub async fn record_outcome_selected(
        &self,
        ctx: AuditContext,
        outcome: TriageOutcome,
        previous_outcome: Option<TriageOutcome>,
    ) -> Option<AuditId> {
        self.record(
            ctx,
            AuditEvent::ClinicianSelectedOutcome {
                outcome,
                previous_outcome,
            },
        )
        .await
    }

    // ── Triage outcome ──

    pub async fn record_triage_approved(&self, ctx: AuditContext) -> Option<AuditId> {
        self.record(ctx, AuditEvent::TriageApproved).await
    }

    pub async fn record_triage_needs_call(
        &self,
        ctx: AuditContext,
        reason: Option<String>,
    ) -> Option<AuditId> {
        self.record(ctx, AuditEvent::TriageNeedsCall { reason })
            .await
    }

    pub async fn record_triage_declined(
        &self,
        ctx: AuditContext,
        reason: Option<String>,
    ) -> Option<AuditId> {
        self.record(ctx, AuditEvent::TriageDeclined { reason }).await
    }

    pub async fn record_triage_outcome_changed(
        &self,
        ctx: AuditContext,
        from: TriageOutcome,
        to: TriageOutcome,
        reason: Option<String>,
    ) -> Option<AuditId> {
        self.record(ctx, AuditEvent::TriageOutcomeChanged { from, to, reason })
            .await
    }

    // ── Synchronous contact ──

    pub async fn record_call_required(
        &self,
        ctx: AuditContext,
        reason: Option<String>,
    ) -> Option<AuditId> {
        self.record(ctx, AuditEvent::CallRequiredFlagged { reason })
            .await
    }

    pub async fn record_call_initiated(
        &self,
        ctx: AuditContext,
        channel: Option<String>,
    ) -> Option<AuditId> {
        self.record(ctx, AuditEvent::CallInitiated { channel })
            .await
    }

    pub async fn record_call_completed(
        &self,
        ctx: AuditContext,
        duration_seconds: Option<u64>,
    ) -> Option<AuditId> {
        self.record(ctx, AuditEvent::CallCompleted { duration_seconds })
            .await
    }

    /// A decision taken after the required call was completed.
    pub async fn record_decision_after_call(
        &self,
        ctx: AuditContext,
        outcome: TriageOutcome,
    ) -> Option<AuditId> {
        self.record(ctx, AuditEvent::DecisionAfterCall { outcome })
            .await
    }

    // ── Prescribing boundary ──

    pub async fn record_no_prescribing(&self, ctx: AuditContext) -> Option<AuditId> {
        self.record(ctx, AuditEvent::NoPrescribingInPlatform).await
    }

    pub async fn record_external_prescribing(
        &self,
        ctx: AuditContext,
        reference: impl Into<String>,
    ) -> Option<AuditId> {
        self.record(
            ctx,
            AuditEvent::ExternalPrescribingIndicated {
                reference: reference.into(),
            },
        )
        .await
    }
}
