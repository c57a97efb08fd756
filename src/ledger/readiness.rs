//! Minimum-evidence check for a request's audit trail.

use serde::Serialize;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReadiness {
    /// True when the request has a terminal outcome and nothing is missing.
    pub ready: bool,
    /// Latest outcome recorded on the timeline.
    pub outcome: Option<TriageOutcome>,
    /// Event types whose absence blocks readiness.
    pub missing: Vec<EventType>,
}

/// Evaluate a request's timeline (in creation order).
///
/// Every request needs `request_created` and `clinician_selected_outcome`.
/// If a call was ever flagged as required, or `needs_call` was ever the
/// outcome, a `decision_after_call` entry
/// attesting the call completed before the decision is needed too. An
/// approved repeat prescription needs a prescribing-boundary entry; its
/// absence is reported as `no_prescribing_in_platform`.
pub fn check_readiness(timeline: &[ComplianceAuditEntry]) -> AuditReadiness {
    let has = |ty: EventType| timeline.iter().any(|e| e.event_type == ty);

    let outcome = timeline.iter().rev().find_map(|e| e.outcome);
    let request_type = timeline.first().map(|e| e.request_type);
    let call_required = timeline
        .iter()
        .any(|e| e.call_required == Some(true) || e.outcome == Some(TriageOutcome::NeedsCall));

    let mut missing = Vec::new();
    if !has(EventType::RequestCreated) {
        missing.push(EventType::RequestCreated);
    }
    if !has(EventType::ClinicianSelectedOutcome) {
        missing.push(EventType::ClinicianSelectedOutcome);
    }
    if call_required
        && !timeline.iter().any(|e| {
            e.event_type == EventType::DecisionAfterCall
                && e.call_completed_before_decision == Some(true)
        })
    {
        missing.push(EventType::DecisionAfterCall);
    }
    if outcome == Some(TriageOutcome::Approved)
        && request_type == Some(RequestType::RepeatRx)
        && !has(EventType::NoPrescribingInPlatform)
        && !has(EventType::ExternalPrescribingIndicated)
    {
        missing.push(EventType::NoPrescribingInPlatform);
    }

    AuditReadiness {
        ready: outcome.is_some_and(TriageOutcome::is_terminal) && missing.is_empty(),
        outcome,
        missing,
    }
}
