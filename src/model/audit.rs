//! Compliance audit entries.
//!
//! The event taxonomy is closed: every entry carries an [`AuditEvent`], a
//! tagged union whose variants are the only event types that exist and whose
//! fields are the only detail each type may carry. The flat evidence columns
//! (outcome, call flags, prescribing flags) are derived from the event when
//! an entry is built, so the two can never disagree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::intake::{IntakeId, ReviewerId};
use super::string_enum;
use crate::error::Result;

// ---------------------------------------------------------------------------
// Identifiers and enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditId(pub Uuid);

impl AuditId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AuditId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AuditId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The clinical request an audit entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl From<IntakeId> for RequestId {
    fn from(id: IntakeId) -> Self {
        Self(id.0)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    MedCert,
    RepeatRx,
    Intake,
}

string_enum!(RequestType {
    MedCert => "med_cert",
    RepeatRx => "repeat_rx",
    Intake => "intake",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Patient,
    Clinician,
    Admin,
    System,
}

string_enum!(ActorRole {
    Patient => "patient",
    Clinician => "clinician",
    Admin => "admin",
    System => "system",
});

/// Clinical disposition of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageOutcome {
    Approved,
    NeedsCall,
    Declined,
}

string_enum!(TriageOutcome {
    Approved => "approved",
    NeedsCall => "needs_call",
    Declined => "declined",
});

impl TriageOutcome {
    /// A decision that closes the request.
    pub fn is_terminal(self) -> bool {
        matches!(self, TriageOutcome::Approved | TriageOutcome::Declined)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Lifecycle,
    ClinicianInvolvement,
    TriageOutcome,
    SynchronousContact,
    PrescribingBoundary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RequestCreated,
    RequestReviewed,
    OutcomeAssigned,
    ClinicianOpenedRequest,
    ClinicianReviewedRequest,
    ClinicianSelectedOutcome,
    TriageApproved,
    TriageNeedsCall,
    TriageDeclined,
    TriageOutcomeChanged,
    CallRequiredFlagged,
    CallInitiated,
    CallCompleted,
    DecisionAfterCall,
    NoPrescribingInPlatform,
    ExternalPrescribingIndicated,
}

string_enum!(EventType {
    RequestCreated => "request_created",
    RequestReviewed => "request_reviewed",
    OutcomeAssigned => "outcome_assigned",
    ClinicianOpenedRequest => "clinician_opened_request",
    ClinicianReviewedRequest => "clinician_reviewed_request",
    ClinicianSelectedOutcome => "clinician_selected_outcome",
    TriageApproved => "triage_approved",
    TriageNeedsCall => "triage_needs_call",
    TriageDeclined => "triage_declined",
    TriageOutcomeChanged => "triage_outcome_changed",
    CallRequiredFlagged => "call_required_flagged",
    CallInitiated => "call_initiated",
    CallCompleted => "call_completed",
    DecisionAfterCall => "decision_after_call",
    NoPrescribingInPlatform => "no_prescribing_in_platform",
    ExternalPrescribingIndicated => "external_prescribing_indicated",
});

impl EventType {
    pub fn category(self) -> EventCategory {
        use EventType::*;
        match self {
            RequestCreated | RequestReviewed | OutcomeAssigned => EventCategory::Lifecycle,
            ClinicianOpenedRequest | ClinicianReviewedRequest | ClinicianSelectedOutcome => {
                EventCategory::ClinicianInvolvement
            }
            TriageApproved | TriageNeedsCall | TriageDeclined | TriageOutcomeChanged => {
                EventCategory::TriageOutcome
            }
            CallRequiredFlagged | CallInitiated | CallCompleted | DecisionAfterCall => {
                EventCategory::SynchronousContact
            }
            NoPrescribingInPlatform | ExternalPrescribingIndicated => {
                EventCategory::PrescribingBoundary
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// An audit event and the detail its type allows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "event_data", rename_all = "snake_case")]
pub enum AuditEvent {
    RequestCreated,
    RequestReviewed {
        #[serde(default)]
        notes: Option<String>,
    },
    OutcomeAssigned {
        outcome: TriageOutcome,
    },
    ClinicianOpenedRequest,
    ClinicianReviewedRequest {
        #[serde(default)]
        review_seconds: Option<u64>,
    },
    ClinicianSelectedOutcome {
        outcome: TriageOutcome,
        #[serde(default)]
        previous_outcome: Option<TriageOutcome>,
    },
    TriageApproved,
    TriageNeedsCall {
        #[serde(default)]
        reason: Option<String>,
    },
    TriageDeclined {
        #[serde(default)]
        reason: Option<String>,
    },
    TriageOutcomeChanged {
        from: TriageOutcome,
        to: TriageOutcome,
        #[serde(default)]
        reason: Option<String>,
    },
    CallRequiredFlagged {
        #[serde(default)]
        reason: Option<String>,
    },
    CallInitiated {
        #[serde(default)]
        channel: Option<String>,
    },
    CallCompleted {
        #[serde(default)]
        duration_seconds: Option<u64>,
    },
    DecisionAfterCall {
        outcome: TriageOutcome,
    },
    NoPrescribingInPlatform,
    ExternalPrescribingIndicated {
        reference: String,
    },
}

impl AuditEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            AuditEvent::RequestCreated => EventType::RequestCreated,
            AuditEvent::RequestReviewed { .. } => EventType::RequestReviewed,
            AuditEvent::OutcomeAssigned { .. } => EventType::OutcomeAssigned,
            AuditEvent::ClinicianOpenedRequest => EventType::ClinicianOpenedRequest,
            AuditEvent::ClinicianReviewedRequest { .. } => EventType::ClinicianReviewedRequest,
            AuditEvent::ClinicianSelectedOutcome { .. } => EventType::ClinicianSelectedOutcome,
            AuditEvent::TriageApproved => EventType::TriageApproved,
            AuditEvent::TriageNeedsCall { .. } => EventType::TriageNeedsCall,
            AuditEvent::TriageDeclined { .. } => EventType::TriageDeclined,
            AuditEvent::TriageOutcomeChanged { .. } => EventType::TriageOutcomeChanged,
            AuditEvent::CallRequiredFlagged { .. } => EventType::CallRequiredFlagged,
            AuditEvent::CallInitiated { .. } => EventType::CallInitiated,
            AuditEvent::CallCompleted { .. } => EventType::CallCompleted,
            AuditEvent::DecisionAfterCall { .. } => EventType::DecisionAfterCall,
            AuditEvent::NoPrescribingInPlatform => EventType::NoPrescribingInPlatform,
            AuditEvent::ExternalPrescribingIndicated { .. } => {
                EventType::ExternalPrescribingIndicated
            }
        }
    }

    /// Outcome this event asserts, if any.
    pub fn outcome(&self) -> Option<TriageOutcome> {
        match self {
            AuditEvent::OutcomeAssigned { outcome }
            | AuditEvent::ClinicianSelectedOutcome { outcome, .. }
            | AuditEvent::DecisionAfterCall { outcome } => Some(*outcome),
            AuditEvent::TriageOutcomeChanged { to, .. } => Some(*to),
            AuditEvent::TriageApproved => Some(TriageOutcome::Approved),
            AuditEvent::TriageNeedsCall { .. } => Some(TriageOutcome::NeedsCall),
            AuditEvent::TriageDeclined { .. } => Some(TriageOutcome::Declined),
            _ => None,
        }
    }

    pub fn previous_outcome(&self) -> Option<TriageOutcome> {
        match self {
            AuditEvent::ClinicianSelectedOutcome {
                previous_outcome, ..
            } => *previous_outcome,
            AuditEvent::TriageOutcomeChanged { from, .. } => Some(*from),
            _ => None,
        }
    }

    /// Split into the stored `event_type` and `event_data` columns.
    pub fn to_parts(&self) -> Result<(EventType, serde_json::Value)> {
        let mut value = serde_json::to_value(self)?;
        let data = value
            .get_mut("event_data")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null);
        Ok((self.event_type(), data))
    }

    /// Rebuild from stored columns. Rejects unknown types and payloads
    /// that do not fit the type.
    pub fn from_parts(event_type: &str, data: serde_json::Value) -> Result<Self> {
        let mut obj = serde_json::Map::new();
        obj.insert("event_type".into(), serde_json::Value::String(event_type.into()));
        if !data.is_null() {
            obj.insert("event_data".into(), data);
        }
        Ok(serde_json::from_value(serde_json::Value::Object(obj))?)
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// Who is acting and where the request came from.
#[derive(Debug, Clone)]
pub struct AuditContext {
    pub request_id: RequestId,
    pub request_type: RequestType,
    pub actor_id: Option<String>,
    pub actor_role: ActorRole,
    pub is_human_action: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl AuditContext {
    pub fn new(request_id: impl Into<RequestId>, request_type: RequestType, role: ActorRole) -> Self {
        Self {
            request_id: request_id.into(),
            request_type,
            actor_id: None,
            actor_role: role,
            is_human_action: role != ActorRole::System,
            ip_address: None,
            user_agent: None,
        }
    }

    pub fn clinician(
        request_id: impl Into<RequestId>,
        request_type: RequestType,
        reviewer: &ReviewerId,
    ) -> Self {
        Self::new(request_id, request_type, ActorRole::Clinician).actor(reviewer.as_str())
    }

    pub fn patient(request_id: impl Into<RequestId>, request_type: RequestType) -> Self {
        Self::new(request_id, request_type, ActorRole::Patient)
    }

    pub fn system(request_id: impl Into<RequestId>, request_type: RequestType) -> Self {
        Self::new(request_id, request_type, ActorRole::System)
    }

    pub fn actor(mut self, id: impl Into<String>) -> Self {
        self.actor_id = Some(id.into());
        self
    }

    pub fn ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Mark the action as automated even though a human role is attached.
    pub fn automated(mut self) -> Self {
        self.is_human_action = false;
        self
    }
}

/// An entry ready to be appended. Built from a context and an event.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub(crate) context: AuditContext,
    pub(crate) event: AuditEvent,
    pub(crate) call_required: Option<bool>,
    pub(crate) call_occurred: Option<bool>,
    pub(crate) call_completed_before_decision: Option<bool>,
    pub(crate) prescribing_occurred_in_platform: bool,
    pub(crate) external_prescribing_reference: Option<String>,
}

impl NewAuditEntry {
    pub fn new(context: AuditContext, event: AuditEvent) -> Self {
        let mut entry = Self {
            context,
            event,
            call_required: None,
            call_occurred: None,
            call_completed_before_decision: None,
            prescribing_occurred_in_platform: false,
            external_prescribing_reference: None,
        };
        match &entry.event {
            AuditEvent::CallRequiredFlagged { .. } | AuditEvent::TriageNeedsCall { .. } => {
                entry.call_required = Some(true);
            }
            AuditEvent::CallCompleted { .. } => entry.call_occurred = Some(true),
            AuditEvent::DecisionAfterCall { .. } => {
                entry.call_occurred = Some(true);
                entry.call_completed_before_decision = Some(true);
            }
            AuditEvent::ExternalPrescribingIndicated { reference } => {
                entry.external_prescribing_reference = Some(reference.clone());
            }
            _ => {}
        }
        if entry.event.outcome() == Some(TriageOutcome::NeedsCall) {
            entry.call_required = Some(true);
        }
        entry
    }

    /// Attach call evidence known at the time of the event.
    pub fn call_required(mut self, required: bool) -> Self {
        self.call_required = Some(required);
        self
    }

    pub fn call_occurred(mut self, occurred: bool) -> Self {
        self.call_occurred = Some(occurred);
        self
    }

    pub fn call_completed_before_decision(mut self, completed: bool) -> Self {
        self.call_completed_before_decision = Some(completed);
        self
    }

    pub fn prescribing_in_platform(mut self, occurred: bool) -> Self {
        self.prescribing_occurred_in_platform = occurred;
        self
    }

    pub fn event(&self) -> &AuditEvent {
        &self.event
    }

    pub fn request_id(&self) -> RequestId {
        self.context.request_id
    }

    /// Stamp identity and time, producing the stored form.
    pub fn into_entry(self, id: AuditId, seq: i64, created_at: DateTime<Utc>) -> ComplianceAuditEntry {
        ComplianceAuditEntry {
            id,
            seq,
            event_type: self.event.event_type(),
            outcome: self.event.outcome(),
            previous_outcome: self.event.previous_outcome(),
            event: self.event,
            request_id: self.context.request_id,
            request_type: self.context.request_type,
            actor_id: self.context.actor_id,
            actor_role: self.context.actor_role,
            is_human_action: self.context.is_human_action,
            call_required: self.call_required,
            call_occurred: self.call_occurred,
            call_completed_before_decision: self.call_completed_before_decision,
            prescribing_occurred_in_platform: self.prescribing_occurred_in_platform,
            external_prescribing_reference: self.external_prescribing_reference,
            ip_address: self.context.ip_address,
            user_agent: self.context.user_agent,
            created_at,
        }
    }
}

/// A stored, immutable audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceAuditEntry {
    pub id: AuditId,
    /// Creation order across the ledger.
    pub seq: i64,
    pub event_type: EventType,
    pub event: AuditEvent,
    pub request_id: RequestId,
    pub request_type: RequestType,
    pub actor_id: Option<String>,
    pub actor_role: ActorRole,
    pub is_human_action: bool,
    pub outcome: Option<TriageOutcome>,
    pub previous_outcome: Option<TriageOutcome>,
    pub call_required: Option<bool>,
    pub call_occurred: Option<bool>,
    pub call_completed_before_decision: Option<bool>,
    pub prescribing_occurred_in_platform: bool,
    pub external_prescribing_reference: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}
