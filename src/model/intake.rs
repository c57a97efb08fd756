//! Intakes: the work items reviewers claim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::audit::RequestType;
use super::string_enum;

// ---------------------------------------------------------------------------
// Intake
// ---------------------------------------------------------------------------

/// A submitted patient intake tracked through review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: IntakeId,

    /// What the patient asked for. Carried into audit entries.
    pub request_type: RequestType,

    /// Current lifecycle state.
    pub status: IntakeStatus,

    pub payment_status: PaymentStatus,

    /// Reviewer holding the claim. Some iff `status == Claimed`.
    pub claimed_by: Option<ReviewerId>,

    /// When the current claim was taken.
    pub claimed_at: Option<DateTime<Utc>>,

    /// When payment was confirmed. Queue age is measured from here.
    pub paid_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    /// True if the claim fields agree with the status.
    pub fn claim_is_consistent(&self) -> bool {
        (self.status == IntakeStatus::Claimed) == self.claimed_by.is_some()
            && self.claimed_by.is_some() == self.claimed_at.is_some()
    }
}

/// Newtype for intake IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IntakeId(pub Uuid);

impl IntakeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for IntakeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for IntakeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a reviewer (clinician) as known to the surrounding application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewerId(pub String);

impl ReviewerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReviewerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle state of an intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeStatus {
    /// Submitted, awaiting payment.
    Submitted,
    /// Paid and waiting in the review queue.
    Paid,
    /// Held by exactly one reviewer.
    Claimed,
    /// Reviewer asked the patient for more information.
    PendingInfo,
    Approved,
    Declined,
    Escalated,
}

string_enum!(IntakeStatus {
    Submitted => "submitted",
    Paid => "paid",
    Claimed => "claimed",
    PendingInfo => "pending_info",
    Approved => "approved",
    Declined => "declined",
    Escalated => "escalated",
});

impl IntakeStatus {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: IntakeStatus) -> bool {
        use IntakeStatus::*;
        matches!(
            (self, to),
            (Submitted, Paid)
                | (Paid, Claimed)
                | (Claimed, Paid)        // released or reclaimed
                | (Claimed, PendingInfo)
                | (PendingInfo, Paid)    // patient responded
                | (Claimed, Approved)
                | (Claimed, Declined)
                | (Claimed, Escalated)
        )
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            IntakeStatus::Approved | IntakeStatus::Declined | IntakeStatus::Escalated
        )
    }
}

/// Terminal decision a reviewer can apply to a claimed intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Approved,
    Declined,
    Escalated,
}

impl From<Resolution> for IntakeStatus {
    fn from(r: Resolution) -> Self {
        match r {
            Resolution::Approved => IntakeStatus::Approved,
            Resolution::Declined => IntakeStatus::Declined,
            Resolution::Escalated => IntakeStatus::Escalated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
    Failed,
}

string_enum!(PaymentStatus {
    Pending => "pending",
    Paid => "paid",
    Refunded => "refunded",
    Failed => "failed",
});

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a newly submitted intake.
#[derive(Debug, Clone)]
pub struct NewIntake {
    pub(crate) id: IntakeId,
    pub(crate) request_type: RequestType,
}

impl NewIntake {
    pub fn new(request_type: RequestType) -> Self {
        Self {
            id: IntakeId::new(),
            request_type,
        }
    }

    /// Use an ID assigned by the surrounding application.
    pub fn id(mut self, id: IntakeId) -> Self {
        self.id = id;
        self
    }
}
