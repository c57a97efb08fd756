//! Retry-queue entries for side-effects that failed on first try.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::intake::IntakeId;
use super::string_enum;

/// Name under which draft generation retries are queued.
pub const DRAFT_GENERATION: &str = "draft_generation";

/// A pending or finished retry of a named side-effect for one intake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryEntry {
    pub id: RetryId,
    pub intake_id: IntakeId,

    /// Which side-effect this entry retries (e.g. `draft_generation`).
    pub side_effect: String,

    /// Attempts made by the retry coordinator so far.
    pub attempts: u32,
    pub max_attempts: u32,

    /// Earliest time the next attempt may run.
    pub next_retry_at: DateTime<Utc>,

    /// Set once the entry is finished, whether it succeeded or gave up.
    pub completed_at: Option<DateTime<Utc>>,

    pub outcome: RetryOutcome,
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RetryEntry {
    /// Eligible for selection at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.outcome == RetryOutcome::Pending
            && self.completed_at.is_none()
            && self.attempts < self.max_attempts
            && self.next_retry_at <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RetryId(pub Uuid);

impl RetryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RetryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RetryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a retry entry stands. `Succeeded` and `Exhausted` are both terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryOutcome {
    Pending,
    Succeeded,
    /// Gave up after `max_attempts` failures.
    Exhausted,
}

string_enum!(RetryOutcome {
    Pending => "pending",
    Succeeded => "succeeded",
    Exhausted => "exhausted",
});

impl RetryOutcome {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RetryOutcome::Pending)
    }
}

/// Result of one failed attempt, applied with an optimistic check on the
/// attempt count the caller observed.
#[derive(Debug, Clone)]
pub struct RetryFailure {
    pub error: String,
    pub next_retry_at: DateTime<Utc>,
    /// True when this failure used up the last attempt.
    pub exhausted: bool,
}
