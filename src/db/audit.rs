//! Compliance audit rows. Insert and select only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::Db;
use crate::error::Result;
use crate::model::*;
use crate::store::AuditStore;

const AUDIT_COLUMNS: &str = "seq, id, event_type, event_data, request_id, request_type, actor_id, actor_role, is_human_action, outcome, previous_outcome, call_required, call_occurred, call_completed_before_decision, prescribing_occurred_in_platform, external_prescribing_reference, ip_address, user_agent, created_at";

#[async_trait]
impl AuditStore for Db {
    async fn append_audit(
        &self,
        entry: NewAuditEntry,
        now: DateTime<Utc>,
    ) -> Result<ComplianceAuditEntry> {
        let (event_type, event_data) = entry.event().to_parts()?;
        let event_data = (!event_data.is_null()).then_some(event_data);
        let id = AuditId::new();

        // seq comes from the BIGSERIAL; stamp a placeholder and replace it.
        let mut stored = entry.into_entry(id, 0, now);
        let (seq,): (i64,) = sqlx::query_as(
            "INSERT INTO compliance_audit_log (
                id, event_type, event_data, request_id, request_type, actor_id, actor_role,
                is_human_action, outcome, previous_outcome, call_required, call_occurred,
                call_completed_before_decision, prescribing_occurred_in_platform,
                external_prescribing_reference, ip_address, user_agent, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
             RETURNING seq",
        )
        .bind(id.0)
        .bind(event_type.as_str())
        .bind(event_data)
        .bind(stored.request_id.0)
        .bind(stored.request_type.as_str())
        .bind(stored.actor_id.as_deref())
        .bind(stored.actor_role.as_str())
        .bind(stored.is_human_action)
        .bind(stored.outcome.map(TriageOutcome::as_str))
        .bind(stored.previous_outcome.map(TriageOutcome::as_str))
        .bind(stored.call_required)
        .bind(stored.call_occurred)
        .bind(stored.call_completed_before_decision)
        .bind(stored.prescribing_occurred_in_platform)
        .bind(stored.external_prescribing_reference.as_deref())
        .bind(stored.ip_address.as_deref())
        .bind(stored.user_agent.as_deref())
        .bind(now)
        .fetch_one(self.pool())
        .await?;

        stored.seq = seq;
        Ok(stored)
    }

    async fn audit_timeline(&self, request_id: RequestId) -> Result<Vec<ComplianceAuditEntry>> {
        let rows: Vec<AuditRow> = sqlx::query_as(&format!(
            "SELECT {AUDIT_COLUMNS} FROM compliance_audit_log
             WHERE request_id = $1
             ORDER BY seq ASC"
        ))
        .bind(request_id.0)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(AuditRow::try_into_entry).collect()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct AuditRow {
    seq: i64,
    id: Uuid,
    event_type: String,
    event_data: Option<serde_json::Value>,
    request_id: Uuid,
    request_type: String,
    actor_id: Option<String>,
    actor_role: String,
    is_human_action: bool,
    outcome: Option<String>,
    previous_outcome: Option<String>,
    call_required: Option<bool>,
    call_occurred: Option<bool>,
    call_completed_before_decision: Option<bool>,
    prescribing_occurred_in_platform: bool,
    external_prescribing_reference: Option<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    created_at: DateTime<Utc>,
}

impl AuditRow {
    fn try_into_entry(self) -> Result<ComplianceAuditEntry> {
        let event = AuditEvent::from_parts(
            &self.event_type,
            self.event_data.unwrap_or(serde_json::Value::Null),
        )?;
        Ok(ComplianceAuditEntry {
            id: AuditId(self.id),
            seq: self.seq,
            event_type: event.event_type(),
            event,
            request_id: RequestId(self.request_id),
            request_type: self.request_type.parse()?,
            actor_id: self.actor_id,
            actor_role: self.actor_role.parse()?,
            is_human_action: self.is_human_action,
            outcome: self.outcome.as_deref().map(str::parse::<TriageOutcome>).transpose()?,
            previous_outcome: self.previous_outcome.as_deref().map(str::parse::<TriageOutcome>).transpose()?,
            call_required: self.call_required,
            call_occurred: self.call_occurred,
            call_completed_before_decision: self.call_completed_before_decision,
            prescribing_occurred_in_platform: self.prescribing_occurred_in_platform,
            external_prescribing_reference: self.external_prescribing_reference,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            created_at: self.created_at,
        })
    }
}
