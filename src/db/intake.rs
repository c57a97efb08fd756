//! Intake rows: lifecycle, claims, and queue-age scans.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::Db;
use crate::error::{Error, Result};
use crate::model::*;
use crate::store::WorkStore;

const INTAKE_COLUMNS: &str = "id, request_type, status, payment_status, claimed_by, claimed_at, paid_at, created_at, updated_at";

#[async_trait]
impl WorkStore for Db {
    async fn insert_intake(&self, new: &NewIntake, now: DateTime<Utc>) -> Result<WorkItem> {
        let row: IntakeRow = sqlx::query_as(&format!(
            "INSERT INTO intakes (id, request_type, status, payment_status, created_at, updated_at)
             VALUES ($1, $2, 'submitted', 'pending', $3, $3)
             RETURNING {INTAKE_COLUMNS}"
        ))
        .bind(new.id.0)
        .bind(new.request_type.as_str())
        .bind(now)
        .fetch_one(self.pool())
        .await?;
        row.try_into_work_item()
    }

    async fn get_intake(&self, id: IntakeId) -> Result<Option<WorkItem>> {
        let row: Option<IntakeRow> =
            sqlx::query_as(&format!("SELECT {INTAKE_COLUMNS} FROM intakes WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(self.pool())
                .await?;
        row.map(IntakeRow::try_into_work_item).transpose()
    }

    async fn mark_paid(&self, id: IntakeId, now: DateTime<Utc>) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE intakes SET status = 'paid', payment_status = 'paid', paid_at = $1, updated_at = $1
             WHERE id = $2 AND status = 'submitted'",
        )
        .bind(now)
        .bind(id.0)
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(rows_affected == 1)
    }

    async fn requeue_pending_info(&self, id: IntakeId, now: DateTime<Utc>) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE intakes SET status = 'paid', updated_at = $1
             WHERE id = $2 AND status = 'pending_info'",
        )
        .bind(now)
        .bind(id.0)
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(rows_affected == 1)
    }

    async fn try_claim(
        &self,
        id: IntakeId,
        reviewer: &ReviewerId,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkItem>> {
        let row: Option<IntakeRow> = sqlx::query_as(&format!(
            "UPDATE intakes SET status = 'claimed', claimed_by = $1, claimed_at = $2, updated_at = $2
             WHERE id = $3 AND status = 'paid' AND claimed_by IS NULL
             RETURNING {INTAKE_COLUMNS}"
        ))
        .bind(reviewer.as_str())
        .bind(now)
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;
        row.map(IntakeRow::try_into_work_item).transpose()
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
        let rows_affected = sqlx::query(
            "UPDATE intakes SET status = $1, claimed_by = NULL, claimed_at = NULL, updated_at = $2
             WHERE id = $3 AND status = 'claimed' AND claimed_by = $4",
        )
        .bind(to.as_str())
        .bind(now)
        .bind(id.0)
        .bind(reviewer.as_str())
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(rows_affected == 1)
    }

    async fn list_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkItem>> {
        let rows: Vec<IntakeRow> = sqlx::query_as(&format!(
            "SELECT {INTAKE_COLUMNS} FROM intakes
             WHERE status = 'claimed' AND claimed_at < $1
             ORDER BY claimed_at ASC
             LIMIT $2"
        ))
        .bind(claimed_before)
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(IntakeRow::try_into_work_item).collect()
    }

    async fn reclaim_if_stale(
        &self,
        id: IntakeId,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE intakes SET status = 'paid', claimed_by = NULL, claimed_at = NULL, updated_at = $1
             WHERE id = $2 AND status = 'claimed' AND claimed_at < $3",
        )
        .bind(now)
        .bind(id.0)
        .bind(claimed_before)
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(rows_affected == 1)
    }

    async fn list_waiting_since(
        &self,
        paid_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkItem>> {
        let rows: Vec<IntakeRow> = sqlx::query_as(&format!(
            "SELECT {INTAKE_COLUMNS} FROM intakes
             WHERE status = 'paid' AND payment_status = 'paid' AND paid_at < $1
             ORDER BY paid_at ASC
             LIMIT $2"
        ))
        .bind(paid_before)
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(IntakeRow::try_into_work_item).collect()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct IntakeRow {
    id: Uuid,
    request_type: String,
    status: String,
    payment_status: String,
    claimed_by: Option<String>,
    claimed_at: Option<DateTime<Utc>>,
    paid_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl IntakeRow {
    fn try_into_work_item(self) -> Result<WorkItem> {
        Ok(WorkItem {
            id: IntakeId(self.id),
            request_type: self.request_type.parse()?,
            status: self.status.parse()?,
            payment_status: self.payment_status.parse()?,
            claimed_by: self.claimed_by.map(ReviewerId),
            claimed_at: self.claimed_at,
            paid_at: self.paid_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
