//! Retry-queue rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::Db;
use crate::error::{Error, Result};
use crate::model::*;
use crate::store::RetryStore;

const RETRY_COLUMNS: &str = "id, intake_id, side_effect, attempts, max_attempts, next_retry_at, completed_at, outcome, last_error, created_at, updated_at";

#[async_trait]
impl RetryStore for Db {
    async fn enqueue_retry(
        &self,
        intake_id: IntakeId,
        side_effect: &str,
        max_attempts: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<RetryEntry> {
        // The partial unique index on (intake_id, side_effect) for pending
        // rows turns a concurrent duplicate into a no-op.
        let inserted: Option<RetryRow> = sqlx::query_as(&format!(
            "INSERT INTO retry_queue (id, intake_id, side_effect, attempts, max_attempts, next_retry_at, outcome, last_error, created_at, updated_at)
             VALUES ($1, $2, $3, 0, $4, $5, 'pending', $6, $5, $5)
             ON CONFLICT (intake_id, side_effect) WHERE completed_at IS NULL
             DO NOTHING
             RETURNING {RETRY_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(intake_id.0)
        .bind(side_effect)
        .bind(max_attempts as i32)
        .bind(now)
        .bind(error)
        .fetch_optional(self.pool())
        .await?;

        let row = match inserted {
            Some(row) => row,
            None => sqlx::query_as(&format!(
                "SELECT {RETRY_COLUMNS} FROM retry_queue
                 WHERE intake_id = $1 AND side_effect = $2 AND completed_at IS NULL
                 LIMIT 1"
            ))
            .bind(intake_id.0)
            .bind(side_effect)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| {
                Error::Other(format!(
                    "retry for {intake_id}/{side_effect} conflicted but no pending row found"
                ))
            })?,
        };
        row.try_into_entry()
    }

    async fn get_retry(&self, id: RetryId) -> Result<Option<RetryEntry>> {
        let row: Option<RetryRow> =
            sqlx::query_as(&format!("SELECT {RETRY_COLUMNS} FROM retry_queue WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(self.pool())
                .await?;
        row.map(RetryRow::try_into_entry).transpose()
    }

    async fn due_retries(
        &self,
        side_effect: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RetryEntry>> {
        let rows: Vec<RetryRow> = sqlx::query_as(&format!(
            "SELECT {RETRY_COLUMNS} FROM retry_queue
             WHERE side_effect = $1
               AND completed_at IS NULL
               AND attempts < max_attempts
               AND next_retry_at <= $2
             ORDER BY next_retry_at ASC
             LIMIT $3"
        ))
        .bind(side_effect)
        .bind(now)
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(RetryRow::try_into_entry).collect()
    }

    async fn lease_retry(
        &self,
        id: RetryId,
        attempts: u32,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE retry_queue SET next_retry_at = $1, updated_at = $2
             WHERE id = $3 AND attempts = $4 AND completed_at IS NULL
               AND attempts < max_attempts AND next_retry_at <= $2",
        )
        .bind(lease_until)
        .bind(now)
        .bind(id.0)
        .bind(attempts as i32)
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(rows_affected == 1)
    }

    async fn record_retry_success(
        &self,
        id: RetryId,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE retry_queue SET attempts = attempts + 1, completed_at = $1, outcome = 'succeeded', updated_at = $1
             WHERE id = $2 AND attempts = $3 AND completed_at IS NULL",
        )
        .bind(now)
        .bind(id.0)
        .bind(attempts as i32)
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(rows_affected == 1)
    }

    async fn record_retry_failure(
        &self,
        id: RetryId,
        attempts: u32,
        failure: &RetryFailure,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let (completed_at, outcome) = if failure.exhausted {
            (Some(now), RetryOutcome::Exhausted)
        } else {
            (None, RetryOutcome::Pending)
        };
        let rows_affected = sqlx::query(
            "UPDATE retry_queue SET attempts = attempts + 1, next_retry_at = $1, last_error = $2,
                    completed_at = $3, outcome = $4, updated_at = $5
             WHERE id = $6 AND attempts = $7 AND completed_at IS NULL",
        )
        .bind(failure.next_retry_at)
        .bind(&failure.error)
        .bind(completed_at)
        .bind(outcome.as_str())
        .bind(now)
        .bind(id.0)
        .bind(attempts as i32)
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(rows_affected == 1)
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct RetryRow {
    id: Uuid,
    intake_id: Uuid,
    side_effect: String,
    attempts: i32,
    max_attempts: i32,
    next_retry_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    outcome: String,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RetryRow {
    fn try_into_entry(self) -> Result<RetryEntry> {
        Ok(RetryEntry {
            id: RetryId(self.id),
            intake_id: IntakeId(self.intake_id),
            side_effect: self.side_effect,
            attempts: self.attempts as u32,
            max_attempts: self.max_attempts as u32,
            next_retry_at: self.next_retry_at,
            completed_at: self.completed_at,
            outcome: self.outcome.parse()?,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
