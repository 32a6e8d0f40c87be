//! Target repository

use crate::db::DatabasePool;
use crate::models::{AttemptRecord, NewTarget, Target, TargetCounts, TargetStatus};
use crate::repository::execution_log::insert_entry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outreach_common::types::{Paginated, TargetId, TaskId};
use outreach_common::{Error, Result};
use sqlx::FromRow;
use uuid::Uuid;

/// Target repository trait
///
/// Targets only move through these operations; the engine is the sole writer.
#[async_trait]
pub trait TargetRepository: Send + Sync {
    /// Append targets to a task in `pending`. Identifiers already present in the task are skipped.
    async fn insert_batch(&self, task_id: TaskId, targets: Vec<NewTarget>) -> Result<u64>;

    async fn get(&self, id: TargetId) -> Result<Option<Target>>;

    /// Atomically move the earliest `pending` target to `in_progress`
    async fn claim_next(&self, task_id: TaskId, now: DateTime<Utc>) -> Result<Option<Target>>;

    /// `in_progress` to a final status, writing the attempt's log entries in the same transaction
    async fn mark_outcome(
        &self,
        id: TargetId,
        status: TargetStatus,
        attempt: AttemptRecord,
        now: DateTime<Utc>,
    ) -> Result<Target>;

    /// `in_progress` back to `pending`
    async fn requeue(
        &self,
        id: TargetId,
        attempt: AttemptRecord,
        now: DateTime<Utc>,
    ) -> Result<Target>;

    async fn counts(&self, task_id: TaskId) -> Result<TargetCounts>;

    async fn list(
        &self,
        task_id: TaskId,
        status: Option<TargetStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Paginated<Target>>;

    /// Targets left `in_progress` since before `cutoff`
    async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Target>>;
}

#[derive(FromRow)]
struct TargetRow {
    id: Uuid,
    task_id: Uuid,
    external_identifier: String,
    status: String,
    source: String,
    position: i64,
    last_attempted_account_id: Option<Uuid>,
    attempt_count: i32,
    last_error: Option<String>,
    last_attempt_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TargetRow> for Target {
    type Error = Error;

    fn try_from(row: TargetRow) -> Result<Self> {
        Ok(Target {
            id: row.id,
            task_id: row.task_id,
            external_identifier: row.external_identifier,
            status: row.status.parse().map_err(Error::Database)?,
            source: row.source.parse().map_err(Error::Database)?,
            position: row.position,
            last_attempted_account_id: row.last_attempted_account_id,
            attempt_count: row.attempt_count,
            last_error: row.last_error,
            last_attempt_at: row.last_attempt_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Database target repository
pub struct DbTargetRepository {
    pool: DatabasePool,
}

impl DbTargetRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Shared body of `mark_outcome` and `requeue`
    async fn finish_attempt(
        &self,
        id: TargetId,
        status: TargetStatus,
        attempt: AttemptRecord,
        now: DateTime<Utc>,
    ) -> Result<Target> {
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        let row = sqlx::query_as::<_, TargetRow>(
            r#"
            UPDATE targets SET
                status = $2,
                attempt_count = attempt_count + CASE WHEN $3 THEN 1 ELSE 0 END,
                last_attempted_account_id = COALESCE($4, last_attempted_account_id),
                last_error = COALESCE($5, last_error),
                updated_at = $6
            WHERE id = $1 AND status = 'in_progress'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(attempt.count_attempt)
        .bind(attempt.account_id)
        .bind(&attempt.error)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let Some(row) = row else {
            let current: Option<String> =
                sqlx::query_scalar("SELECT status FROM targets WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| Error::Database(e.to_string()))?;
            return Err(match current {
                Some(current) => Error::Conflict(format!(
                    "Target {} is {}, not in_progress",
                    id, current
                )),
                None => Error::NotFound(format!("Target {}", id)),
            });
        };

        for entry in attempt.log {
            insert_entry(&mut *tx, &entry.into_entry())
                .await
                .map_err(|e| Error::Database(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        row.try_into()
    }
}

#[async_trait]
impl TargetRepository for DbTargetRepository {
    async fn insert_batch(&self, task_id: TaskId, targets: Vec<NewTarget>) -> Result<u64> {
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        // Serialises concurrent imports into the same task so positions stay monotonic
        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM tasks WHERE id = $1 FOR UPDATE")
            .bind(task_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        if exists.is_none() {
            return Err(Error::NotFound(format!("Task {}", task_id)));
        }

        let mut position: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(position), 0) FROM targets WHERE task_id = $1")
                .bind(task_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| Error::Database(e.to_string()))?;

        let mut count = 0u64;
        for target in targets {
            position += 1;
            let result = sqlx::query(
                r#"
                INSERT INTO targets (id, task_id, external_identifier, status, source, position)
                VALUES ($1, $2, $3, 'pending', $4, $5)
                ON CONFLICT (task_id, external_identifier) DO NOTHING
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(task_id)
            .bind(&target.external_identifier)
            .bind(target.source.as_str())
            .bind(position)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

            count += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count)
    }

    async fn get(&self, id: TargetId) -> Result<Option<Target>> {
        sqlx::query_as::<_, TargetRow>("SELECT * FROM targets WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .map(Target::try_from)
            .transpose()
    }

    async fn claim_next(&self, task_id: TaskId, now: DateTime<Utc>) -> Result<Option<Target>> {
        sqlx::query_as::<_, TargetRow>(
            r#"
            UPDATE targets SET
                status = 'in_progress',
                last_attempt_at = $2,
                updated_at = $2
            WHERE id = (
                SELECT id FROM targets
                WHERE task_id = $1 AND status = 'pending'
                ORDER BY position ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(task_id)
        .bind(now)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?
        .map(Target::try_from)
        .transpose()
    }

    async fn mark_outcome(
        &self,
        id: TargetId,
        status: TargetStatus,
        attempt: AttemptRecord,
        now: DateTime<Utc>,
    ) -> Result<Target> {
        if !status.is_final() {
            return Err(Error::Validation(format!(
                "{} is not a final target status",
                status
            )));
        }
        self.finish_attempt(id, status, attempt, now).await
    }

    async fn requeue(
        &self,
        id: TargetId,
        attempt: AttemptRecord,
        now: DateTime<Utc>,
    ) -> Result<Target> {
        self.finish_attempt(id, TargetStatus::Pending, attempt, now)
            .await
    }

    async fn counts(&self, task_id: TaskId) -> Result<TargetCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM targets WHERE task_id = $1 GROUP BY status",
        )
        .bind(task_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let mut counts = TargetCounts::default();
        for (status, n) in rows {
            let status: TargetStatus = status.parse().map_err(Error::Database)?;
            counts.add(status, n);
        }
        Ok(counts)
    }

    async fn list(
        &self,
        task_id: TaskId,
        status: Option<TargetStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Paginated<Target>> {
        let rows = sqlx::query_as::<_, TargetRow>(
            r#"
            SELECT * FROM targets
            WHERE task_id = $1 AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY position ASC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(task_id)
        .bind(status.map(|s| s.as_str()))
        .bind(limit + 1)
        .bind(offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let targets = rows
            .into_iter()
            .map(Target::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(Paginated::from_overfetch(targets, limit, offset))
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Target>> {
        sqlx::query_as::<_, TargetRow>(
            r#"
            SELECT * FROM targets
            WHERE status = 'in_progress' AND last_attempt_at < $1
            ORDER BY last_attempt_at ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?
        .into_iter()
        .map(Target::try_from)
        .collect()
    }
}
