//! Execution log repository

use crate::db::DatabasePool;
use crate::models::{ExecutionLogEntry, LogSummary, NewLogEntry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outreach_common::types::{OutcomeKind, Paginated, TaskId};
use outreach_common::{Error, Result};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

/// Execution log repository trait (append-only)
#[async_trait]
pub trait ExecutionLogRepository: Send + Sync {
    async fn append(&self, entry: NewLogEntry) -> Result<ExecutionLogEntry>;

    /// Oldest first
    async fn list(
        &self,
        task_id: TaskId,
        limit: i64,
        offset: i64,
    ) -> Result<Paginated<ExecutionLogEntry>>;

    async fn summary(&self, task_id: TaskId) -> Result<LogSummary>;
}

#[derive(FromRow)]
struct LogRow {
    id: Uuid,
    task_id: Uuid,
    target_id: Uuid,
    account_id: Option<Uuid>,
    action_kind: String,
    outcome: String,
    wait_seconds: Option<i64>,
    attempt: i32,
    duration_ms: Option<i64>,
    detail: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<LogRow> for ExecutionLogEntry {
    type Error = Error;

    fn try_from(row: LogRow) -> Result<Self> {
        Ok(ExecutionLogEntry {
            id: row.id,
            task_id: row.task_id,
            target_id: row.target_id,
            account_id: row.account_id,
            action_kind: row.action_kind.parse().map_err(Error::Database)?,
            outcome: row.outcome.parse().map_err(Error::Database)?,
            wait_seconds: row.wait_seconds,
            attempt: row.attempt,
            duration_ms: row.duration_ms,
            detail: row.detail,
            created_at: row.created_at,
        })
    }
}

/// Insert one entry on an open connection or transaction
pub(crate) async fn insert_entry(
    conn: &mut PgConnection,
    entry: &ExecutionLogEntry,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO execution_log (
            id, task_id, target_id, account_id, action_kind, outcome,
            wait_seconds, attempt, duration_ms, detail, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(entry.id)
    .bind(entry.task_id)
    .bind(entry.target_id)
    .bind(entry.account_id)
    .bind(entry.action_kind.as_str())
    .bind(entry.outcome.as_str())
    .bind(entry.wait_seconds)
    .bind(entry.attempt)
    .bind(entry.duration_ms)
    .bind(&entry.detail)
    .bind(entry.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Outcomes for which the account, not the target, was blamed
pub(crate) const RATE_LIMIT_OUTCOMES: [OutcomeKind; 3] = [
    OutcomeKind::RateLimited,
    OutcomeKind::FloodWait,
    OutcomeKind::AccountRestricted,
];

/// Database execution log repository
pub struct DbExecutionLogRepository {
    pool: DatabasePool,
}

impl DbExecutionLogRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionLogRepository for DbExecutionLogRepository {
    async fn append(&self, entry: NewLogEntry) -> Result<ExecutionLogEntry> {
        let entry = entry.into_entry();
        let mut conn = self
            .pool
            .pool()
            .acquire()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        insert_entry(&mut *conn, &entry)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(entry)
    }

    async fn list(
        &self,
        task_id: TaskId,
        limit: i64,
        offset: i64,
    ) -> Result<Paginated<ExecutionLogEntry>> {
        let rows = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT * FROM execution_log
            WHERE task_id = $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(task_id)
        .bind(limit + 1)
        .bind(offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let entries = rows
            .into_iter()
            .map(ExecutionLogEntry::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(Paginated::from_overfetch(entries, limit, offset))
    }

    async fn summary(&self, task_id: TaskId) -> Result<LogSummary> {
        let rate_limit_outcomes: Vec<String> = RATE_LIMIT_OUTCOMES
            .iter()
            .map(|o| o.as_str().to_string())
            .collect();

        let (entries, rate_limited, avg_duration_ms): (i64, i64, Option<f64>) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (WHERE outcome = ANY($2)),
                AVG(duration_ms)::DOUBLE PRECISION
            FROM execution_log
            WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .bind(rate_limit_outcomes)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(LogSummary {
            entries,
            rate_limited,
            avg_duration_ms,
        })
    }
}
