//! Task repository

use crate::db::DatabasePool;
use crate::models::{NewTask, Task, TaskPriority, TaskSettings, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outreach_common::types::TaskId;
use outreach_common::{Error, Result};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// Task repository trait
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, input: NewTask) -> Result<Task>;
    async fn get(&self, id: TaskId) -> Result<Option<Task>>;

    /// Running tasks, highest priority first, then oldest first
    async fn list_running(&self) -> Result<Vec<Task>>;

    /// Compare-and-set the status. Returns `None` when the current status is not in `from`.
    async fn transition(
        &self,
        id: TaskId,
        from: &[TaskStatus],
        to: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>>;

    /// Delete a task together with its targets and log entries
    async fn delete(&self, id: TaskId) -> Result<bool>;
}

#[derive(FromRow)]
struct TaskRow {
    id: Uuid,
    owner_id: Uuid,
    platform: String,
    action_type: String,
    priority: String,
    status: String,
    settings: Json<TaskSettings>,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for Task {
    type Error = Error;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(Task {
            id: row.id,
            owner_id: row.owner_id,
            platform: row.platform,
            action_type: row.action_type.parse().map_err(Error::Database)?,
            priority: row.priority.parse().map_err(Error::Database)?,
            status: row.status.parse().map_err(Error::Database)?,
            settings: row.settings.0,
            payload: row.payload,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

fn status_strings(statuses: &[TaskStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

/// Database task repository
pub struct DbTaskRepository {
    pool: DatabasePool,
}

impl DbTaskRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for DbTaskRepository {
    async fn create(&self, input: NewTask) -> Result<Task> {
        let id = Uuid::now_v7();
        let priority: TaskPriority = input.priority;

        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            INSERT INTO tasks (
                id, owner_id, platform, action_type, priority, priority_rank,
                status, settings, payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.owner_id)
        .bind(&input.platform)
        .bind(input.action_type.as_str())
        .bind(priority.as_str())
        .bind(priority.rank())
        .bind(Json(&input.settings))
        .bind(&input.payload)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        row.try_into()
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>> {
        sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .map(Task::try_from)
            .transpose()
    }

    async fn list_running(&self) -> Result<Vec<Task>> {
        sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT * FROM tasks
            WHERE status = 'running'
            ORDER BY priority_rank DESC, created_at ASC
            "#,
        )
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?
        .into_iter()
        .map(Task::try_from)
        .collect()
    }

    async fn transition(
        &self,
        id: TaskId,
        from: &[TaskStatus],
        to: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            UPDATE tasks SET
                status = $3,
                updated_at = $4,
                started_at = CASE WHEN $3 = 'running' THEN COALESCE(started_at, $4) ELSE started_at END,
                finished_at = CASE WHEN $5 THEN $4 ELSE finished_at END
            WHERE id = $1 AND status = ANY($2)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status_strings(from))
        .bind(to.as_str())
        .bind(now)
        .bind(to.is_terminal())
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        row.map(Task::try_from).transpose()
    }

    async fn delete(&self, id: TaskId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}
