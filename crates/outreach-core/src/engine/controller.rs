//! Task Controller - start, pause, resume, cancel and delete

use crate::stats::StatsHub;
use chrono::Utc;
use outreach_common::types::TaskId;
use outreach_storage::models::{Task, TaskStatus};
use outreach_storage::repository::{TargetRepository, TaskRepository};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Task controller errors
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Task not found")]
    NotFound,

    #[error("Task has no targets")]
    EmptyTask,

    #[error("Task is running; pause or cancel it first")]
    Active,

    #[error("Storage error: {0}")]
    Storage(#[from] outreach_common::Error),
}

/// Task after a control operation, and whether the operation changed it
#[derive(Debug, Clone, Serialize)]
pub struct ControlOutcome {
    pub task: Task,
    pub changed: bool,
}

/// Task Controller
///
/// Every operation is idempotent: asking for a transition the task cannot
/// make returns it unchanged with `changed == false`.
pub struct TaskController {
    tasks: Arc<dyn TaskRepository>,
    targets: Arc<dyn TargetRepository>,
    hub: StatsHub,
}

impl TaskController {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        targets: Arc<dyn TargetRepository>,
        hub: StatsHub,
    ) -> Self {
        Self {
            tasks,
            targets,
            hub,
        }
    }

    pub async fn get(&self, task_id: TaskId) -> Result<Task, ControlError> {
        self.tasks
            .get(task_id)
            .await?
            .ok_or(ControlError::NotFound)
    }

    /// `pending` or `paused` to `running`. A pending task needs at least one target.
    pub async fn start(&self, task_id: TaskId) -> Result<ControlOutcome, ControlError> {
        let task = self.get(task_id).await?;
        match task.status {
            TaskStatus::Pending => {
                if self.targets.counts(task_id).await?.total() == 0 {
                    return Err(ControlError::EmptyTask);
                }
                self.apply(task, &[TaskStatus::Pending], TaskStatus::Running)
                    .await
            }
            TaskStatus::Paused => {
                self.apply(task, &[TaskStatus::Paused], TaskStatus::Running)
                    .await
            }
            _ => Ok(ControlOutcome {
                task,
                changed: false,
            }),
        }
    }

    /// `running` to `paused`; in-flight actions finish first
    pub async fn pause(&self, task_id: TaskId) -> Result<ControlOutcome, ControlError> {
        let task = self.get(task_id).await?;
        self.apply(task, &[TaskStatus::Running], TaskStatus::Paused)
            .await
    }

    /// `paused` to `running`
    pub async fn resume(&self, task_id: TaskId) -> Result<ControlOutcome, ControlError> {
        let task = self.get(task_id).await?;
        self.apply(task, &[TaskStatus::Paused], TaskStatus::Running)
            .await
    }

    /// Any non-terminal status to `cancelled`. Pending targets are left as they are.
    pub async fn cancel(&self, task_id: TaskId) -> Result<ControlOutcome, ControlError> {
        let task = self.get(task_id).await?;
        let outcome = self
            .apply(
                task,
                &[TaskStatus::Pending, TaskStatus::Running, TaskStatus::Paused],
                TaskStatus::Cancelled,
            )
            .await?;
        if outcome.changed {
            self.hub.close(task_id).await;
        }
        Ok(outcome)
    }

    /// Delete a task with its targets and log. Running tasks must be stopped first.
    pub async fn delete(&self, task_id: TaskId) -> Result<(), ControlError> {
        let task = self.get(task_id).await?;
        if task.status == TaskStatus::Running {
            return Err(ControlError::Active);
        }
        if !self.tasks.delete(task_id).await? {
            return Err(ControlError::NotFound);
        }
        self.hub.close(task_id).await;
        info!(task_id = %task_id, "Task deleted");
        Ok(())
    }

    async fn apply(
        &self,
        task: Task,
        from: &[TaskStatus],
        to: TaskStatus,
    ) -> Result<ControlOutcome, ControlError> {
        if !from.contains(&task.status) {
            return Ok(ControlOutcome {
                task,
                changed: false,
            });
        }

        match self.tasks.transition(task.id, from, to, Utc::now()).await? {
            Some(updated) => {
                info!(
                    task_id = %updated.id,
                    from = %task.status,
                    to = %updated.status,
                    "Task status changed"
                );
                Ok(ControlOutcome {
                    task: updated,
                    changed: true,
                })
            }
            // Someone else moved it first; report what it is now
            None => Ok(ControlOutcome {
                task: self.get(task.id).await?,
                changed: false,
            }),
        }
    }
}
