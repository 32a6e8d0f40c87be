//! Stats snapshots for one task

use super::StatsHub;
use chrono::{DateTime, Utc};
use outreach_common::types::TaskId;
use outreach_common::Result;
use outreach_storage::models::{LogSummary, TargetCounts};
use outreach_storage::repository::{ExecutionLogRepository, TargetRepository};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

/// Point-in-time progress of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub task_id: TaskId,
    pub total: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub skipped: i64,
    /// Log entries blaming the account (rate limit, flood wait, restriction)
    pub rate_limited: i64,
    /// `succeeded / (succeeded + failed + skipped)`, 0 before anything finished
    pub success_rate: f64,
    pub avg_action_duration_ms: Option<f64>,
    pub generated_at: DateTime<Utc>,
}

impl StatsSnapshot {
    pub fn from_parts(
        task_id: TaskId,
        counts: TargetCounts,
        summary: LogSummary,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let finished = counts.succeeded + counts.failed + counts.skipped;
        let success_rate = if finished > 0 {
            counts.succeeded as f64 / finished as f64
        } else {
            0.0
        };

        Self {
            task_id,
            total: counts.total(),
            pending: counts.pending,
            in_progress: counts.in_progress,
            succeeded: counts.succeeded,
            failed: counts.failed,
            skipped: counts.skipped,
            rate_limited: summary.rate_limited,
            success_rate,
            avg_action_duration_ms: summary.avg_duration_ms,
            generated_at,
        }
    }
}

/// Computes snapshots and pushes them to subscribers after each committed outcome
#[derive(Clone)]
pub struct StatsAggregator {
    targets: Arc<dyn TargetRepository>,
    logs: Arc<dyn ExecutionLogRepository>,
    hub: StatsHub,
}

impl StatsAggregator {
    pub fn new(targets: Arc<dyn TargetRepository>, logs: Arc<dyn ExecutionLogRepository>) -> Self {
        Self {
            targets,
            logs,
            hub: StatsHub::new(),
        }
    }

    pub fn hub(&self) -> &StatsHub {
        &self.hub
    }

    /// Read-only, eventually consistent snapshot
    pub async fn snapshot(&self, task_id: TaskId) -> Result<StatsSnapshot> {
        let counts = self.targets.counts(task_id).await?;
        let summary = self.logs.summary(task_id).await?;
        Ok(StatsSnapshot::from_parts(task_id, counts, summary, Utc::now()))
    }

    pub async fn subscribe(&self, task_id: TaskId) -> broadcast::Receiver<StatsSnapshot> {
        self.hub.subscribe(task_id).await
    }

    /// End every stream of a task that will not change again
    pub async fn close(&self, task_id: TaskId) {
        self.hub.close(task_id).await;
    }

    /// Publish hook, called after an outcome or requeue for the task committed.
    ///
    /// Failures are logged and swallowed; subscribers never affect the engine.
    pub async fn notify_committed(&self, task_id: TaskId) {
        if !self.hub.has_subscribers(task_id).await {
            return;
        }
        match self.snapshot(task_id).await {
            Ok(snapshot) => {
                self.hub.publish(snapshot).await;
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Failed to compute stats snapshot");
            }
        }
    }
}
