//! Target Queue - claims and status transitions for a task's targets

use crate::stats::StatsAggregator;
use chrono::{DateTime, Utc};
use outreach_common::types::{TargetId, TaskId};
use outreach_common::Result;
use outreach_storage::models::{AttemptRecord, Target, TargetCounts, TargetStatus};
use outreach_storage::repository::TargetRepository;
use std::sync::Arc;
use tracing::debug;

/// Target Queue
///
/// Every committed transition fires the stats publish hook for its task.
#[derive(Clone)]
pub struct TargetQueue {
    repo: Arc<dyn TargetRepository>,
    stats: StatsAggregator,
}

impl TargetQueue {
    pub fn new(repo: Arc<dyn TargetRepository>, stats: StatsAggregator) -> Self {
        Self { repo, stats }
    }

    /// Claim the earliest pending target; no two claims return the same one
    pub async fn claim_next(&self, task_id: TaskId, now: DateTime<Utc>) -> Result<Option<Target>> {
        let claimed = self.repo.claim_next(task_id, now).await?;
        if let Some(ref target) = claimed {
            debug!(
                task_id = %task_id,
                target_id = %target.id,
                position = target.position,
                "Claimed target"
            );
        }
        Ok(claimed)
    }

    /// `in_progress` to a final status, with the attempt's log entries in the same transaction
    pub async fn mark_outcome(
        &self,
        target_id: TargetId,
        status: TargetStatus,
        attempt: AttemptRecord,
        now: DateTime<Utc>,
    ) -> Result<Target> {
        let target = self.repo.mark_outcome(target_id, status, attempt, now).await?;
        self.stats.notify_committed(target.task_id).await;
        Ok(target)
    }

    /// `in_progress` back to `pending`
    pub async fn requeue(
        &self,
        target_id: TargetId,
        attempt: AttemptRecord,
        now: DateTime<Utc>,
    ) -> Result<Target> {
        let target = self.repo.requeue(target_id, attempt, now).await?;
        self.stats.notify_committed(target.task_id).await;
        Ok(target)
    }

    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    pub async fn counts(&self, task_id: TaskId) -> Result<TargetCounts> {
        self.repo.counts(task_id).await
    }

    /// Targets claimed before `cutoff` and never finished
    pub async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Target>> {
        self.repo.list_stale(cutoff).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outreach_common::types::ActionKind;
    use outreach_storage::models::{NewTarget, NewTask};
    use outreach_storage::repository::TaskRepository;
    use outreach_storage::MemoryStore;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    async fn queue_with_targets(n: usize) -> (TargetQueue, StatsAggregator, TaskId) {
        let store = Arc::new(MemoryStore::new());
        let task = TaskRepository::create(
            &*store,
            NewTask {
                owner_id: Uuid::now_v7(),
                platform: "telegram".to_string(),
                action_type: ActionKind::InviteToGroup,
                priority: Default::default(),
                settings: Default::default(),
                payload: serde_json::Value::Null,
            },
        )
        .await
        .unwrap();
        let targets = (0..n)
            .map(|i| NewTarget::manual(format!("@user{}", i)))
            .collect();
        store.insert_batch(task.id, targets).await.unwrap();

        let stats = StatsAggregator::new(store.clone(), store.clone());
        (TargetQueue::new(store, stats.clone()), stats, task.id)
    }

    #[tokio::test]
    async fn test_claims_follow_insertion_order() {
        let (queue, _, task_id) = queue_with_targets(3).await;
        let now = Utc::now();

        let mut claimed = Vec::new();
        while let Some(target) = queue.claim_next(task_id, now).await.unwrap() {
            claimed.push(target.external_identifier);
        }
        assert_eq!(claimed, vec!["@user0", "@user1", "@user2"]);
    }

    #[tokio::test]
    async fn test_requeue_publishes_snapshot() {
        let (queue, stats, task_id) = queue_with_targets(2).await;
        let mut receiver = stats.subscribe(task_id).await;
        let now = Utc::now();

        let target = queue.claim_next(task_id, now).await.unwrap().unwrap();
        let requeued = queue
            .requeue(target.id, AttemptRecord::default(), now)
            .await
            .unwrap();
        assert_eq!(requeued.status, TargetStatus::Pending);
        assert_eq!(requeued.attempt_count, 0);

        let snapshot = receiver.recv().await.unwrap();
        assert_eq!(snapshot.pending, 2);
        assert_eq!(snapshot.in_progress, 0);
    }

    #[tokio::test]
    async fn test_conservation_after_each_transition() {
        let (queue, _, task_id) = queue_with_targets(4).await;
        let now = Utc::now();

        let first = queue.claim_next(task_id, now).await.unwrap().unwrap();
        assert_eq!(queue.counts(task_id).await.unwrap().total(), 4);

        queue
            .mark_outcome(first.id, TargetStatus::Skipped, AttemptRecord::default(), now)
            .await
            .unwrap();
        let counts = queue.counts(task_id).await.unwrap();
        assert_eq!(counts.total(), 4);
        assert_eq!(counts.skipped, 1);
        assert_eq!(counts.pending, 3);
    }
}
