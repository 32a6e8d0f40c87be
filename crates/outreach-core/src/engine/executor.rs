//! Execution Engine - claims targets, picks accounts, performs actions and records outcomes

use super::backoff::StarvationBackoff;
use super::policy::{self, Disposition};
use crate::accounts::{AccountPool, PoolError};
use crate::classifier::{Classification, FailureClassifier};
use crate::metrics::EngineMetrics;
use crate::platform::{ActionRequest, CredentialStore, PlatformClient, RawOutcome};
use crate::stats::StatsAggregator;
use crate::targets::TargetQueue;
use chrono::{DateTime, Utc};
use outreach_common::config::{Config, EngineConfig};
use outreach_common::types::{ActionKind, ActionOutcome, TargetId, TaskId};
use outreach_common::{Error, Result};
use outreach_storage::models::{
    Account, AttemptRecord, NewLogEntry, Reservation, Target, TargetStatus, Task, TaskStatus,
};
use outreach_storage::repository::{Repositories, TaskRepository};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Result of one engine step on a task
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// An action was performed and its outcome recorded
    Dispatched {
        target_id: TargetId,
        outcome: ActionOutcome,
        /// Target status after the step; `pending` when it was requeued
        status: TargetStatus,
        /// Courtesy delay before the task's next action
        pacing: Duration,
    },
    /// A target was claimed but no account could take it; it went back to `pending`
    NoEligibleAccount { target_id: TargetId },
    /// Nothing pending, but targets are still in flight elsewhere
    Waiting,
    /// The step failed and its target was requeued
    Aborted { target_id: TargetId },
    /// The queue drained and the task reached a terminal status
    Finished(TaskStatus),
    /// The task is not running
    Stopped(TaskStatus),
}

/// Execution Engine
pub struct ExecutionEngine {
    tasks: Arc<dyn TaskRepository>,
    queue: TargetQueue,
    pool: AccountPool,
    classifier: FailureClassifier,
    platform: Arc<dyn PlatformClient>,
    credentials: Arc<dyn CredentialStore>,
    metrics: EngineMetrics,
    config: EngineConfig,
}

impl ExecutionEngine {
    /// Create a new execution engine
    pub fn new(
        repos: &Repositories,
        stats: StatsAggregator,
        platform: Arc<dyn PlatformClient>,
        credentials: Arc<dyn CredentialStore>,
        metrics: EngineMetrics,
        config: &Config,
    ) -> Self {
        Self {
            tasks: repos.tasks.clone(),
            queue: TargetQueue::new(repos.targets.clone(), stats),
            pool: AccountPool::new(repos.accounts.clone(), &config.quota),
            classifier: FailureClassifier::new(),
            platform,
            credentials,
            metrics,
            config: config.engine.clone(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &AccountPool {
        &self.pool
    }

    pub fn queue(&self) -> &TargetQueue {
        &self.queue
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Fresh backoff for a task with no eligible account
    pub fn starvation_backoff(&self) -> StarvationBackoff {
        StarvationBackoff::new(
            Duration::from_millis(self.config.starvation_backoff_initial_ms),
            Duration::from_millis(self.config.starvation_backoff_max_ms),
        )
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.config.idle_wait_ms)
    }

    /// Run one iteration of the task loop.
    ///
    /// Only structural failures are returned as errors; anything else that goes
    /// wrong with a claimed target requeues it with a log entry.
    pub async fn step(&self, task_id: TaskId) -> Result<StepOutcome> {
        let task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Task {}", task_id)))?;

        if task.status != TaskStatus::Running {
            return Ok(StepOutcome::Stopped(task.status));
        }

        let Some(target) = self.queue.claim_next(task_id, Utc::now()).await? else {
            return self.finish_if_drained(&task).await;
        };

        match self.dispatch(&task, &target).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(
                    task_id = %task.id,
                    target_id = %target.id,
                    error = %e,
                    "Engine step failed"
                );
                self.abandon(&task, &target, &e).await;
                if e.is_structural() {
                    Err(e)
                } else {
                    Ok(StepOutcome::Aborted {
                        target_id: target.id,
                    })
                }
            }
        }
    }

    /// Drive one task until it stops, finishes, or `shutdown` flips.
    ///
    /// Returns the status the task stopped in, or `None` on shutdown.
    pub async fn run_task(
        &self,
        task_id: TaskId,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<Option<TaskStatus>> {
        let mut backoff = self.starvation_backoff();
        info!(task_id = %task_id, "Task loop started");

        loop {
            if *shutdown.borrow() {
                info!(task_id = %task_id, "Task loop interrupted by shutdown");
                return Ok(None);
            }

            let wait = match self.step(task_id).await? {
                StepOutcome::Dispatched { pacing, .. } => {
                    backoff.reset();
                    pacing
                }
                StepOutcome::NoEligibleAccount { .. } => backoff.next(),
                StepOutcome::Waiting | StepOutcome::Aborted { .. } => self.idle_wait(),
                StepOutcome::Finished(status) | StepOutcome::Stopped(status) => {
                    info!(task_id = %task_id, status = %status, "Task loop stopped");
                    return Ok(Some(status));
                }
            };

            if wait.is_zero() {
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn finish_if_drained(&self, task: &Task) -> Result<StepOutcome> {
        let counts = self.queue.counts(task.id).await?;
        if counts.pending > 0 || counts.in_progress > 0 {
            return Ok(StepOutcome::Waiting);
        }

        let status = policy::final_status(&counts, self.config.failure_ratio_threshold);
        let transitioned = self
            .tasks
            .transition(task.id, &[TaskStatus::Running], status, Utc::now())
            .await?;

        match transitioned {
            Some(_) => {
                self.queue.stats().close(task.id).await;
                info!(
                    task_id = %task.id,
                    status = %status,
                    succeeded = counts.succeeded,
                    failed = counts.failed,
                    skipped = counts.skipped,
                    "Task finished"
                );
                Ok(StepOutcome::Finished(status))
            }
            // Lost to a concurrent pause, cancel or finishing worker
            None => {
                let current = self
                    .tasks
                    .get(task.id)
                    .await?
                    .map_or(TaskStatus::Cancelled, |t| t.status);
                Ok(StepOutcome::Stopped(current))
            }
        }
    }

    async fn dispatch(&self, task: &Task, target: &Target) -> Result<StepOutcome> {
        let Some((account, reservation)) = self.select_account(task).await? else {
            self.queue
                .requeue(target.id, AttemptRecord::default(), Utc::now())
                .await?;
            self.metrics.record_starvation();
            debug!(
                task_id = %task.id,
                target_id = %target.id,
                platform = %task.platform,
                "No eligible account, target requeued"
            );
            return Ok(StepOutcome::NoEligibleAccount {
                target_id: target.id,
            });
        };

        // A pause or cancel may have landed while an account was being selected
        let status = match self.tasks.get(task.id).await {
            Ok(current) => current.map_or(TaskStatus::Cancelled, |t| t.status),
            Err(e) => {
                self.release_quietly(&reservation).await;
                return Err(e);
            }
        };
        if status != TaskStatus::Running {
            let now = Utc::now();
            self.pool.release(&reservation, now).await?;
            self.queue
                .requeue(target.id, AttemptRecord::default(), now)
                .await?;
            debug!(task_id = %task.id, status = %status, "Task stopped before dispatch");
            return Ok(StepOutcome::Stopped(status));
        }

        let request = ActionRequest {
            account_id: account.id,
            action: task.action_type,
            target: target.external_identifier.clone(),
            payload: task.payload.clone(),
            add_contact: task.action_type == ActionKind::InviteToGroup
                && task.settings.auto_add_contacts,
        };
        let (mut classification, elapsed) = self.perform(&account, &request).await;
        let performed_at = Utc::now();
        self.pool
            .commit(&reservation, &classification, performed_at)
            .await?;

        let mut log = vec![self.log_entry(
            target,
            &account,
            request.action,
            &classification,
            elapsed,
            performed_at,
        )];

        if self.should_fall_back(task, &classification) {
            if let Some((fallback, entry)) = self.fall_back(task, target, &account).await? {
                classification = fallback;
                log.push(entry);
            }
        }

        let disposition = policy::disposition(
            &classification.outcome,
            target.attempt_count,
            self.config.max_attempts,
        );
        let record = AttemptRecord {
            account_id: Some(account.id),
            error: match classification.outcome {
                ActionOutcome::Succeeded => None,
                ref outcome => Some(
                    classification
                        .detail
                        .clone()
                        .unwrap_or_else(|| outcome.to_string()),
                ),
            },
            count_attempt: disposition.counts_attempt(),
            log,
        };

        let now = Utc::now();
        let status = match disposition {
            Disposition::Finish(status) => {
                self.queue
                    .mark_outcome(target.id, status, record, now)
                    .await?;
                self.metrics.record_finished(status);
                status
            }
            Disposition::Retry { .. } => {
                self.queue.requeue(target.id, record, now).await?;
                TargetStatus::Pending
            }
        };

        debug!(
            task_id = %task.id,
            target_id = %target.id,
            account_id = %account.id,
            outcome = %classification.outcome,
            status = %status,
            "Target attempt recorded"
        );

        Ok(StepOutcome::Dispatched {
            target_id: target.id,
            outcome: classification.outcome,
            status,
            pacing: task.settings.delay_between_actions(),
        })
    }

    /// Reserve the least recently used eligible account.
    ///
    /// A lost race moves on to the next candidate; after `max_reserve_attempts`
    /// rounds without a reservation the target is given up for now.
    async fn select_account(&self, task: &Task) -> Result<Option<(Account, Reservation)>> {
        for round in 0..self.config.max_reserve_attempts.max(1) {
            let now = Utc::now();
            let eligible = self
                .pool
                .list_eligible(task.owner_id, &task.platform, now)
                .await?;
            if eligible.is_empty() {
                return Ok(None);
            }

            for account in eligible {
                match self.pool.reserve(account.id, now).await {
                    Ok(reservation) => return Ok(Some((account, reservation))),
                    Err(PoolError::Storage(e)) => return Err(e),
                    Err(reason) => {
                        debug!(
                            task_id = %task.id,
                            account_id = %account.id,
                            round,
                            reason = %reason,
                            "Lost reservation race"
                        );
                    }
                }
            }
        }
        Ok(None)
    }

    async fn perform(
        &self,
        account: &Account,
        request: &ActionRequest,
    ) -> (Classification, Duration) {
        let started = Instant::now();

        let raw = match self.credentials.resolve(&account.credential_reference).await {
            Ok(credential) => {
                let call = self.platform.perform_action(&credential, request);
                match tokio::time::timeout(
                    Duration::from_secs(self.config.action_timeout_secs),
                    call,
                )
                .await
                {
                    Ok(raw) => raw,
                    Err(_) => RawOutcome::TimedOut,
                }
            }
            Err(e) => {
                warn!(
                    account_id = %account.id,
                    error = %e,
                    "Failed to resolve account credential"
                );
                RawOutcome::Rejected {
                    code: "CREDENTIAL_UNAVAILABLE".to_string(),
                    message: Some(e.to_string()),
                    retry_after_secs: None,
                    sent: false,
                }
            }
        };

        let elapsed = started.elapsed();
        let classification = self.classifier.classify(&raw);
        self.metrics.record_action(&classification.outcome, elapsed);
        (classification, elapsed)
    }

    fn should_fall_back(&self, task: &Task, classification: &Classification) -> bool {
        task.settings.fallback_to_message
            && task.action_type == ActionKind::InviteToGroup
            && classification.outcome == ActionOutcome::TargetUnreachable
    }

    /// Message a target that could not be invited, on the same account
    async fn fall_back(
        &self,
        task: &Task,
        target: &Target,
        account: &Account,
    ) -> Result<Option<(Classification, NewLogEntry)>> {
        let reservation = match self.pool.reserve(account.id, Utc::now()).await {
            Ok(reservation) => reservation,
            Err(PoolError::Storage(e)) => return Err(e),
            Err(reason) => {
                debug!(
                    task_id = %task.id,
                    target_id = %target.id,
                    reason = %reason,
                    "Fallback message not possible"
                );
                return Ok(None);
            }
        };

        let request = ActionRequest {
            account_id: account.id,
            action: ActionKind::SendMessage,
            target: target.external_identifier.clone(),
            payload: task.payload.clone(),
            add_contact: false,
        };
        let (classification, elapsed) = self.perform(account, &request).await;
        let performed_at = Utc::now();
        self.pool
            .commit(&reservation, &classification, performed_at)
            .await?;

        let entry = self.log_entry(
            target,
            account,
            request.action,
            &classification,
            elapsed,
            performed_at,
        );
        Ok(Some((classification, entry)))
    }

    fn log_entry(
        &self,
        target: &Target,
        account: &Account,
        action_kind: ActionKind,
        classification: &Classification,
        elapsed: Duration,
        created_at: DateTime<Utc>,
    ) -> NewLogEntry {
        NewLogEntry {
            task_id: target.task_id,
            target_id: target.id,
            account_id: Some(account.id),
            action_kind,
            outcome: classification.outcome.clone(),
            attempt: target.attempt_count.saturating_add(1),
            duration_ms: Some(i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)),
            detail: classification.detail.clone(),
            created_at,
        }
    }

    async fn release_quietly(&self, reservation: &Reservation) {
        if let Err(e) = self.pool.release(reservation, Utc::now()).await {
            warn!(
                account_id = %reservation.account_id,
                error = %e,
                "Failed to release reservation"
            );
        }
    }

    /// Put a target whose step failed back in the queue, noting the anomaly in the log
    async fn abandon(&self, task: &Task, target: &Target, cause: &Error) {
        let now = Utc::now();
        let detail = format!("engine error: {}", cause);
        let record = AttemptRecord {
            account_id: None,
            error: Some(detail.clone()),
            count_attempt: false,
            log: vec![NewLogEntry {
                task_id: task.id,
                target_id: target.id,
                account_id: None,
                action_kind: task.action_type,
                outcome: ActionOutcome::UnknownError,
                attempt: target.attempt_count,
                duration_ms: None,
                detail: Some(detail),
                created_at: now,
            }],
        };

        if let Err(e) = self.queue.requeue(target.id, record, now).await {
            error!(
                task_id = %task.id,
                target_id = %target.id,
                error = %e,
                "Failed to requeue target after engine error"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::Harness;
    use chrono::Duration as ChronoDuration;
    use outreach_common::types::OutcomeKind;
    use outreach_storage::models::{AccountStatus, TaskSettings};
    use outreach_storage::repository::{AccountRepository, ExecutionLogRepository, TargetRepository};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_happy_path() {
        let h = Harness::new().await;
        let account = h.account(10).await;
        let task = h
            .running_task(ActionKind::InviteToGroup, &["@a", "@b", "@c"], TaskSettings::default())
            .await;

        let status = h.engine.run_task(task.id, h.shutdown()).await.unwrap();
        assert_eq!(status, Some(TaskStatus::Completed));

        let counts = h.store.counts(task.id).await.unwrap();
        assert_eq!(counts.succeeded, 3);
        assert_eq!(counts.total(), 3);

        let account = AccountRepository::get(&*h.store, account.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.actions_used_today, 3);
        assert_eq!(h.platform.calls().await.len(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_leaves_task_running() {
        let h = Harness::new().await;
        let account = h.account(2).await;
        let task = h
            .running_task(
                ActionKind::InviteToGroup,
                &["@a", "@b", "@c", "@d", "@e"],
                TaskSettings::default(),
            )
            .await;

        let mut outcomes = Vec::new();
        for _ in 0..3 {
            outcomes.push(h.engine.step(task.id).await.unwrap());
        }
        for outcome in &outcomes[..2] {
            assert!(matches!(
                outcome,
                StepOutcome::Dispatched {
                    status: TargetStatus::Succeeded,
                    ..
                }
            ));
        }
        assert!(matches!(outcomes[2], StepOutcome::NoEligibleAccount { .. }));

        let counts = h.store.counts(task.id).await.unwrap();
        assert_eq!(counts.succeeded, 2);
        assert_eq!(counts.pending, 3);
        assert_eq!(counts.in_progress, 0);
        assert_eq!(h.task_status(task.id).await, TaskStatus::Running);

        let account = AccountRepository::get(&*h.store, account.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.actions_used_today, 2);
    }

    #[tokio::test]
    async fn test_hourly_limit_skips_account_until_window_rolls() {
        let h = Harness::new().await;
        let mut limited = h.account(10).await;
        limited.hourly_action_limit = Some(1);
        h.store.put_account(limited.clone()).await;
        let task = h
            .running_task(
                ActionKind::SendMessage,
                &["@a", "@b", "@c", "@d"],
                TaskSettings::default(),
            )
            .await;

        assert!(matches!(
            h.engine.step(task.id).await.unwrap(),
            StepOutcome::Dispatched { .. }
        ));
        assert!(matches!(
            h.engine.step(task.id).await.unwrap(),
            StepOutcome::NoEligibleAccount { .. }
        ));

        // Another account picks up the slack while the hour is still open
        let spare = h.account(10).await;
        assert!(matches!(
            h.engine.step(task.id).await.unwrap(),
            StepOutcome::Dispatched { .. }
        ));

        let mut rolled = AccountRepository::get(&*h.store, limited.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rolled.actions_in_current_hour(Utc::now()), 1);
        rolled.hour_window_start = Some(Utc::now() - ChronoDuration::minutes(61));
        h.store.put_account(rolled).await;

        assert!(matches!(
            h.engine.step(task.id).await.unwrap(),
            StepOutcome::Dispatched { .. }
        ));

        let used: Vec<_> = h
            .platform
            .calls()
            .await
            .iter()
            .map(|call| call.account_id)
            .collect();
        assert_eq!(used, vec![limited.id, spare.id, limited.id]);

        let limited = AccountRepository::get(&*h.store, limited.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(limited.actions_used_today, 2);
        assert_eq!(limited.actions_this_hour, 1);
        assert_eq!(h.store.counts(task.id).await.unwrap().succeeded, 3);
    }

    #[tokio::test]
    async fn test_terminal_rejection_fails_first_attempt() {
        let h = Harness::new().await;
        h.account(10).await;
        h.platform
            .script("@ghost", vec![RawOutcome::rejected("USERNAME_NOT_OCCUPIED")])
            .await;
        let task = h
            .running_task(ActionKind::InviteToGroup, &["@ghost"], TaskSettings::default())
            .await;

        let outcome = h.engine.step(task.id).await.unwrap();
        assert!(matches!(
            outcome,
            StepOutcome::Dispatched {
                outcome: ActionOutcome::TargetInvalid,
                status: TargetStatus::Failed,
                ..
            }
        ));

        let target = h.only_target(task.id).await;
        assert_eq!(target.attempt_count, 1);
        assert_eq!(target.last_error.as_deref(), Some("USERNAME_NOT_OCCUPIED"));

        // A single bad target out of one is over any threshold below 1.0
        assert_eq!(
            h.engine.step(task.id).await.unwrap(),
            StepOutcome::Finished(TaskStatus::Failed)
        );
    }

    #[tokio::test]
    async fn test_flood_wait_cools_account_exactly() {
        let h = Harness::new().await;
        let account = h.account(10).await;
        h.platform
            .script("@a", vec![RawOutcome::rejected("FLOOD_WAIT_120")])
            .await;
        let task = h
            .running_task(ActionKind::InviteToGroup, &["@a"], TaskSettings::default())
            .await;

        let before = Utc::now();
        let outcome = h.engine.step(task.id).await.unwrap();
        let after = Utc::now();
        assert!(matches!(
            outcome,
            StepOutcome::Dispatched {
                outcome: ActionOutcome::FloodWait { seconds: 120 },
                status: TargetStatus::Pending,
                ..
            }
        ));

        let account = AccountRepository::get(&*h.store, account.id)
            .await
            .unwrap()
            .unwrap();
        let until = account.cooldown_until.unwrap();
        assert!(until >= before + ChronoDuration::seconds(120));
        assert!(until <= after + ChronoDuration::seconds(120));
        // Rejected before send: quota handed back
        assert_eq!(account.actions_used_today, 0);
        let guard = h.engine.pool().guard();
        assert!(!guard.eligible(&account, until - ChronoDuration::milliseconds(1)));
        assert!(guard.eligible(&account, until));

        let target = h.only_target(task.id).await;
        assert_eq!(target.status, TargetStatus::Pending);
        assert_eq!(target.attempt_count, 0);

        // The only account is cooling down now
        assert!(matches!(
            h.engine.step(task.id).await.unwrap(),
            StepOutcome::NoEligibleAccount { .. }
        ));

        let logs = ExecutionLogRepository::list(&*h.store, task.id, 10, 0)
            .await
            .unwrap();
        assert_eq!(logs.data.len(), 1);
        assert_eq!(logs.data[0].outcome, OutcomeKind::FloodWait);
        assert_eq!(logs.data[0].wait_seconds, Some(120));
    }

    #[tokio::test]
    async fn test_transient_failures_hit_retry_ceiling() {
        let h = Harness::new().await;
        h.account(10).await;
        let flaky = RawOutcome::Network {
            message: "connection reset".to_string(),
        };
        h.platform
            .script("@a", vec![flaky.clone(), flaky.clone(), flaky])
            .await;
        let task = h
            .running_task(ActionKind::SendMessage, &["@a"], TaskSettings::default())
            .await;

        for expected in [TargetStatus::Pending, TargetStatus::Pending, TargetStatus::Failed] {
            match h.engine.step(task.id).await.unwrap() {
                StepOutcome::Dispatched { status, outcome, .. } => {
                    assert_eq!(outcome, ActionOutcome::TransientNetworkError);
                    assert_eq!(status, expected);
                }
                other => panic!("unexpected step outcome {:?}", other),
            }
        }

        let target = h.only_target(task.id).await;
        assert_eq!(target.attempt_count, 3);
        assert_eq!(target.last_error.as_deref(), Some("connection reset"));
    }

    #[tokio::test]
    async fn test_rate_limit_moves_to_next_account() {
        let h = Harness::new().await;
        let first = h.account(10).await;
        let second = h.account(10).await;
        h.platform
            .script("@a", vec![RawOutcome::rejected("PEER_FLOOD")])
            .await;
        let task = h
            .running_task(ActionKind::InviteToGroup, &["@a"], TaskSettings::default())
            .await;

        h.engine.step(task.id).await.unwrap();
        h.engine.step(task.id).await.unwrap();

        let calls = h.platform.calls().await;
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0].account_id, calls[1].account_id);
        assert!([first.id, second.id].contains(&calls[0].account_id));

        let target = h.only_target(task.id).await;
        assert_eq!(target.status, TargetStatus::Succeeded);
        assert_eq!(target.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_restricted_account_is_parked() {
        let h = Harness::new().await;
        let account = h.account(10).await;
        h.platform
            .script("@a", vec![RawOutcome::rejected("SESSION_REVOKED")])
            .await;
        let task = h
            .running_task(ActionKind::InviteToGroup, &["@a"], TaskSettings::default())
            .await;

        h.engine.step(task.id).await.unwrap();

        let account = AccountRepository::get(&*h.store, account.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.status, AccountStatus::CoolingDown);
        assert_eq!(account.failure_streak, 1);
        assert_eq!(h.only_target(task.id).await.status, TargetStatus::Pending);
    }

    #[tokio::test]
    async fn test_fallback_to_message() {
        let h = Harness::new().await;
        let account = h.account(10).await;
        h.platform
            .script("@private", vec![RawOutcome::rejected("USER_PRIVACY_RESTRICTED")])
            .await;
        let settings = TaskSettings {
            fallback_to_message: true,
            auto_add_contacts: true,
            ..TaskSettings::default()
        };
        let task = h
            .running_task(ActionKind::InviteToGroup, &["@private"], settings)
            .await;

        let outcome = h.engine.step(task.id).await.unwrap();
        assert!(matches!(
            outcome,
            StepOutcome::Dispatched {
                outcome: ActionOutcome::Succeeded,
                status: TargetStatus::Succeeded,
                ..
            }
        ));

        let calls = h.platform.calls().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].action, ActionKind::InviteToGroup);
        assert!(calls[0].add_contact);
        assert_eq!(calls[1].action, ActionKind::SendMessage);
        assert!(!calls[1].add_contact);

        let logs = ExecutionLogRepository::list(&*h.store, task.id, 10, 0)
            .await
            .unwrap();
        let kinds: Vec<_> = logs.data.iter().map(|e| (e.action_kind, e.outcome)).collect();
        assert_eq!(
            kinds,
            vec![
                (ActionKind::InviteToGroup, OutcomeKind::TargetUnreachable),
                (ActionKind::SendMessage, OutcomeKind::Succeeded),
            ]
        );

        // The rejected invite never executed, only the message used quota
        let account = AccountRepository::get(&*h.store, account.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.actions_used_today, 1);
    }

    #[tokio::test]
    async fn test_unreachable_without_fallback_is_skipped() {
        let h = Harness::new().await;
        h.account(10).await;
        h.platform
            .script("@private", vec![RawOutcome::rejected("USER_PRIVACY_RESTRICTED")])
            .await;
        let task = h
            .running_task(ActionKind::InviteToGroup, &["@private"], TaskSettings::default())
            .await;

        h.engine.step(task.id).await.unwrap();
        assert_eq!(h.only_target(task.id).await.status, TargetStatus::Skipped);
        assert_eq!(h.platform.calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_credential_parks_account() {
        let h = Harness::new().await;
        let account = h.account_with_credential(10, "unknown-reference").await;
        let task = h
            .running_task(ActionKind::SendMessage, &["@a"], TaskSettings::default())
            .await;

        let outcome = h.engine.step(task.id).await.unwrap();
        assert!(matches!(
            outcome,
            StepOutcome::Dispatched {
                outcome: ActionOutcome::AccountRestricted,
                status: TargetStatus::Pending,
                ..
            }
        ));
        assert!(h.platform.calls().await.is_empty());

        let account = AccountRepository::get(&*h.store, account.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.status, AccountStatus::CoolingDown);
        assert_eq!(account.actions_used_today, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_platform_times_out() {
        let h = Harness::with_config(|config| config.engine.action_timeout_secs = 1).await;
        let account = h.account(10).await;
        h.platform.set_delay(Duration::from_secs(5)).await;
        let task = h
            .running_task(ActionKind::SendMessage, &["@a"], TaskSettings::default())
            .await;

        let outcome = h.engine.step(task.id).await.unwrap();
        assert!(matches!(
            outcome,
            StepOutcome::Dispatched {
                outcome: ActionOutcome::TransientNetworkError,
                status: TargetStatus::Pending,
                ..
            }
        ));

        // A timed-out call may have been performed, so it keeps its quota
        let account = AccountRepository::get(&*h.store, account.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.actions_used_today, 1);
    }

    #[tokio::test]
    async fn test_paused_task_stops_stepping() {
        let h = Harness::new().await;
        h.account(10).await;
        let task = h
            .running_task(ActionKind::InviteToGroup, &["@a", "@b"], TaskSettings::default())
            .await;

        h.engine.step(task.id).await.unwrap();
        h.store
            .transition(task.id, &[TaskStatus::Running], TaskStatus::Paused, Utc::now())
            .await
            .unwrap();

        assert_eq!(
            h.engine.step(task.id).await.unwrap(),
            StepOutcome::Stopped(TaskStatus::Paused)
        );
        let counts = h.store.counts(task.id).await.unwrap();
        assert_eq!(counts.succeeded, 1);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.in_progress, 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_halts_loop() {
        let h = Harness::new().await;
        h.account(10).await;
        let task = h
            .running_task(ActionKind::InviteToGroup, &["@a"], TaskSettings::default())
            .await;

        h.store.set_unavailable(true);
        let err = h.engine.run_task(task.id, h.shutdown()).await.unwrap_err();
        assert!(err.is_structural());

        h.store.set_unavailable(false);
        let target = h.only_target(task.id).await;
        assert_eq!(target.status, TargetStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_task_waits_out_pacing_and_shutdown() {
        let h = Harness::new().await;
        h.account(10).await;
        let settings = TaskSettings {
            delay_between_actions_ms: 60_000,
            ..TaskSettings::default()
        };
        let task = h
            .running_task(ActionKind::SendMessage, &["@a", "@b"], settings)
            .await;

        let (tx, rx) = watch::channel(false);
        let engine = h.engine.clone();
        let task_id = task.id;
        let handle = tokio::spawn(async move { engine.run_task(task_id, rx).await });

        // One action, then a minute of pacing
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.platform.calls().await.len(), 1);

        tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap().unwrap(), None);
        assert_eq!(h.platform.calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_engines_respect_shared_quota() {
        let h = Harness::new().await;
        let account = h.account(4).await;
        let first = h
            .running_task(ActionKind::InviteToGroup, &["@a", "@b", "@c"], TaskSettings::default())
            .await;
        let second = h
            .running_task(ActionKind::SendMessage, &["@d", "@e", "@f"], TaskSettings::default())
            .await;

        let mut handles = Vec::new();
        for task_id in [first.id, second.id] {
            let engine = h.engine.clone();
            handles.push(tokio::spawn(async move {
                let mut dispatched = 0;
                for _ in 0..6 {
                    if let Ok(StepOutcome::Dispatched { .. }) = engine.step(task_id).await {
                        dispatched += 1;
                    }
                }
                dispatched
            }));
        }
        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        assert_eq!(total, 4);

        let account = AccountRepository::get(&*h.store, account.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.actions_used_today, 4);
        let pending = h.store.counts(first.id).await.unwrap().pending
            + h.store.counts(second.id).await.unwrap().pending;
        assert_eq!(pending, 2);
    }

    #[tokio::test]
    async fn test_step_on_unknown_task() {
        let h = Harness::new().await;
        let err = h.engine.step(uuid::Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_targets_untouched_by_other_tasks() {
        let h = Harness::new().await;
        h.account(10).await;
        let first = h
            .running_task(ActionKind::InviteToGroup, &["@a"], TaskSettings::default())
            .await;
        let second = h
            .running_task(ActionKind::InviteToGroup, &["@a"], TaskSettings::default())
            .await;

        h.engine.step(first.id).await.unwrap();
        let untouched = TargetRepository::list(&*h.store, second.id, None, 10, 0)
            .await
            .unwrap();
        assert_eq!(untouched.data[0].status, TargetStatus::Pending);
    }
}
