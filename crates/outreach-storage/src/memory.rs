//! In-memory storage backend
//!
//! Implements every repository trait over one mutex-guarded state, so each
//! operation is atomic with respect to all others. Used by tests and by the
//! `memory` database backend for single-process runs.

use crate::models::{
    Account, AttemptRecord, ExecutionLogEntry, LogSummary, NewAccount, NewLogEntry, NewTarget,
    NewTask, ReserveOutcome, Reservation, Settlement, Target, TargetCounts, TargetStatus, Task,
    TaskStatus,
};
use crate::repository::execution_log::RATE_LIMIT_OUTCOMES;
use crate::repository::{
    AccountRepository, ExecutionLogRepository, TargetRepository, TaskRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use outreach_common::types::{AccountId, OwnerId, Paginated, TargetId, TaskId};
use outreach_common::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// In-memory store for tasks, targets, accounts and the execution log
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

#[derive(Default)]
struct Inner {
    tasks: HashMap<TaskId, Task>,
    targets: HashMap<TargetId, Target>,
    /// Target ids per task in insertion order
    task_targets: HashMap<TaskId, Vec<TargetId>>,
    accounts: HashMap<AccountId, Account>,
    logs: Vec<ExecutionLogEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with a database error, as if the backend went away
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    async fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Database("memory store unavailable".to_string()));
        }
        Ok(self.inner.lock().await)
    }

    /// Replace an account wholesale; lets tests stage counters and cooldowns
    pub async fn put_account(&self, account: Account) {
        let mut inner = self.inner.lock().await;
        inner.accounts.insert(account.id, account);
    }
}

impl Inner {
    fn finish_attempt(
        &mut self,
        id: TargetId,
        status: TargetStatus,
        attempt: AttemptRecord,
        now: DateTime<Utc>,
    ) -> Result<Target> {
        let target = self
            .targets
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Target {}", id)))?;

        if target.status != TargetStatus::InProgress {
            return Err(Error::Conflict(format!(
                "Target {} is {}, not in_progress",
                id, target.status
            )));
        }

        target.status = status;
        if attempt.count_attempt {
            target.attempt_count += 1;
        }
        if attempt.account_id.is_some() {
            target.last_attempted_account_id = attempt.account_id;
        }
        if attempt.error.is_some() {
            target.last_error = attempt.error;
        }
        target.updated_at = now;
        let target = target.clone();

        self.logs
            .extend(attempt.log.into_iter().map(NewLogEntry::into_entry));
        Ok(target)
    }

    fn account_mut(&mut self, id: AccountId) -> Result<&mut Account> {
        self.accounts
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Account {}", id)))
    }
}

#[async_trait]
impl TaskRepository for MemoryStore {
    async fn create(&self, input: NewTask) -> Result<Task> {
        let now = Utc::now();
        let task = Task {
            id: Uuid::now_v7(),
            owner_id: input.owner_id,
            platform: input.platform,
            action_type: input.action_type,
            priority: input.priority,
            status: TaskStatus::Pending,
            settings: input.settings,
            payload: input.payload,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        };

        let mut inner = self.lock().await?;
        inner.tasks.insert(task.id, task.clone());
        inner.task_targets.insert(task.id, Vec::new());
        Ok(task)
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>> {
        let inner = self.lock().await?;
        Ok(inner.tasks.get(&id).cloned())
    }

    async fn list_running(&self) -> Result<Vec<Task>> {
        let inner = self.lock().await?;
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Running)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(tasks)
    }

    async fn transition(
        &self,
        id: TaskId,
        from: &[TaskStatus],
        to: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>> {
        let mut inner = self.lock().await?;
        let Some(task) = inner.tasks.get_mut(&id) else {
            return Ok(None);
        };
        if !from.contains(&task.status) {
            return Ok(None);
        }

        task.status = to;
        task.updated_at = now;
        if to == TaskStatus::Running && task.started_at.is_none() {
            task.started_at = Some(now);
        }
        if to.is_terminal() {
            task.finished_at = Some(now);
        }
        Ok(Some(task.clone()))
    }

    async fn delete(&self, id: TaskId) -> Result<bool> {
        let mut inner = self.lock().await?;
        if inner.tasks.remove(&id).is_none() {
            return Ok(false);
        }
        if let Some(ids) = inner.task_targets.remove(&id) {
            for target_id in ids {
                inner.targets.remove(&target_id);
            }
        }
        inner.logs.retain(|entry| entry.task_id != id);
        Ok(true)
    }
}

#[async_trait]
impl TargetRepository for MemoryStore {
    async fn insert_batch(&self, task_id: TaskId, targets: Vec<NewTarget>) -> Result<u64> {
        let now = Utc::now();
        let mut guard = self.lock().await?;
        let inner = &mut *guard;

        let ids = inner
            .task_targets
            .get_mut(&task_id)
            .ok_or_else(|| Error::NotFound(format!("Task {}", task_id)))?;

        let mut position = ids
            .last()
            .and_then(|id| inner.targets.get(id))
            .map_or(0, |t| t.position);

        let mut count = 0u64;
        for new in targets {
            let duplicate = ids.iter().any(|id| {
                inner
                    .targets
                    .get(id)
                    .is_some_and(|t| t.external_identifier == new.external_identifier)
            });
            if duplicate {
                continue;
            }

            position += 1;
            let target = Target {
                id: Uuid::now_v7(),
                task_id,
                external_identifier: new.external_identifier,
                status: TargetStatus::Pending,
                source: new.source,
                position,
                last_attempted_account_id: None,
                attempt_count: 0,
                last_error: None,
                last_attempt_at: None,
                created_at: now,
                updated_at: now,
            };
            ids.push(target.id);
            inner.targets.insert(target.id, target);
            count += 1;
        }
        Ok(count)
    }

    async fn get(&self, id: TargetId) -> Result<Option<Target>> {
        let inner = self.lock().await?;
        Ok(inner.targets.get(&id).cloned())
    }

    async fn claim_next(&self, task_id: TaskId, now: DateTime<Utc>) -> Result<Option<Target>> {
        let mut guard = self.lock().await?;
        let inner = &mut *guard;

        let Some(ids) = inner.task_targets.get(&task_id) else {
            return Ok(None);
        };
        for id in ids {
            if let Some(target) = inner.targets.get_mut(id) {
                if target.status == TargetStatus::Pending {
                    target.status = TargetStatus::InProgress;
                    target.last_attempt_at = Some(now);
                    target.updated_at = now;
                    return Ok(Some(target.clone()));
                }
            }
        }
        Ok(None)
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
        let mut inner = self.lock().await?;
        inner.finish_attempt(id, status, attempt, now)
    }

    async fn requeue(
        &self,
        id: TargetId,
        attempt: AttemptRecord,
        now: DateTime<Utc>,
    ) -> Result<Target> {
        let mut inner = self.lock().await?;
        inner.finish_attempt(id, TargetStatus::Pending, attempt, now)
    }

    async fn counts(&self, task_id: TaskId) -> Result<TargetCounts> {
        let inner = self.lock().await?;
        let mut counts = TargetCounts::default();
        for id in inner.task_targets.get(&task_id).into_iter().flatten() {
            if let Some(target) = inner.targets.get(id) {
                counts.add(target.status, 1);
            }
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
        let inner = self.lock().await?;
        let rows: Vec<Target> = inner
            .task_targets
            .get(&task_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.targets.get(id))
            .filter(|t| status.map_or(true, |s| t.status == s))
            .skip(offset.max(0) as usize)
            .take((limit.max(0) + 1) as usize)
            .cloned()
            .collect();
        Ok(Paginated::from_overfetch(rows, limit, offset))
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Target>> {
        let inner = self.lock().await?;
        let mut stale: Vec<Target> = inner
            .targets
            .values()
            .filter(|t| {
                t.status == TargetStatus::InProgress
                    && t.last_attempt_at.is_some_and(|at| at < cutoff)
            })
            .cloned()
            .collect();
        stale.sort_by_key(|t| t.last_attempt_at);
        Ok(stale)
    }
}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn create(&self, input: NewAccount) -> Result<Account> {
        let now = Utc::now();
        let account = Account {
            id: Uuid::now_v7(),
            owner_id: input.owner_id,
            platform: input.platform,
            credential_reference: input.credential_reference,
            status: crate::models::AccountStatus::Active,
            daily_action_limit: input.daily_action_limit,
            actions_used_today: 0,
            quota_day: input.quota_day,
            hourly_action_limit: input.hourly_action_limit,
            actions_this_hour: 0,
            hour_window_start: None,
            cooldown_until: None,
            last_used_at: None,
            failure_streak: 0,
            created_at: now,
            updated_at: now,
        };

        let mut inner = self.lock().await?;
        inner.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get(&self, id: AccountId) -> Result<Option<Account>> {
        let inner = self.lock().await?;
        Ok(inner.accounts.get(&id).cloned())
    }

    async fn list(&self, owner_id: OwnerId, platform: &str) -> Result<Vec<Account>> {
        let inner = self.lock().await?;
        let mut accounts: Vec<Account> = inner
            .accounts
            .values()
            .filter(|a| a.owner_id == owner_id && a.platform == platform)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(accounts)
    }

    async fn list_eligible(
        &self,
        owner_id: OwnerId,
        platform: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Account>> {
        let inner = self.lock().await?;
        let mut accounts: Vec<Account> = inner
            .accounts
            .values()
            .filter(|a| a.owner_id == owner_id && a.platform == platform)
            .filter(|a| a.check_eligible(now).is_ok())
            .cloned()
            .collect();
        // None sorts before Some: never-used accounts first
        accounts.sort_by(|a, b| a.last_used_at.cmp(&b.last_used_at).then(a.id.cmp(&b.id)));
        Ok(accounts)
    }

    async fn try_reserve(&self, id: AccountId, now: DateTime<Utc>) -> Result<ReserveOutcome> {
        let mut inner = self.lock().await?;
        let Some(account) = inner.accounts.get_mut(&id) else {
            return Ok(ReserveOutcome::NotFound);
        };
        Ok(match account.apply_reserve(now) {
            Ok(reservation) => ReserveOutcome::Reserved(reservation),
            Err(reason) => ReserveOutcome::Rejected(reason),
        })
    }

    async fn settle(
        &self,
        reservation: &Reservation,
        settlement: Settlement,
        now: DateTime<Utc>,
    ) -> Result<Account> {
        let mut inner = self.lock().await?;
        let account = inner.account_mut(reservation.account_id)?;
        account.apply_settlement(reservation, &settlement, now);
        Ok(account.clone())
    }

    async fn release(&self, reservation: &Reservation, now: DateTime<Utc>) -> Result<Account> {
        let mut inner = self.lock().await?;
        let account = inner.account_mut(reservation.account_id)?;
        account.apply_release(reservation, now);
        Ok(account.clone())
    }

    async fn reset_daily_counters(&self, day: NaiveDate, now: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.lock().await?;
        let mut reset = 0u64;
        for account in inner.accounts.values_mut() {
            if account.apply_daily_reset(day, now) {
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn reactivate_cooled(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.lock().await?;
        let mut reactivated = 0u64;
        for account in inner.accounts.values_mut() {
            if account.apply_reactivation(now) {
                reactivated += 1;
            }
        }
        Ok(reactivated)
    }
}

#[async_trait]
impl ExecutionLogRepository for MemoryStore {
    async fn append(&self, entry: NewLogEntry) -> Result<ExecutionLogEntry> {
        let entry = entry.into_entry();
        let mut inner = self.lock().await?;
        inner.logs.push(entry.clone());
        Ok(entry)
    }

    async fn list(
        &self,
        task_id: TaskId,
        limit: i64,
        offset: i64,
    ) -> Result<Paginated<ExecutionLogEntry>> {
        let inner = self.lock().await?;
        let rows: Vec<ExecutionLogEntry> = inner
            .logs
            .iter()
            .filter(|e| e.task_id == task_id)
            .skip(offset.max(0) as usize)
            .take((limit.max(0) + 1) as usize)
            .cloned()
            .collect();
        Ok(Paginated::from_overfetch(rows, limit, offset))
    }

    async fn summary(&self, task_id: TaskId) -> Result<LogSummary> {
        let inner = self.lock().await?;
        let mut summary = LogSummary::default();
        let mut duration_total = 0i64;
        let mut duration_count = 0i64;

        for entry in inner.logs.iter().filter(|e| e.task_id == task_id) {
            summary.entries += 1;
            if RATE_LIMIT_OUTCOMES.contains(&entry.outcome) {
                summary.rate_limited += 1;
            }
            if let Some(ms) = entry.duration_ms {
                duration_total += ms;
                duration_count += 1;
            }
        }
        if duration_count > 0 {
            summary.avg_duration_ms = Some(duration_total as f64 / duration_count as f64);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountEffect, CooldownDelay, Ineligible};
    use outreach_common::types::{ActionKind, ActionOutcome};
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;
    use std::sync::Arc;

    async fn task_with_targets(store: &MemoryStore, n: usize) -> Task {
        let task = TaskRepository::create(
            store,
            NewTask {
                owner_id: Uuid::now_v7(),
                platform: "telegram".to_string(),
                action_type: ActionKind::InviteToGroup,
                priority: Default::default(),
                settings: Default::default(),
                payload: serde_json::json!({"group": "@rustaceans"}),
            },
        )
        .await
        .unwrap();

        let targets = (0..n).map(|i| NewTarget::manual(format!("@user{}", i))).collect();
        store.insert_batch(task.id, targets).await.unwrap();
        task
    }

    async fn account(store: &MemoryStore, owner_id: OwnerId, limit: i32) -> Account {
        AccountRepository::create(
            store,
            NewAccount {
                owner_id,
                platform: "telegram".to_string(),
                credential_reference: "cred".to_string(),
                daily_action_limit: limit,
                hourly_action_limit: None,
                quota_day: Utc::now().date_naive(),
            },
        )
        .await
        .unwrap()
    }

    fn log_for(target: &Target, outcome: ActionOutcome) -> NewLogEntry {
        NewLogEntry {
            task_id: target.task_id,
            target_id: target.id,
            account_id: None,
            action_kind: ActionKind::InviteToGroup,
            outcome,
            attempt: target.attempt_count + 1,
            duration_ms: Some(40),
            detail: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_batch_skips_duplicates_and_orders() {
        let store = MemoryStore::new();
        let task = task_with_targets(&store, 2).await;

        let inserted = store
            .insert_batch(
                task.id,
                vec![NewTarget::manual("@user1"), NewTarget::manual("@late")],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let page = TargetRepository::list(&store, task.id, None, 10, 0)
            .await
            .unwrap();
        let names: Vec<_> = page
            .data
            .iter()
            .map(|t| t.external_identifier.as_str())
            .collect();
        assert_eq!(names, vec!["@user0", "@user1", "@late"]);
        assert_eq!(page.data[2].position, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_are_exclusive() {
        let store = Arc::new(MemoryStore::new());
        let task_id = task_with_targets(&store, 50).await.id;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(target) = store.claim_next(task_id, Utc::now()).await.unwrap() {
                    claimed.push(target.id);
                    tokio::task::yield_now().await;
                }
                claimed
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), 50);
        assert_eq!(unique.len(), 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reserves_never_exceed_limit() {
        let store = Arc::new(MemoryStore::new());
        let account_id = account(&store, Uuid::now_v7(), 7).await.id;

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.try_reserve(account_id, Utc::now()).await.unwrap()
            }));
        }

        let mut reserved = 0;
        for handle in handles {
            match handle.await.unwrap() {
                ReserveOutcome::Reserved(_) => reserved += 1,
                ReserveOutcome::Rejected(reason) => {
                    assert_eq!(reason, Ineligible::DailyQuotaExhausted)
                }
                ReserveOutcome::NotFound => panic!("account vanished"),
            }
        }

        let acc = AccountRepository::get(&*store, account_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reserved, 7);
        assert_eq!(acc.actions_used_today, 7);
    }

    #[tokio::test]
    async fn test_mark_outcome_requires_in_progress() {
        let store = MemoryStore::new();
        let task = task_with_targets(&store, 1).await;
        let target = store.claim_next(task.id, Utc::now()).await.unwrap().unwrap();

        let done = store
            .mark_outcome(
                target.id,
                TargetStatus::Succeeded,
                AttemptRecord {
                    count_attempt: true,
                    log: vec![log_for(&target, ActionOutcome::Succeeded)],
                    ..Default::default()
                },
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(done.status, TargetStatus::Succeeded);
        assert_eq!(done.attempt_count, 1);

        let again = store
            .requeue(target.id, AttemptRecord::default(), Utc::now())
            .await;
        assert!(matches!(again, Err(Error::Conflict(_))));

        let bad = store
            .mark_outcome(
                target.id,
                TargetStatus::Pending,
                AttemptRecord::default(),
                Utc::now(),
            )
            .await;
        assert!(matches!(bad, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_conservation_under_random_operations() {
        let store = MemoryStore::new();
        let task = task_with_targets(&store, 20).await;
        let mut rng = StdRng::seed_from_u64(7);
        let mut in_flight: Vec<Target> = Vec::new();

        for _ in 0..500 {
            match rng.random_range(0..4) {
                0 | 1 => {
                    if let Some(t) = store.claim_next(task.id, Utc::now()).await.unwrap() {
                        in_flight.push(t);
                    }
                }
                2 if !in_flight.is_empty() => {
                    let t = in_flight.swap_remove(rng.random_range(0..in_flight.len()));
                    let status = [
                        TargetStatus::Succeeded,
                        TargetStatus::Failed,
                        TargetStatus::Skipped,
                    ][rng.random_range(0..3)];
                    store
                        .mark_outcome(t.id, status, AttemptRecord::default(), Utc::now())
                        .await
                        .unwrap();
                }
                3 if !in_flight.is_empty() => {
                    let t = in_flight.swap_remove(rng.random_range(0..in_flight.len()));
                    store
                        .requeue(t.id, AttemptRecord::default(), Utc::now())
                        .await
                        .unwrap();
                }
                _ => {}
            }

            let counts = store.counts(task.id).await.unwrap();
            assert_eq!(counts.total(), 20);
            assert_eq!(counts.in_progress, in_flight.len() as i64);
        }
    }

    #[tokio::test]
    async fn test_settle_flood_wait_sets_exact_cooldown() {
        let store = MemoryStore::new();
        let acc = account(&store, Uuid::now_v7(), 10).await;
        let now = Utc::now();

        let ReserveOutcome::Reserved(reservation) = store.try_reserve(acc.id, now).await.unwrap()
        else {
            panic!("expected a reservation");
        };
        let settled = store
            .settle(
                &reservation,
                Settlement {
                    executed: false,
                    effect: AccountEffect::Penalized {
                        cooldown: CooldownDelay::Exact { secs: 120 },
                        status: None,
                    },
                },
                now,
            )
            .await
            .unwrap();

        assert_eq!(settled.cooldown_until, Some(now + chrono::Duration::seconds(120)));
        assert_eq!(settled.actions_used_today, 0);

        let eligible = store
            .list_eligible(acc.owner_id, "telegram", now + chrono::Duration::seconds(119))
            .await
            .unwrap();
        assert!(eligible.is_empty());
        let eligible = store
            .list_eligible(acc.owner_id, "telegram", now + chrono::Duration::seconds(120))
            .await
            .unwrap();
        assert_eq!(eligible.len(), 1);
    }

    #[tokio::test]
    async fn test_list_eligible_orders_least_recently_used() {
        let store = MemoryStore::new();
        let owner = Uuid::now_v7();
        let a = account(&store, owner, 10).await;
        let b = account(&store, owner, 10).await;
        let now = Utc::now();

        let ReserveOutcome::Reserved(r) = store.try_reserve(a.id, now).await.unwrap() else {
            panic!("expected a reservation");
        };
        store
            .settle(
                &r,
                Settlement {
                    executed: true,
                    effect: AccountEffect::Success,
                },
                now,
            )
            .await
            .unwrap();

        let eligible = store.list_eligible(owner, "telegram", now).await.unwrap();
        let ids: Vec<_> = eligible.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let store = MemoryStore::new();
        let task = task_with_targets(&store, 3).await;
        let target = store.claim_next(task.id, Utc::now()).await.unwrap().unwrap();
        store
            .mark_outcome(
                target.id,
                TargetStatus::Failed,
                AttemptRecord {
                    log: vec![log_for(&target, ActionOutcome::TargetInvalid)],
                    ..Default::default()
                },
                Utc::now(),
            )
            .await
            .unwrap();

        assert!(TaskRepository::delete(&store, task.id).await.unwrap());
        assert!(TargetRepository::get(&store, target.id).await.unwrap().is_none());
        let logs = ExecutionLogRepository::list(&store, task.id, 10, 0)
            .await
            .unwrap();
        assert!(logs.data.is_empty());
        assert!(!TaskRepository::delete(&store, task.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_log_summary() {
        let store = MemoryStore::new();
        let task = task_with_targets(&store, 1).await;
        let target = store.claim_next(task.id, Utc::now()).await.unwrap().unwrap();

        store
            .append(log_for(&target, ActionOutcome::FloodWait { seconds: 30 }))
            .await
            .unwrap();
        let mut slow = log_for(&target, ActionOutcome::Succeeded);
        slow.duration_ms = Some(80);
        store.append(slow).await.unwrap();

        let summary = store.summary(task.id).await.unwrap();
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.rate_limited, 1);
        assert_eq!(summary.avg_duration_ms, Some(60.0));

        let page = ExecutionLogRepository::list(&store, task.id, 1, 0)
            .await
            .unwrap();
        assert!(page.has_more);
        assert_eq!(
            page.data[0].action_outcome(),
            ActionOutcome::FloodWait { seconds: 30 }
        );
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let err = TaskRepository::get(&store, Uuid::now_v7()).await.unwrap_err();
        assert!(err.is_structural());
    }
}
