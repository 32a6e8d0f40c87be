//! Periodic upkeep: daily quota reset, cooldown expiry and stale claim recovery

use super::executor::ExecutionEngine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use outreach_common::config::WorkerConfig;
use outreach_common::types::{ActionKind, ActionOutcome, TaskId};
use outreach_common::Result;
use outreach_storage::models::{AttemptRecord, NewLogEntry};
use outreach_storage::repository::TaskRepository;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// What one maintenance pass changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub accounts_reset: u64,
    pub accounts_reactivated: u64,
    pub claims_recovered: u64,
}

/// Maintenance runner
pub struct MaintenanceRunner {
    engine: Arc<ExecutionEngine>,
    tasks: Arc<dyn TaskRepository>,
    config: WorkerConfig,
}

impl MaintenanceRunner {
    pub fn new(
        engine: Arc<ExecutionEngine>,
        tasks: Arc<dyn TaskRepository>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            engine,
            tasks,
            config,
        }
    }

    /// One pass of every upkeep job
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<MaintenanceReport> {
        let pool = self.engine.pool();
        let accounts_reset = pool.reset_daily_counters(now).await?;
        let accounts_reactivated = pool.reactivate_cooled(now).await?;
        let claims_recovered = self.recover_stale_claims(now).await?;

        Ok(MaintenanceReport {
            accounts_reset,
            accounts_reactivated,
            claims_recovered,
        })
    }

    /// Requeue targets left `in_progress` by a worker that never came back.
    ///
    /// The attempt is not counted against the target; the quota the lost
    /// worker reserved stays spent.
    async fn recover_stale_claims(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now - ChronoDuration::seconds(self.config.stale_claim_secs);
        let stale = self.engine.queue().list_stale(cutoff).await?;
        if stale.is_empty() {
            return Ok(0);
        }

        let mut actions: HashMap<TaskId, Option<ActionKind>> = HashMap::new();
        let mut recovered = 0;
        for target in stale {
            let action_kind = match actions.get(&target.task_id) {
                Some(kind) => *kind,
                None => {
                    let kind = self
                        .tasks
                        .get(target.task_id)
                        .await?
                        .map(|task| task.action_type);
                    actions.insert(target.task_id, kind);
                    kind
                }
            };
            let Some(action_kind) = action_kind else {
                continue;
            };

            let detail = "claim expired before an outcome was recorded".to_string();
            let record = AttemptRecord {
                account_id: None,
                error: Some(detail.clone()),
                count_attempt: false,
                log: vec![NewLogEntry {
                    task_id: target.task_id,
                    target_id: target.id,
                    account_id: None,
                    action_kind,
                    outcome: ActionOutcome::TransientNetworkError,
                    attempt: target.attempt_count,
                    duration_ms: None,
                    detail: Some(detail),
                    created_at: now,
                }],
            };

            match self.engine.queue().requeue(target.id, record, now).await {
                Ok(_) => recovered += 1,
                // Finished by its worker in the meantime
                Err(e) if !e.is_structural() => {
                    warn!(target_id = %target.id, error = %e, "Stale claim not recovered");
                }
                Err(e) => return Err(e),
            }
        }

        if recovered > 0 {
            warn!(targets = recovered, "Recovered stale target claims");
        }
        Ok(recovered)
    }

    /// Run passes every `maintenance_interval_secs` until shutdown
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.maintenance_interval_secs.max(1));
        info!("Maintenance runner started (every {:?})", interval);

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.run_once(Utc::now()).await {
                error!("Maintenance pass failed: {}", e);
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Maintenance runner stopped");
    }
}
