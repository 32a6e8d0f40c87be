//! Worker Pool - workers sharing every running task

use super::backoff::StarvationBackoff;
use super::executor::{ExecutionEngine, StepOutcome};
use outreach_common::config::WorkerConfig;
use outreach_common::types::TaskId;
use outreach_common::Result;
use outreach_storage::repository::TaskRepository;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// What one lease of a task achieved
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseReport {
    pub task_id: TaskId,
    pub steps: u32,
    pub last: StepOutcome,
}

/// In-process bookkeeping: which tasks are leased and when each may run again
#[derive(Default)]
struct LeaseTable {
    leased: HashSet<TaskId>,
    not_before: HashMap<TaskId, Instant>,
    starvation: HashMap<TaskId, StarvationBackoff>,
}

/// Worker Pool
///
/// Each worker leases the highest-priority running task that nobody else
/// holds and whose gate has opened, performs up to `batch_size` steps on it,
/// then hands it back.
pub struct WorkerPool {
    engine: Arc<ExecutionEngine>,
    tasks: Arc<dyn TaskRepository>,
    config: WorkerConfig,
    leases: Mutex<LeaseTable>,
}

impl WorkerPool {
    /// Create a new worker pool
    pub fn new(
        engine: Arc<ExecutionEngine>,
        tasks: Arc<dyn TaskRepository>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            engine,
            tasks,
            config,
            leases: Mutex::new(LeaseTable::default()),
        }
    }

    /// Lease one ready task and work it. `None` when no task is ready.
    pub async fn run_once(&self) -> Result<Option<LeaseReport>> {
        let running = self.tasks.list_running().await?;

        let task = {
            let mut leases = self.leases.lock().await;
            let now = Instant::now();
            let running_ids: HashSet<TaskId> = running.iter().map(|t| t.id).collect();
            leases.not_before.retain(|id, _| running_ids.contains(id));
            leases.starvation.retain(|id, _| running_ids.contains(id));

            let ready = running.into_iter().find(|task| {
                !leases.leased.contains(&task.id)
                    && leases
                        .not_before
                        .get(&task.id)
                        .map_or(true, |gate| *gate <= now)
            });
            match ready {
                Some(task) => {
                    leases.leased.insert(task.id);
                    task
                }
                None => return Ok(None),
            }
        };

        let result = self.work(task.id, task.settings.batch_size.max(1)).await;

        let mut leases = self.leases.lock().await;
        leases.leased.remove(&task.id);
        match result {
            Ok((report, gate)) => {
                match gate {
                    Some(wait) => {
                        leases.not_before.insert(task.id, Instant::now() + wait);
                    }
                    None => {
                        leases.not_before.remove(&task.id);
                    }
                }
                if let StepOutcome::Finished(_) | StepOutcome::Stopped(_) = report.last {
                    leases.starvation.remove(&task.id);
                }
                Ok(Some(report))
            }
            Err(e) => {
                leases
                    .not_before
                    .insert(task.id, Instant::now() + self.poll_interval());
                Err(e)
            }
        }
    }

    /// Run up to `batch_size` steps; returns the report and how long the task must rest
    async fn work(
        &self,
        task_id: TaskId,
        batch_size: u32,
    ) -> Result<(LeaseReport, Option<Duration>)> {
        let mut steps = 0;
        loop {
            let outcome = self.engine.step(task_id).await?;
            steps += 1;

            let gate = match &outcome {
                StepOutcome::Dispatched { pacing, .. } => {
                    self.reset_starvation(task_id).await;
                    (!pacing.is_zero()).then_some(*pacing)
                }
                StepOutcome::NoEligibleAccount { .. } => {
                    Some(self.next_starvation_wait(task_id).await)
                }
                StepOutcome::Waiting | StepOutcome::Aborted { .. } => {
                    Some(self.engine.idle_wait())
                }
                StepOutcome::Finished(_) | StepOutcome::Stopped(_) => None,
            };

            let done = gate.is_some()
                || matches!(outcome, StepOutcome::Finished(_) | StepOutcome::Stopped(_))
                || steps >= batch_size;
            if done {
                debug!(task_id = %task_id, steps, last = ?outcome, "Lease released");
                return Ok((
                    LeaseReport {
                        task_id,
                        steps,
                        last: outcome,
                    },
                    gate,
                ));
            }
        }
    }

    async fn next_starvation_wait(&self, task_id: TaskId) -> Duration {
        let mut leases = self.leases.lock().await;
        leases
            .starvation
            .entry(task_id)
            .or_insert_with(|| self.engine.starvation_backoff())
            .next()
    }

    async fn reset_starvation(&self, task_id: TaskId) {
        self.leases.lock().await.starvation.remove(&task_id);
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms)
    }

    /// Spawn the configured number of workers
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!("Worker pool started ({} workers)", self.config.workers);
        (0..self.config.workers)
            .map(|id| {
                let pool = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { pool.run_worker(id, shutdown).await })
            })
            .collect()
    }

    async fn run_worker(&self, id: usize, mut shutdown: watch::Receiver<bool>) {
        debug!("Worker {} started", id);

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once().await {
                Ok(Some(report)) => {
                    if let StepOutcome::Finished(status) = report.last {
                        info!(task_id = %report.task_id, status = %status, "Worker {} finished task", id);
                    }
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Worker {} error: {}", id, e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        debug!("Worker {} stopped", id);
    }

    /// Whether any task is leased right now
    pub async fn is_busy(&self) -> bool {
        !self.leases.lock().await.leased.is_empty()
    }
}
