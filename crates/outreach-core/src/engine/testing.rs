//! Shared fixtures for engine tests

use super::ExecutionEngine;
use crate::metrics::EngineMetrics;
use crate::platform::{ActionRequest, Credential, PlatformClient, RawOutcome, StaticCredentialStore};
use crate::stats::StatsAggregator;
use async_trait::async_trait;
use chrono::Utc;
use outreach_common::config::Config;
use outreach_common::types::{ActionKind, OwnerId, TaskId};
use outreach_storage::models::{
    Account, NewAccount, NewTarget, NewTask, Target, TaskPriority, TaskSettings, TaskStatus, Task,
};
use outreach_storage::repository::{
    AccountRepository, Repositories, TargetRepository, TaskRepository,
};
use outreach_storage::MemoryStore;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

/// Platform double: scripted outcomes per target, `Delivered` once a script runs out
#[derive(Default)]
pub(crate) struct ScriptedPlatform {
    scripts: Mutex<HashMap<String, VecDeque<RawOutcome>>>,
    calls: Mutex<Vec<ActionRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedPlatform {
    pub async fn script(&self, target: &str, outcomes: Vec<RawOutcome>) {
        self.scripts
            .lock()
            .await
            .insert(target.to_string(), outcomes.into());
    }

    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.lock().await = Some(delay);
    }

    pub async fn calls(&self) -> Vec<ActionRequest> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl PlatformClient for ScriptedPlatform {
    async fn perform_action(&self, _credential: &Credential, request: &ActionRequest) -> RawOutcome {
        self.calls.lock().await.push(request.clone());

        let delay = *self.delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.scripts
            .lock()
            .await
            .get_mut(&request.target)
            .and_then(VecDeque::pop_front)
            .unwrap_or(RawOutcome::Delivered)
    }
}

pub(crate) struct Harness {
    pub store: Arc<MemoryStore>,
    pub repos: Repositories,
    pub platform: Arc<ScriptedPlatform>,
    pub credentials: Arc<StaticCredentialStore>,
    pub stats: StatsAggregator,
    pub engine: Arc<ExecutionEngine>,
    pub config: Config,
    pub owner_id: OwnerId,
    shutdown_tx: watch::Sender<bool>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config::default();
        config.engine.idle_wait_ms = 10;
        config.engine.starvation_backoff_initial_ms = 10;
        config.engine.starvation_backoff_max_ms = 50;
        config.worker.poll_interval_ms = 10;
        customize(&mut config);

        let store = Arc::new(MemoryStore::new());
        let repos = Repositories::memory(store.clone());
        let platform = Arc::new(ScriptedPlatform::default());
        let credentials = Arc::new(StaticCredentialStore::new());
        let stats = StatsAggregator::new(repos.targets.clone(), repos.logs.clone());
        let engine = Arc::new(ExecutionEngine::new(
            &repos,
            stats.clone(),
            platform.clone(),
            credentials.clone(),
            EngineMetrics::new().unwrap(),
            &config,
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            store,
            repos,
            platform,
            credentials,
            stats,
            engine,
            config,
            owner_id: Uuid::now_v7(),
            shutdown_tx,
        }
    }

    pub fn shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub async fn account(&self, limit: i32) -> Account {
        let reference = format!("cred-{}", Uuid::now_v7());
        self.credentials.insert(reference.clone(), "session").await;
        self.account_with_credential(limit, &reference).await
    }

    pub async fn account_with_credential(&self, limit: i32, reference: &str) -> Account {
        AccountRepository::create(
            &*self.store,
            NewAccount {
                owner_id: self.owner_id,
                platform: "telegram".to_string(),
                credential_reference: reference.to_string(),
                daily_action_limit: limit,
                hourly_action_limit: None,
                quota_day: Utc::now().date_naive(),
            },
        )
        .await
        .unwrap()
    }

    pub async fn pending_task(
        &self,
        action: ActionKind,
        identifiers: &[&str],
        settings: TaskSettings,
        priority: TaskPriority,
    ) -> Task {
        let task = TaskRepository::create(
            &*self.store,
            NewTask {
                owner_id: self.owner_id,
                platform: "telegram".to_string(),
                action_type: action,
                priority,
                settings,
                payload: serde_json::json!({"group": "@rustaceans", "text": "hello"}),
            },
        )
        .await
        .unwrap();
        let targets = identifiers.iter().map(|id| NewTarget::manual(*id)).collect();
        self.store.insert_batch(task.id, targets).await.unwrap();
        task
    }

    pub async fn running_task(
        &self,
        action: ActionKind,
        identifiers: &[&str],
        settings: TaskSettings,
    ) -> Task {
        let task = self
            .pending_task(action, identifiers, settings, TaskPriority::Normal)
            .await;
        self.store
            .transition(task.id, &[TaskStatus::Pending], TaskStatus::Running, Utc::now())
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn task_status(&self, task_id: TaskId) -> TaskStatus {
        TaskRepository::get(&*self.store, task_id)
            .await
            .unwrap()
            .unwrap()
            .status
    }

    pub async fn only_target(&self, task_id: TaskId) -> Target {
        let mut page = TargetRepository::list(&*self.store, task_id, None, 2, 0)
            .await
            .unwrap();
        assert_eq!(page.data.len(), 1);
        page.data.remove(0)
    }
}
