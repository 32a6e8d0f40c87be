//! Shared handler state

use outreach_core::{EngineMetrics, StatsAggregator, TaskController};
use outreach_storage::repository::ExecutionLogRepository;
use outreach_storage::DatabasePool;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<TaskController>,
    pub stats: StatsAggregator,
    pub logs: Arc<dyn ExecutionLogRepository>,
    pub metrics: EngineMetrics,
    /// Checked by the readiness probe; `None` for the in-memory backend
    pub db_pool: Option<DatabasePool>,
}
