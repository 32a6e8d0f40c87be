//! Repository layer for data access

pub mod accounts;
pub mod execution_log;
pub mod targets;
pub mod tasks;

use crate::db::DatabasePool;
use crate::memory::MemoryStore;
use std::sync::Arc;

// Re-export repository traits
pub use accounts::AccountRepository;
pub use execution_log::ExecutionLogRepository;
pub use targets::TargetRepository;
pub use tasks::TaskRepository;

// Re-export database implementations
pub use accounts::DbAccountRepository;
pub use execution_log::DbExecutionLogRepository;
pub use targets::DbTargetRepository;
pub use tasks::DbTaskRepository;

/// The four repositories the engine works against, behind one backend
#[derive(Clone)]
pub struct Repositories {
    pub tasks: Arc<dyn TaskRepository>,
    pub targets: Arc<dyn TargetRepository>,
    pub accounts: Arc<dyn AccountRepository>,
    pub logs: Arc<dyn ExecutionLogRepository>,
}

impl Repositories {
    /// PostgreSQL-backed repositories sharing one pool
    pub fn postgres(pool: DatabasePool) -> Self {
        Self {
            tasks: Arc::new(DbTaskRepository::new(pool.clone())),
            targets: Arc::new(DbTargetRepository::new(pool.clone())),
            accounts: Arc::new(DbAccountRepository::new(pool.clone())),
            logs: Arc::new(DbExecutionLogRepository::new(pool)),
        }
    }

    /// In-memory repositories sharing one store
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            tasks: store.clone(),
            targets: store.clone(),
            accounts: store.clone(),
            logs: store,
        }
    }
}
