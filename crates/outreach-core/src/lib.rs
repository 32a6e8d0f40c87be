//! Outreach Core - task execution engine
//!
//! This crate drives bulk invite and message tasks through a pool of
//! rate-limited platform accounts: quota accounting, target claiming,
//! failure classification, scheduling and live statistics.

pub mod accounts;
pub mod classifier;
pub mod engine;
pub mod metrics;
pub mod platform;
pub mod stats;
pub mod targets;

pub use accounts::{AccountPool, PoolError, QuotaGuard};
pub use classifier::{Classification, FailureClassifier};
pub use engine::{
    ControlError, ControlOutcome, ExecutionEngine, MaintenanceRunner, StepOutcome,
    TaskController, WorkerPool,
};
pub use metrics::EngineMetrics;
pub use platform::{
    ActionRequest, Credential, CredentialStore, HttpPlatformClient, PassthroughCredentialStore,
    PlatformClient, RawOutcome,
};
pub use stats::{StatsAggregator, StatsHub, StatsSnapshot};
pub use targets::TargetQueue;
