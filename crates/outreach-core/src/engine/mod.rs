//! Execution Engine, Worker Pool, Task Controller and maintenance

mod backoff;
mod controller;
mod executor;
mod maintenance;
mod policy;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::StarvationBackoff;
pub use controller::{ControlError, ControlOutcome, TaskController};
pub use executor::{ExecutionEngine, StepOutcome};
pub use maintenance::{MaintenanceReport, MaintenanceRunner};
pub use policy::{disposition, final_status, Disposition};
pub use worker::{LeaseReport, WorkerPool};
