//! Outreach Storage - Persistence for the task execution engine
//!
//! This crate owns the data model (tasks, targets, accounts and the
//! execution log) and two interchangeable backends: PostgreSQL via sqlx
//! and an in-memory store used by tests and single-process runs.

pub mod db;
pub mod memory;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use memory::MemoryStore;
pub use models::*;
pub use repository::*;
