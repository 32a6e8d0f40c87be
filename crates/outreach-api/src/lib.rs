//! Outreach API - control surface over the execution engine
//!
//! This crate exposes task lifecycle control, live statistics (polled or
//! streamed as server-sent events), execution history, health and metrics.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
