//! API routes

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::handlers::{health, tasks};
use crate::state::AppState;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/ready", get(health::readiness));

    let task_routes = Router::new()
        .route("/:task_id", get(tasks::get_task).delete(tasks::delete_task))
        .route("/:task_id/start", post(tasks::start_task))
        .route("/:task_id/pause", post(tasks::pause_task))
        .route("/:task_id/resume", post(tasks::resume_task))
        .route("/:task_id/cancel", post(tasks::cancel_task))
        .route("/:task_id/stats", get(tasks::get_stats))
        .route("/:task_id/stats/stream", get(tasks::stream_stats))
        .route("/:task_id/logs", get(tasks::list_logs));

    let api_v1 = Router::new().nest("/tasks", task_routes);

    Router::new()
        .nest("/health", health_routes)
        .route("/metrics", get(health::metrics))
        .nest("/api/v1", api_v1)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
