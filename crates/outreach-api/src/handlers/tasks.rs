//! Task control, statistics and execution history handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::stream::{self, Stream, StreamExt};
use outreach_common::types::{Paginated, TaskId};
use outreach_core::{ControlOutcome, StatsSnapshot};
use outreach_storage::models::{ExecutionLogEntry, Task};
use serde::Deserialize;
use std::convert::Infallible;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::state::AppState;

const MAX_PAGE_SIZE: i64 = 500;

/// Query parameters for the execution history
#[derive(Debug, Deserialize)]
pub struct ListLogsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Get a task
///
/// GET /api/v1/tasks/:task_id
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.controller.get(task_id).await?))
}

/// Start a pending task, or resume a paused one
///
/// POST /api/v1/tasks/:task_id/start
pub async fn start_task(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> Result<Json<ControlOutcome>, ApiError> {
    let outcome = state.controller.start(task_id).await?;
    info!(task_id = %task_id, changed = outcome.changed, "Start requested");
    Ok(Json(outcome))
}

/// Pause a running task
///
/// POST /api/v1/tasks/:task_id/pause
pub async fn pause_task(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> Result<Json<ControlOutcome>, ApiError> {
    let outcome = state.controller.pause(task_id).await?;
    info!(task_id = %task_id, changed = outcome.changed, "Pause requested");
    Ok(Json(outcome))
}

/// Resume a paused task
///
/// POST /api/v1/tasks/:task_id/resume
pub async fn resume_task(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> Result<Json<ControlOutcome>, ApiError> {
    let outcome = state.controller.resume(task_id).await?;
    info!(task_id = %task_id, changed = outcome.changed, "Resume requested");
    Ok(Json(outcome))
}

/// Cancel a task
///
/// POST /api/v1/tasks/:task_id/cancel
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> Result<Json<ControlOutcome>, ApiError> {
    let outcome = state.controller.cancel(task_id).await?;
    info!(task_id = %task_id, changed = outcome.changed, "Cancel requested");
    Ok(Json(outcome))
}

/// Delete a stopped task with its targets and history
///
/// DELETE /api/v1/tasks/:task_id
pub async fn delete_task(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> Result<StatusCode, ApiError> {
    state.controller.delete(task_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Current statistics
///
/// GET /api/v1/tasks/:task_id/stats
pub async fn get_stats(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> Result<Json<StatsSnapshot>, ApiError> {
    state.controller.get(task_id).await?;
    Ok(Json(state.stats.snapshot(task_id).await?))
}

/// Statistics as server-sent events: the current snapshot, then one per
/// committed outcome until the task stops changing
///
/// GET /api/v1/tasks/:task_id/stats/stream
pub async fn stream_stats(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let task = state.controller.get(task_id).await?;

    // Subscribe before reading so no commit falls between the two
    let mut receiver = None;
    if !task.status.is_terminal() {
        let subscribed = state.stats.subscribe(task_id).await;
        if state.controller.get(task_id).await?.status.is_terminal() {
            // Finished in between; it will not publish again
            state.stats.close(task_id).await;
        } else {
            receiver = Some(subscribed);
        }
    }
    let initial = state.stats.snapshot(task_id).await?;

    let updates = stream::unfold(receiver, move |receiver| async move {
        let mut receiver = receiver?;
        loop {
            match receiver.recv().await {
                Ok(snapshot) => return Some((snapshot, Some(receiver))),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(task_id = %task_id, skipped, "Stats subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    let events = stream::once(async move { initial })
        .chain(updates)
        .map(|snapshot| Ok::<_, Infallible>(stats_event(&snapshot)));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn stats_event(snapshot: &StatsSnapshot) -> Event {
    Event::default()
        .event("stats")
        .json_data(snapshot)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

/// Execution history, oldest first
///
/// GET /api/v1/tasks/:task_id/logs
pub async fn list_logs(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
    Query(query): Query<ListLogsQuery>,
) -> Result<Json<Paginated<ExecutionLogEntry>>, ApiError> {
    state.controller.get(task_id).await?;
    let limit = query.limit.clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.max(0);
    Ok(Json(state.logs.list(task_id, limit, offset).await?))
}
