//! Background task management endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use mentor_background::{scheduler::cron_due, BackgroundTask, TaskRun, Trigger};
use mentor_core::MentorError;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};

#[derive(Serialize)]
pub struct RunTaskResponse {
    pub run_id: String,
    pub message: String,
}

#[derive(Deserialize)]
pub struct RunsQuery {
    #[serde(default = "default_runs_limit")]
    pub limit: usize,
}

fn default_runs_limit() -> usize {
    50
}

/// GET /background/tasks
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<BackgroundTask>>> {
    Ok(Json(state.registry.list_all()))
}

/// GET /background/tasks/{name}
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<BackgroundTask>> {
    state
        .registry
        .get(&name)
        .map(Json)
        .ok_or_else(|| task_not_found(&name))
}

/// POST /background/tasks — create or replace a task definition.
pub async fn upsert_task(
    State(state): State<Arc<AppState>>,
    Json(task): Json<BackgroundTask>,
) -> ApiResult<Json<BackgroundTask>> {
    if task.name.trim().is_empty() {
        return Err(ApiError(MentorError::InvalidInput(
            "task name must not be empty".to_string(),
        )));
    }
    // Reject bad cron expressions at registration time, not at tick time.
    if let Trigger::Cron { ref schedule } = task.trigger {
        cron_due(schedule, chrono::Utc::now(), chrono::Utc::now())?;
    }

    state.registry.register(task.clone())?;
    info!(task = %task.name, "task upserted via API");
    Ok(Json(task))
}

/// DELETE /background/tasks/{name}
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    if !state.registry.unregister(&name)? {
        return Err(task_not_found(&name));
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// POST /background/tasks/{name}/enable
pub async fn enable_task(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<BackgroundTask>> {
    set_enabled(&state, &name, true)
}

/// POST /background/tasks/{name}/disable
pub async fn disable_task(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<BackgroundTask>> {
    set_enabled(&state, &name, false)
}

fn set_enabled(state: &AppState, name: &str, enabled: bool) -> ApiResult<Json<BackgroundTask>> {
    if !state.registry.set_enabled(name, enabled)? {
        return Err(task_not_found(name));
    }
    state
        .registry
        .get(name)
        .map(Json)
        .ok_or_else(|| task_not_found(name))
}

/// POST /background/tasks/{name}/run — manual trigger; waits for
/// completion and returns the run summary.
pub async fn run_task(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<RunTaskResponse>> {
    if state.registry.get(&name).is_none() {
        return Err(task_not_found(&name));
    }

    let run = state.scheduler.run_task_now(&name).await?;
    Ok(Json(RunTaskResponse {
        run_id: run.id,
        message: format!("Task '{name}' completed with status: {}", run.status),
    }))
}

/// GET /background/tasks/{name}/runs
pub async fn list_task_runs(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<RunsQuery>,
) -> ApiResult<Json<Vec<TaskRun>>> {
    Ok(Json(state.runs.list_runs(&name, query.limit)?))
}

/// GET /background/runs/{run_id}
pub async fn get_task_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<TaskRun>> {
    state
        .runs
        .get_run(&run_id)?
        .map(Json)
        .ok_or_else(|| ApiError(MentorError::RunNotFound { id: run_id.clone() }))
}

fn task_not_found(name: &str) -> ApiError {
    ApiError(MentorError::TaskNotFound {
        name: name.to_string(),
    })
}
