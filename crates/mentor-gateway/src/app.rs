use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use mentor_agent::AgentRunner;
use mentor_background::{Scheduler, TaskRegistry, TaskRunStore};
use mentor_core::config::MentorConfig;
use mentor_memory::ActivityTracker;
use mentor_store::BlockService;
use mentor_workspace::WorkspaceManager;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
/// Built once in `main`, torn down on shutdown; nothing here is a process
/// global.
pub struct AppState {
    pub config: MentorConfig,
    pub blocks: Arc<BlockService>,
    pub workspaces: Arc<WorkspaceManager>,
    pub activity: Arc<ActivityTracker>,
    pub runner: Arc<AgentRunner>,
    pub registry: Arc<TaskRegistry>,
    pub scheduler: Arc<Scheduler>,
    pub runs: Arc<TaskRunStore>,
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/chat/stream", post(crate::http::chat::chat_stream_handler))
        // Memory blocks
        .route("/users/{user_id}/blocks", get(crate::http::blocks::list_blocks))
        .route(
            "/users/{user_id}/blocks/{label}",
            get(crate::http::blocks::get_block)
                .put(crate::http::blocks::update_block)
                .delete(crate::http::blocks::delete_block),
        )
        .route(
            "/users/{user_id}/blocks/{label}/history",
            get(crate::http::blocks::get_history),
        )
        .route(
            "/users/{user_id}/blocks/{label}/versions/{sha}",
            get(crate::http::blocks::get_block_at_version),
        )
        .route(
            "/users/{user_id}/blocks/{label}/restore",
            post(crate::http::blocks::restore_block),
        )
        .route(
            "/users/{user_id}/blocks/{label}/diffs",
            get(crate::http::blocks::get_pending_diffs),
        )
        .route(
            "/users/{user_id}/blocks/{label}/propose",
            post(crate::http::blocks::propose_edit),
        )
        .route(
            "/users/{user_id}/blocks/{label}/diffs/{diff_id}/approve",
            post(crate::http::blocks::approve_diff),
        )
        .route(
            "/users/{user_id}/blocks/{label}/diffs/{diff_id}/reject",
            post(crate::http::blocks::reject_diff),
        )
        // Background tasks
        .route(
            "/background/tasks",
            get(crate::http::background::list_tasks).post(crate::http::background::upsert_task),
        )
        .route(
            "/background/tasks/{name}",
            get(crate::http::background::get_task).delete(crate::http::background::delete_task),
        )
        .route(
            "/background/tasks/{name}/enable",
            post(crate::http::background::enable_task),
        )
        .route(
            "/background/tasks/{name}/disable",
            post(crate::http::background::disable_task),
        )
        .route(
            "/background/tasks/{name}/run",
            post(crate::http::background::run_task),
        )
        .route(
            "/background/tasks/{name}/runs",
            get(crate::http::background::list_task_runs),
        )
        .route(
            "/background/runs/{run_id}",
            get(crate::http::background::get_task_run),
        )
        // Workspace files
        .route(
            "/users/{user_id}/workspace/files",
            get(crate::http::workspace::list_files),
        )
        .route(
            "/users/{user_id}/workspace/files/{*path}",
            get(crate::http::workspace::download_file)
                .put(crate::http::workspace::upload_file)
                .delete(crate::http::workspace::delete_file),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
